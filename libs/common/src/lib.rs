pub mod id;
pub mod naming;

pub use id::ChannelKind;
pub use naming::topic_name;
