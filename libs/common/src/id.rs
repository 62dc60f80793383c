use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Namespace segment shared by every channel this system hands out.
pub const CHANNEL_NAMESPACE: &str = "subcast";

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = subcast_common::id::prefixed_ulid("private-subcast");
/// assert!(id.starts_with("private-subcast-"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}

/// Semantics a real-time transport attaches to a channel.
///
/// Transports such as Pusher-compatible servers only ask the application to
/// authenticate `private-` and `presence-` channels, so the kind is encoded in
/// the channel name itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Private,
    Presence,
}

impl ChannelKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ChannelKind::Private => "private",
            ChannelKind::Presence => "presence",
        }
    }

    /// Generate a fresh, globally unique channel name of this kind.
    pub fn generate(self) -> String {
        prefixed_ulid(&format!("{}-{}", self.prefix(), CHANNEL_NAMESPACE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid("private-subcast");
        assert!(id.starts_with("private-subcast-"));
        // ULID is 26 chars, plus prefix + separator
        assert_eq!(id.len(), "private-subcast".len() + 1 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = ChannelKind::Private.generate();
        let b = ChannelKind::Private.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_channels_carry_their_kind() {
        assert!(ChannelKind::Private.generate().starts_with("private-subcast-"));
        assert!(ChannelKind::Presence.generate().starts_with("presence-subcast-"));
    }
}
