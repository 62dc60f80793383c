//! Request authentication and the ambient identity used during delivery.

pub mod guard;
pub mod middleware;
pub mod tokens;

pub use guard::{scoped, AuthGuard, Guards, Principal, SessionGuard, DEFAULT_GUARD};
pub use middleware::{AuthError, AuthUser};
