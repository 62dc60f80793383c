//! Authentication guards and per-delivery identity.
//!
//! A guard answers "who is the current user" for resolver code. Outside a
//! delivery that is the guard's own principal. Inside [`scoped`] it is the
//! principal pinned for that one delivery, held in a task-local so other
//! tasks (concurrent deliveries, other broadcasts) never observe it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

tokio::task_local! {
    static PINNED: PinnedIdentity;
}

/// Name used when a context snapshot does not record a guard.
pub const DEFAULT_GUARD: &str = "api";

/// An authenticated identity, reduced to plain scalars so it can be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The authentication guard boundary consumed by delivery.
pub trait AuthGuard: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the active principal, remembering the one it replaces.
    fn set_user(&self, user: Option<Principal>);

    fn user(&self) -> Option<Principal>;

    /// Restore the principal that was active before the latest `set_user`.
    fn reset(&self);
}

#[derive(Default)]
struct GuardState {
    current: Option<Principal>,
    saved: Vec<Option<Principal>>,
}

impl GuardState {
    fn set_user(&mut self, user: Option<Principal>) {
        let previous = std::mem::replace(&mut self.current, user);
        self.saved.push(previous);
    }

    fn reset(&mut self) {
        if let Some(previous) = self.saved.pop() {
            self.current = previous;
        }
    }
}

/// Guard states visible to one delivery, by guard name. Guards the delivery
/// did not pin start out anonymous.
struct PinnedIdentity {
    guards: RefCell<HashMap<String, GuardState>>,
}

impl PinnedIdentity {
    fn new(guard: &str, user: Option<Principal>) -> Self {
        let state = GuardState {
            current: user,
            saved: Vec::new(),
        };
        Self {
            guards: RefCell::new(HashMap::from([(guard.to_string(), state)])),
        }
    }
}

/// Run `delivery` with `user` pinned as the principal of the guard named
/// `guard`.
///
/// The pin lives in the returned future only: code polled inside it sees
/// `user` across every `.await`, and nothing else does. It is gone once the
/// future completes, is dropped or unwinds.
pub fn scoped<F, Fut>(
    guard: &str,
    user: Option<Principal>,
    delivery: F,
) -> impl Future<Output = Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    PINNED.scope(PinnedIdentity::new(guard, user), async move { delivery().await })
}

/// Guard whose principal is pinned per delivery and shared otherwise.
pub struct SessionGuard {
    name: String,
    shared: Mutex<GuardState>,
}

impl SessionGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Mutex::new(GuardState::default()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut GuardState) -> R) -> R {
        if PINNED.try_with(|_| ()).is_ok() {
            PINNED.with(|pinned| {
                let mut guards = pinned.guards.borrow_mut();
                f(guards.entry(self.name.clone()).or_default())
            })
        } else {
            f(&mut self.shared.lock())
        }
    }
}

impl AuthGuard for SessionGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_user(&self, user: Option<Principal>) {
        self.with_state(|state| state.set_user(user));
    }

    fn user(&self) -> Option<Principal> {
        self.with_state(|state| state.current.clone())
    }

    fn reset(&self) {
        self.with_state(GuardState::reset);
    }
}

/// Named guards for one application instance.
///
/// Guards are created on first use so a snapshot naming a guard this process
/// has not seen yet still gets a place to put its principal.
pub struct Guards {
    default: String,
    guards: DashMap<String, Arc<dyn AuthGuard>>,
}

impl Guards {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            guards: DashMap::new(),
        }
    }

    /// Resolve a guard by name, falling back to the default guard.
    pub fn guard(&self, name: Option<&str>) -> Arc<dyn AuthGuard> {
        let name = name.unwrap_or(self.default.as_str());
        self.guards
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SessionGuard::new(name)))
            .clone()
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn default_guard(&self) -> Arc<dyn AuthGuard> {
        self.guard(None)
    }
}

impl Default for Guards {
    fn default() -> Self {
        Self::new(DEFAULT_GUARD)
    }
}
