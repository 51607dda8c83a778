//! Session Registry (spec §4.4): process-wide `name → ReflectorSession`
//! directory with reference counting and atomic resolve-or-register.
//!
//! Grounded on the teacher's `SessionManager` (one registry mutex, insertion
//! order via `HashMap`), generalized from session ids to broadcast names and
//! from plain removal to refcount-driven destruction (spec §4.4: destruction
//! must not deadlock with a caller holding a per-session mutex, so it is
//! deferred to the registry's own lock rather than run inline under the
//! session's lock).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::session::ReflectorSession;

/// A resolved reference into the registry. Dropping it does not release
/// the refcount automatically — callers call [`SessionRegistry::release`]
/// explicitly, mirroring the source's explicit resolve/release pairing
/// (spec §9: no implicit global state, no hidden destructors doing network
/// I/O).
#[derive(Clone)]
pub struct SessionHandle {
    pub session: Arc<ReflectorSession>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<ReflectorSession>>,
}

/// Name-keyed directory of live broadcasts (spec §4.4).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `resolve` (spec §4.4): look up without creating.
    pub fn resolve(&self, name: &str) -> Option<SessionHandle> {
        let inner = self.inner.read();
        inner.sessions.get(name).cloned().map(|session| SessionHandle { session })
    }

    /// `resolveOrRegister` (spec §4.4): atomic under the registry lock.
    /// Must not be called while a per-session mutex is held (spec §5).
    pub fn resolve_or_register(&self, session: ReflectorSession) -> SessionHandle {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.sessions.get(&session.name) {
            return SessionHandle { session: existing.clone() };
        }
        let name = session.name.clone();
        let arc = Arc::new(session);
        inner.sessions.insert(name, arc.clone());
        SessionHandle { session: arc }
    }

    /// `release` (spec §4.4): decrements are performed by the caller on the
    /// session object itself (e.g. `remove_subscriber`/`clear_publisher`);
    /// this call checks whether the session is now empty and, if so, removes
    /// it from the directory. Safe to call from under contention — it only
    /// ever takes the registry's own lock.
    pub fn release(&self, name: &str) {
        let mut inner = self.inner.write();
        if let Some(session) = inner.sessions.get(name) {
            if session.refcount() == 0 {
                inner.sessions.remove(name);
            }
        }
    }

    /// `unregister` (spec §4.4): forced removal, used by `.kill`.
    pub fn unregister(&self, name: &str) -> Option<Arc<ReflectorSession>> {
        self.inner.write().sessions.remove(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::source::SourceDescriptor;

    fn empty_session(name: &str) -> ReflectorSession {
        ReflectorSession::setup(name.to_string(), SourceDescriptor::permanent(vec![])).unwrap()
    }

    #[test]
    fn resolve_or_register_is_atomic_and_idempotent() {
        let registry = SessionRegistry::new();
        let h1 = registry.resolve_or_register(empty_session("live/s1"));
        let h2 = registry.resolve_or_register(empty_session("live/s1"));
        assert!(Arc::ptr_eq(&h1.session, &h2.session));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn at_most_one_entry_per_name() {
        let registry = SessionRegistry::new();
        registry.resolve_or_register(empty_session("live/s1"));
        registry.resolve_or_register(empty_session("live/s1"));
        registry.resolve_or_register(empty_session("live/s2"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn release_removes_only_when_refcount_zero() {
        let registry = SessionRegistry::new();
        let handle = registry.resolve_or_register(empty_session("live/s1"));
        handle.session.add_subscriber(1);
        registry.release("live/s1");
        assert_eq!(registry.len(), 1, "still referenced, must not be removed");

        handle.session.remove_subscriber(1, false);
        registry.release("live/s1");
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn unregister_forces_removal_regardless_of_refcount() {
        let registry = SessionRegistry::new();
        let handle = registry.resolve_or_register(empty_session("live/s1"));
        handle.session.add_subscriber(1);
        assert!(registry.unregister("live/s1").is_some());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn kill_on_nonexistent_name_is_a_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.unregister("live/missing").is_none());
        assert_eq!(registry.len(), 0);
    }
}
