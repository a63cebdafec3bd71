//! State shared between the proxy task and the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};

/// Per-session proxy record.
///
/// Held in an `Arc` by both the proxy and the session facade. The counter
/// is atomic; the dialect flag is write-once and the remote session id
/// follows the most recent session created through the proxy.
#[derive(Debug, Default)]
pub struct ProxySession {
    counter: AtomicU64,
    session_id: RwLock<Option<String>>,
    legacy: OnceLock<bool>,
}

impl ProxySession {
    /// Empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current command counter
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Overwrite the command counter
    pub fn set_counter(&self, value: u64) {
        self.counter.store(value, Ordering::SeqCst);
    }

    /// Reset the command counter to zero
    pub fn reset_counter(&self) {
        self.set_counter(0);
    }

    /// Increment the counter and return the new value
    pub fn increment(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Remote session id, once a session has been created
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the remote session id; returns the one it replaces
    pub fn set_session_id(&self, id: impl Into<String>) -> Option<String> {
        self.session_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(id.into())
    }

    /// True when the remote server answered session creation in the legacy dialect
    pub fn is_legacy(&self) -> bool {
        self.legacy.get().copied().unwrap_or(false)
    }

    /// Whether the dialect has been decided yet
    pub fn dialect_known(&self) -> bool {
        self.legacy.get().is_some()
    }

    /// Record the dialect; later calls are ignored
    pub fn mark_dialect(&self, legacy: bool) {
        let _ = self.legacy.set(legacy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_operations() {
        let session = ProxySession::new();
        assert_eq!(session.counter(), 0);
        assert_eq!(session.increment(), 1);
        assert_eq!(session.increment(), 2);
        session.set_counter(40);
        assert_eq!(session.increment(), 41);
        session.reset_counter();
        assert_eq!(session.counter(), 0);
    }

    #[test]
    fn test_dialect_is_write_once() {
        let session = ProxySession::new();
        assert!(!session.dialect_known());
        assert!(!session.is_legacy());
        session.mark_dialect(true);
        session.mark_dialect(false);
        assert!(session.is_legacy());
    }

    #[test]
    fn test_latest_session_id_wins() {
        let session = ProxySession::new();
        assert_eq!(session.session_id(), None);
        assert_eq!(session.set_session_id("abc"), None);
        assert_eq!(session.set_session_id("def").as_deref(), Some("abc"));
        assert_eq!(session.session_id().as_deref(), Some("def"));
    }

    #[test]
    fn test_increments_from_many_threads() {
        let session = Arc::new(ProxySession::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&session);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        s.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap_or_default();
        }
        assert_eq!(session.counter(), 1000);
    }
}
