//! C2: the process-wide mutual-exclusion token guarding any Git mutation
//! (spec.md §4.2).

use parking_lot::Mutex;

/// Non-blocking, non-reentrant mutual exclusion over "who may mutate
/// Git state right now". Acquisition is `try_acquire` only — waiting is
/// left to the caller (spec.md §3's "Acquisition is non-blocking").
pub struct GitLock {
    holder: Mutex<Option<String>>,
}

impl Default for GitLock {
    fn default() -> Self {
        Self::new()
    }
}

impl GitLock {
    pub fn new() -> Self {
        Self {
            holder: Mutex::new(None),
        }
    }

    /// Attempt to acquire the lock, recording `holder` as a diagnostic
    /// identity string. Returns `false` without blocking if already held.
    pub fn try_acquire(&self, holder: impl Into<String>) -> bool {
        let mut guard = self.holder.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(holder.into());
        true
    }

    /// Release the lock. Reentrancy is not supported: releasing a lock
    /// that isn't held is a caller bug, flagged in debug builds only
    /// (spec.md §9's open question about idempotent release — we choose
    /// to surface the misuse rather than silently accept it).
    pub fn release(&self) {
        let mut guard = self.holder.lock();
        debug_assert!(guard.is_some(), "release() called without a held GitLock");
        *guard = None;
    }

    pub fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }

    /// The diagnostic identity of the current holder, if any.
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_is_exclusive() {
        let lock = GitLock::new();
        assert!(lock.try_acquire("a"));
        assert!(!lock.try_acquire("b"));
        assert_eq!(lock.holder().as_deref(), Some("a"));
    }

    #[test]
    fn release_frees_the_lock() {
        let lock = GitLock::new();
        assert!(lock.try_acquire("a"));
        lock.release();
        assert!(!lock.is_held());
        assert!(lock.try_acquire("b"));
    }
}
