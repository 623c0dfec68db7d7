//! The reader-writer "quiescence fence" between external producers and
//! the RBOP consumer's `GitLock` release (spec.md §3/§9).
//!
//! Readers are external VFS producers briefly holding the lock while
//! calling `enqueue`. The writer side is held by the RBOP consumer only
//! while it decides whether to release `GitLock` — a short, timed
//! attempt, never a blocking wait, so a producer mid-`enqueue` cannot
//! stall the consumer indefinitely.

use std::time::Duration;

use parking_lot::RwLock;

pub struct AcquisitionLock {
    fence: RwLock<()>,
}

/// RAII reader guard returned by [`AcquisitionLock::read`].
pub struct ReadGuard<'a> {
    _guard: parking_lot::RwLockReadGuard<'a, ()>,
}

impl Default for AcquisitionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionLock {
    pub fn new() -> Self {
        Self {
            fence: RwLock::new(()),
        }
    }

    /// Reader-side acquisition for external producers: `enqueue` must be
    /// called only while holding this guard (spec.md §6).
    pub fn read(&self) -> ReadGuard<'_> {
        ReadGuard {
            _guard: self.fence.read(),
        }
    }

    /// Writer-side acquisition for the RBOP consumer's safe-release step
    /// (spec.md §4.4b): try for up to `timeout`, returning `None` if it
    /// could not be obtained within the window. The caller holds the
    /// returned guard only for the duration of the release step itself
    /// (spec.md §3: "the consumer holds it as a writer only while
    /// releasing GitLock") — this is a fence, not a lock meant to be
    /// held across any blocking work.
    pub fn try_write_for(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        self.fence
            .try_write_for(timeout)
            .map(|guard| WriteGuard { _guard: guard })
    }
}

/// RAII writer guard returned by [`AcquisitionLock::try_write_for`].
pub struct WriteGuard<'a> {
    _guard: parking_lot::RwLockWriteGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn writer_fails_while_reader_held() {
        let fence = Arc::new(AcquisitionLock::new());
        let f2 = fence.clone();
        let reader = fence.read();
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            let ok = f2.try_write_for(Duration::from_millis(10)).is_some();
            tx.send(ok).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), false);
        handle.join().unwrap();
        drop(reader);
    }

    #[test]
    fn writer_succeeds_once_reader_dropped() {
        let fence = AcquisitionLock::new();
        let reader = fence.read();
        drop(reader);
        assert!(fence.try_write_for(Duration::from_millis(10)).is_some());
    }
}
