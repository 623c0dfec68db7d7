//! The auto-reset wakeup signal the RBOP consumer blocks on (spec.md §5,
//! §9: "edge semantics... a condition variable guarding a boolean with
//! level-collapse").
//!
//! Repeated `pulse()` calls between `wait()`s collapse into a single
//! wakeup, matching the "auto-reset edge signal" semantics spec.md §5
//! requires so a burst of enqueues doesn't wake the consumer once per
//! enqueue.

use parking_lot::{Condvar, Mutex};

pub struct Wakeup {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Default for Wakeup {
    fn default() -> Self {
        Self::new()
    }
}

impl Wakeup {
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Raise the signal and wake one waiter. Safe to call from any
    /// number of concurrent producers.
    pub fn pulse(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_one();
    }

    /// Block until pulsed, then reset (edge semantics: the next `wait`
    /// blocks again unless pulsed again).
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.condvar.wait(&mut signalled);
        }
        *signalled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pulse_before_wait_is_not_lost() {
        let wakeup = Wakeup::new();
        wakeup.pulse();
        wakeup.wait(); // must not block
    }

    #[test]
    fn bursts_collapse_to_one_wakeup() {
        let wakeup = Arc::new(Wakeup::new());
        wakeup.pulse();
        wakeup.pulse();
        wakeup.pulse();
        wakeup.wait();
        let w2 = wakeup.clone();
        let handle = thread::spawn(move || {
            w2.wait();
            true
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        wakeup.pulse();
        assert!(handle.join().unwrap());
    }
}
