//! The single seam fatal errors route through (spec.md §6/§9: "a
//! deliberate choice... implement by routing through a single 'die'
//! function so tests can stub termination").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Injected in place of an actual process exit so tests can observe
/// that a fatal path was taken without killing the test process.
#[derive(Clone, Default)]
pub struct DeathSentinel(Arc<AtomicBool>);

impl DeathSentinel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Log an error-level telemetry event for `context` and terminate.
///
/// In production this exits the process with code 1 (spec.md §6). When
/// `sentinel` is `Some`, termination is stubbed: the sentinel is
/// tripped and the call returns instead of exiting, which is how this
/// crate's own tests exercise fatal paths without ending the test
/// binary.
pub fn die(context: &str, error: &(dyn std::error::Error + Send + Sync), sentinel: Option<&DeathSentinel>) {
    log::error!(target: "rbop::fatal", "fatal error in {context}: {error}");
    match sentinel {
        Some(sentinel) => sentinel.0.store(true, Ordering::SeqCst),
        None => std::process::exit(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Boom;
    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }
    impl std::error::Error for Boom {}

    #[test]
    fn stubbed_death_trips_the_sentinel_instead_of_exiting() {
        let sentinel = DeathSentinel::new();
        die("test", &Boom, Some(&sentinel));
        assert!(sentinel.tripped());
    }
}
