//! Structured telemetry events at the daemon boundary (spec.md §6/§9),
//! kept behind a trait so tests can capture events instead of asserting
//! on log lines, the same split `rbop::processor::ProcessorTelemetry`
//! and `pofp::telemetry::FetchTelemetry` already make inside the
//! library crates.

/// A daemon-level lifecycle event, distinct from the per-crate
/// telemetry traits: these are the events `gvfsd` itself is
/// responsible for emitting around wiring rbop and pofp together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Starting { root: String },
    WatcherReady,
    FetchPipelineStarted { remote: String },
    FetchPipelineFinished { has_failures: bool },
    FatalError { context: String },
}

pub trait Sink: Send + Sync {
    fn emit(&self, event: Event);
}

/// The default sink: routes every event through `log` at `info`
/// (`error` for `FatalError`), under a stable target.
pub struct LogSink;

impl Sink for LogSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Starting { root } => {
                log::info!(target: "gvfsd", "starting for enlistment root {root}")
            }
            Event::WatcherReady => log::info!(target: "gvfsd", "filesystem watcher ready"),
            Event::FetchPipelineStarted { remote } => {
                log::info!(target: "gvfsd", "fetch pipeline started against {remote}")
            }
            Event::FetchPipelineFinished { has_failures } => {
                log::info!(target: "gvfsd", "fetch pipeline finished, has_failures={has_failures}")
            }
            Event::FatalError { context } => {
                log::error!(target: "gvfsd", "fatal error: {context}")
            }
        }
    }
}

#[cfg(test)]
pub struct CapturingSink {
    pub events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(test)]
impl CapturingSink {
    pub fn new() -> Self {
        CapturingSink {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl Sink for CapturingSink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_sink_records_events_in_order() {
        let sink = CapturingSink::new();
        sink.emit(Event::Starting {
            root: "/tmp/x".into(),
        });
        sink.emit(Event::WatcherReady);
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], Event::WatcherReady);
    }
}
