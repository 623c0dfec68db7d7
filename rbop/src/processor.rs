//! C4: the single consumer that drains the durable queue, holding
//! [`GitLock`] for the whole pre/drain/post window (spec.md §4.4).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::acquisition::{AcquisitionLock, ReadGuard};
use crate::fatal::{self, DeathSentinel};
use crate::lock::GitLock;
use crate::operation::{BackgroundOperation, CallbackResult, OperationId};
use crate::store::DurableStore;
use crate::wakeup::Wakeup;

/// Emit progress every this many successfully processed items (spec.md
/// §4.4 "Logging cadence").
const PROGRESS_CADENCE: u64 = 25_000;
const GIT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const RETRYABLE_BACKOFF: Duration = Duration::from_millis(50);
const ACQUISITION_WRITER_TIMEOUT: Duration = Duration::from_millis(10);

/// The three lifecycle hooks an RBOP instance drives (spec.md §9:
/// "callbacks as first-class values... become small polymorphic
/// interfaces with three operations").
pub trait Callbacks: Send + Sync + 'static {
    /// Runs once, under `GitLock`, before the drain loop starts.
    fn pre(&self) -> CallbackResult;
    /// Runs once per queued operation, under `GitLock`.
    ///
    /// Must be idempotent: a crash between a successful return and the
    /// durable-store delete that follows it will replay the same
    /// operation on the next mount (spec.md §9 open question).
    fn per_item(&self, op: &BackgroundOperation) -> CallbackResult;
    /// Runs once, under `GitLock`, after the drain loop empties.
    fn post(&self) -> CallbackResult;
}

/// Telemetry sink for `TaskProcessingStatus` events (spec.md §4.4/§6).
pub trait ProcessorTelemetry: Send + Sync {
    fn task_processing_status(&self, processed: u64, remaining: u64);
}

/// Default sink: structured `log` records under a stable target,
/// matching `radicle-node`'s `target: "worker"` convention.
pub struct LogTelemetry;

impl ProcessorTelemetry for LogTelemetry {
    fn task_processing_status(&self, processed: u64, remaining: u64) {
        log::info!(
            target: "rbop::processor",
            "TaskProcessingStatus processed={processed} remaining={remaining}"
        );
    }
}

pub struct Processor {
    store: Arc<dyn DurableStore>,
    git_lock: Arc<GitLock>,
    acquisition: Arc<AcquisitionLock>,
    wakeup: Arc<Wakeup>,
    queue: Arc<Mutex<VecDeque<BackgroundOperation>>>,
    stopping: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    callbacks: Arc<dyn Callbacks>,
    telemetry: Arc<dyn ProcessorTelemetry>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    holder_name: String,
    sentinel: Option<DeathSentinel>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn DurableStore>,
        git_lock: Arc<GitLock>,
        callbacks: Arc<dyn Callbacks>,
        holder_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            git_lock,
            acquisition: Arc::new(AcquisitionLock::new()),
            wakeup: Arc::new(Wakeup::new()),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stopping: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicU64::new(0)),
            callbacks,
            telemetry: Arc::new(LogTelemetry),
            consumer: Mutex::new(None),
            holder_name: holder_name.into(),
            sentinel: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn ProcessorTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Inject a stubbed death sentinel so fatal paths trip a flag
    /// instead of calling `process::exit` — used by this crate's own
    /// tests and may be wired by a host process's own test harness.
    pub fn with_death_sentinel(mut self, sentinel: DeathSentinel) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// Replay durable entries into the in-memory queue, spawn the
    /// single consumer thread, and pulse the wakeup signal if the
    /// replayed queue is non-empty (spec.md §4.4).
    pub fn start(self: &Arc<Self>) -> Result<(), crate::store::StoreError> {
        let replayed = self.store.replay()?;
        {
            let mut queue = self.queue.lock();
            queue.extend(replayed);
            if !queue.is_empty() {
                self.wakeup.pulse();
            }
        }

        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("rbop-consumer".to_string())
            .spawn(move || this.consumer_loop())
            .expect("failed to spawn rbop consumer thread");
        *self.consumer.lock() = Some(handle);
        Ok(())
    }

    /// Persist `op` before acknowledging it, then make it visible to
    /// the consumer (spec.md §4.4: `put(id,op); flush;` then enqueue).
    pub fn enqueue(&self, op: BackgroundOperation) -> Result<(), crate::store::StoreError> {
        self.store.put(&op)?;
        self.store.flush()?;
        if !self.stopping.load(Ordering::SeqCst) {
            self.queue.lock().push_back(op);
            self.wakeup.pulse();
        }
        Ok(())
    }

    /// Reader-side acquisition for external VFS producers: callers must
    /// hold this across the whole `enqueue` call (spec.md §6).
    pub fn obtain_acquisition_lock(&self) -> ReadGuard<'_> {
        self.acquisition.read()
    }

    pub fn release_acquisition_lock(&self, guard: ReadGuard<'_>) {
        drop(guard);
    }

    /// Advisory length of the in-memory queue.
    pub fn count(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wakeup.pulse();
        if let Some(handle) = self.consumer.lock().take() {
            let _ = handle.join();
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn die(&self, context: &str, error: &(dyn std::error::Error + Send + Sync)) {
        fatal::die(context, error, self.sentinel.as_ref());
    }

    fn consumer_loop(self: Arc<Self>) {
        loop {
            // Step 1: wait for work, or exit if shutting down.
            self.wakeup.wait();
            if self.is_stopping() {
                return;
            }

            // Step 2: spin-poll GitLock.
            loop {
                if self.git_lock.try_acquire(self.holder_name.clone()) {
                    break;
                }
                if self.is_stopping() {
                    return;
                }
                thread::sleep(GIT_LOCK_POLL_INTERVAL);
            }

            // Step 3: preCallback, retry-until-success.
            if !self.retry_until_success("pre", || self.callbacks.pre()) {
                return;
            }

            // Steps 4-7 repeat as a unit: if an item shows up while we
            // are trying to release GitLock, §4.4b says to "skip release
            // and re-enter the drain loop" rather than starting over
            // from step 1 — GitLock is still held by this same consumer,
            // and `GitLock` is intentionally non-reentrant, so going back
            // to step 2's acquire loop would spin forever.
            loop {
                // Step 4: drain loop.
                if !self.drain() {
                    return;
                }

                // Step 5: flush.
                if let Err(err) = self.store.flush() {
                    log::error!(target: "rbop::processor", "flush before postCallback failed: {err}");
                    // Persistence failures during shutdown leave the store
                    // intact for the next mount (spec.md §4.4); we abort
                    // this iteration without releasing GitLock so a future
                    // consumer start resumes from a known-good state.
                    return;
                }

                // Step 6: postCallback, retry-until-success.
                if !self.retry_until_success("post", || self.callbacks.post()) {
                    return;
                }

                // Step 7: release GitLock, guarded by the safe-release
                // fence. Returns `true` once GitLock has actually been
                // released; `false` means new items appeared and drain
                // must run again before retrying release.
                if self.release_git_lock_safely() {
                    break;
                }
            }
        }
    }

    /// §4.4a: repeatedly invoke `callback` until it succeeds, sleeping
    /// on retryable failures and terminating on fatal ones. Returns
    /// `false` if the loop was abandoned (shutdown observed, or fatal).
    fn retry_until_success(&self, label: &str, mut callback: impl FnMut() -> CallbackResult) -> bool {
        loop {
            match callback() {
                CallbackResult::Success => return true,
                CallbackResult::RetryableError(err) => {
                    log::warn!(target: "rbop::processor", "{label} callback retrying: {err}");
                    if self.is_stopping() {
                        return false;
                    }
                    thread::sleep(RETRYABLE_BACKOFF);
                }
                CallbackResult::FatalError(err) => {
                    self.die(label, err.as_ref());
                    return false;
                }
            }
        }
    }

    /// Drain the in-memory queue, invoking `per_item` for the head
    /// until empty. Returns `false` if the loop was abandoned.
    fn drain(&self) -> bool {
        loop {
            let head = { self.queue.lock().front().cloned() };
            let op = match head {
                None => return true,
                Some(op) => op,
            };

            if self.is_stopping() {
                if let Err(err) = self.store.flush() {
                    log::error!(target: "rbop::processor", "flush during shutdown drain failed: {err}");
                }
                return false;
            }

            match self.callbacks.per_item(&op) {
                CallbackResult::Success => {
                    self.dequeue_and_delete(op.id);
                    let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
                    if processed % PROGRESS_CADENCE == 0 {
                        let remaining = self.queue.lock().len() as u64;
                        self.telemetry.task_processing_status(processed, remaining);
                    }
                }
                CallbackResult::RetryableError(err) => {
                    log::warn!(target: "rbop::processor", "per_item callback retrying for {}: {err}", op.id);
                    if !self.is_stopping() {
                        thread::sleep(RETRYABLE_BACKOFF);
                    }
                }
                CallbackResult::FatalError(err) => {
                    self.die("per_item", err.as_ref());
                    return false;
                }
            }
        }
    }

    /// Pop the head of the in-memory queue and delete it from the
    /// durable store. The source system performs these in this order
    /// (dequeue, then delete); a crash in between replays the
    /// just-completed operation on the next mount, which is why
    /// `per_item` callbacks must be idempotent (spec.md §9).
    fn dequeue_and_delete(&self, id: OperationId) {
        self.queue.lock().pop_front();
        if let Err(err) = self.store.delete(id) {
            log::error!(target: "rbop::processor", "failed to delete completed operation {id}: {err}");
        }
    }

    /// §4.4b: acquire the AcquisitionLock as writer with a 10ms
    /// timeout before releasing GitLock. Returns `true` once GitLock has
    /// been released. Returns `false` without releasing if an item
    /// appeared meanwhile — the caller re-enters the drain loop rather
    /// than retrying this function directly, since GitLock is still
    /// held and there may now be work to do under it.
    fn release_git_lock_safely(&self) -> bool {
        loop {
            if !self.queue.lock().is_empty() {
                return false; // new items appeared; re-enter the drain loop without releasing.
            }
            match self.acquisition.try_write_for(ACQUISITION_WRITER_TIMEOUT) {
                Some(_writer) => {
                    if self.queue.lock().is_empty() {
                        self.git_lock.release();
                        return true;
                    }
                    // An item appeared between the emptiness check above
                    // and obtaining the writer fence; drop the writer
                    // and report back to the caller without releasing.
                    return false;
                }
                None => {
                    // Writer lock not obtained within the timeout; if
                    // the queue is still empty, retry the whole thing.
                    // While stopping, give up on this dance and let the
                    // caller exit — the process is going down anyway, so
                    // leaving GitLock held has no observable effect.
                    if self.is_stopping() {
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::store::SledStore;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct CountingCallbacks {
        seen: Mutex<Vec<OperationId>>,
        pre_calls: AtomicUsize,
        post_calls: AtomicUsize,
    }

    impl CountingCallbacks {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                pre_calls: AtomicUsize::new(0),
                post_calls: AtomicUsize::new(0),
            }
        }
    }

    impl Callbacks for CountingCallbacks {
        fn pre(&self) -> CallbackResult {
            self.pre_calls.fetch_add(1, Ordering::SeqCst);
            CallbackResult::Success
        }

        fn per_item(&self, op: &BackgroundOperation) -> CallbackResult {
            self.seen.lock().push(op.id);
            CallbackResult::Success
        }

        fn post(&self) -> CallbackResult {
            self.post_calls.fetch_add(1, Ordering::SeqCst);
            CallbackResult::Success
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn persisted_replay_invokes_callback_once_per_id() {
        let store: Arc<dyn DurableStore> = Arc::new(SledStore::temporary().unwrap());
        let ids: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|_| {
                let op = BackgroundOperation::new(OperationKind::Create, PathBuf::from("f"));
                store.put(&op).unwrap();
                op.id
            })
            .collect();
        store.flush().unwrap();

        let callbacks = Arc::new(CountingCallbacks::new());
        let processor = Arc::new(Processor::new(
            store.clone(),
            Arc::new(GitLock::new()),
            callbacks.clone(),
            "test",
        ));
        processor.start().unwrap();

        assert!(wait_until(|| callbacks.seen.lock().len() == 3, Duration::from_secs(2)));
        processor.shutdown();

        let mut seen = callbacks.seen.lock().clone();
        seen.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(seen, expected);
        assert!(store.replay().unwrap().is_empty());
    }

    struct FlakyCallbacks {
        failures_remaining: Mutex<u32>,
        deletes_observed: Arc<AtomicUsize>,
    }

    impl Callbacks for FlakyCallbacks {
        fn pre(&self) -> CallbackResult {
            CallbackResult::Success
        }

        fn per_item(&self, _op: &BackgroundOperation) -> CallbackResult {
            let mut remaining = self.failures_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                CallbackResult::retryable(std::io::Error::new(std::io::ErrorKind::Other, "flaky"))
            } else {
                self.deletes_observed.fetch_add(1, Ordering::SeqCst);
                CallbackResult::Success
            }
        }

        fn post(&self) -> CallbackResult {
            CallbackResult::Success
        }
    }

    #[test]
    fn retryable_cascade_does_not_dequeue_before_success() {
        let store: Arc<dyn DurableStore> = Arc::new(SledStore::temporary().unwrap());
        let op = BackgroundOperation::new(OperationKind::Create, PathBuf::from("f"));
        store.put(&op).unwrap();
        store.flush().unwrap();

        let deletes_observed = Arc::new(AtomicUsize::new(0));
        let callbacks = Arc::new(FlakyCallbacks {
            failures_remaining: Mutex::new(4),
            deletes_observed: deletes_observed.clone(),
        });
        let processor = Arc::new(Processor::new(
            store.clone(),
            Arc::new(GitLock::new()),
            callbacks,
            "test",
        ));
        processor.start().unwrap();

        assert!(wait_until(
            || deletes_observed.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));
        processor.shutdown();
        assert!(store.get(op.id).unwrap().is_none());
    }

    struct FatalCallbacks {
        sentinel: DeathSentinel,
    }

    impl Callbacks for FatalCallbacks {
        fn pre(&self) -> CallbackResult {
            CallbackResult::Success
        }

        fn per_item(&self, _op: &BackgroundOperation) -> CallbackResult {
            CallbackResult::fatal(std::io::Error::new(std::io::ErrorKind::Other, "unrecoverable"))
        }

        fn post(&self) -> CallbackResult {
            CallbackResult::Success
        }
    }

    #[test]
    fn fatal_error_leaves_the_operation_in_the_durable_store() {
        let store: Arc<dyn DurableStore> = Arc::new(SledStore::temporary().unwrap());
        let op = BackgroundOperation::new(OperationKind::Create, PathBuf::from("f"));
        store.put(&op).unwrap();
        store.flush().unwrap();

        let sentinel = DeathSentinel::new();
        let callbacks = Arc::new(FatalCallbacks {
            sentinel: sentinel.clone(),
        });
        let processor = Arc::new(
            Processor::new(store.clone(), Arc::new(GitLock::new()), callbacks, "test")
                .with_death_sentinel(sentinel.clone()),
        );
        processor.start().unwrap();

        assert!(wait_until(|| sentinel.tripped(), Duration::from_secs(2)));
        assert!(store.get(op.id).unwrap().is_some());
    }

    #[test]
    fn race_closure_processes_item_enqueued_during_release_window() {
        let store: Arc<dyn DurableStore> = Arc::new(SledStore::temporary().unwrap());
        let callbacks = Arc::new(CountingCallbacks::new());
        let processor = Arc::new(Processor::new(
            store.clone(),
            Arc::new(GitLock::new()),
            callbacks.clone(),
            "test",
        ));
        processor.start().unwrap();

        // Simulate a producer racing the release window: obtain the
        // reader side, enqueue, then release, the mandated call order
        // from spec.md §6.
        let guard = processor.obtain_acquisition_lock();
        let op = BackgroundOperation::new(OperationKind::Create, PathBuf::from("race"));
        processor.enqueue(op.clone()).unwrap();
        processor.release_acquisition_lock(guard);

        assert!(wait_until(
            || callbacks.seen.lock().contains(&op.id),
            Duration::from_secs(2)
        ));
        processor.shutdown();
    }
}
