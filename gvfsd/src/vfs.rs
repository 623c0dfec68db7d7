//! The inbound boundary RBOP is meant to be driven from (spec.md §1/§6):
//! a VFS kernel callback layer. Implementing actual kernel
//! virtualization is explicitly out of scope; this module provides a
//! trait for that boundary plus one filesystem-watcher-backed stand-in
//! that demonstrates the call order §6 mandates:
//! `obtain_acquisition_lock(); enqueue(op); release_acquisition_lock();`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rbop::{BackgroundOperation, OperationKind, Processor};

#[derive(thiserror::Error, Debug)]
pub enum VfsError {
    #[error("failed to start filesystem watcher: {0}")]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    Store(#[from] rbop::Error),
}

/// The inbound boundary: something that turns filesystem activity into
/// enqueued [`BackgroundOperation`]s against a [`Processor`].
pub trait VfsBoundary {
    fn start(&mut self, root: &Path) -> Result<(), VfsError>;
}

/// A `notify`-backed stand-in for the real kernel virtualization
/// callback. Translates raw filesystem events into
/// [`BackgroundOperation`]s and enqueues them under the acquisition
/// lock, the same discipline a real VFS provider callback would follow.
pub struct WatcherBoundary {
    processor: Arc<Processor>,
    watcher: Option<RecommendedWatcher>,
}

impl WatcherBoundary {
    pub fn new(processor: Arc<Processor>) -> Self {
        WatcherBoundary {
            processor,
            watcher: None,
        }
    }

    fn handle_event(processor: &Arc<Processor>, event: Event) {
        let Some(op) = classify(&event) else {
            return;
        };

        // Mandated order: acquire as reader, enqueue, release. Holding
        // the acquisition lock across enqueue is what lets the RBOP
        // consumer's writer-side acquisition in
        // `release_git_lock_safely` observe a quiescent producer set
        // (spec.md §4.4b).
        let guard = processor.obtain_acquisition_lock();
        if let Err(err) = processor.enqueue(op) {
            log::error!(target: "gvfsd::vfs", "failed to enqueue background operation: {err}");
        }
        processor.release_acquisition_lock(guard);
    }
}

impl VfsBoundary for WatcherBoundary {
    fn start(&mut self, root: &Path) -> Result<(), VfsError> {
        let processor = Arc::clone(&self.processor);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => Self::handle_event(&processor, event),
                Err(err) => log::error!(target: "gvfsd::vfs", "watch error: {err}"),
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        self.watcher = Some(watcher);
        Ok(())
    }
}

/// Maps a raw `notify` event to the single path-level operation it most
/// directly corresponds to. `notify` coalesces some renames into
/// separate remove/create pairs depending on platform backend; this
/// collapses anything it cannot confidently classify as a rename into a
/// plain create/delete, which RBOP's idempotent callbacks tolerate.
fn classify(event: &Event) -> Option<BackgroundOperation> {
    let path = event.paths.first()?.clone();
    let kind = match &event.kind {
        EventKind::Create(_) => OperationKind::Create,
        EventKind::Remove(_) => OperationKind::Delete,
        EventKind::Modify(notify::event::ModifyKind::Name(notify::event::RenameMode::Both)) => {
            let to = event.paths.get(1)?.clone();
            return Some(BackgroundOperation::new(OperationKind::Rename { to }, path));
        }
        EventKind::Modify(_) => OperationKind::SetFileProperties,
        _ => return None,
    };
    Some(BackgroundOperation::new(kind, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RenameMode};

    #[test]
    fn create_event_classifies_as_create() {
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path("/tmp/x".into());
        let op = classify(&event).unwrap();
        assert!(matches!(op.kind, OperationKind::Create));
    }

    #[test]
    fn paired_rename_event_classifies_as_rename_with_destination() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/tmp/old".into())
            .add_path("/tmp/new".into());
        let op = classify(&event).unwrap();
        match op.kind {
            OperationKind::Rename { to } => assert_eq!(to, PathBuf::from("/tmp/new")),
            _ => panic!("expected rename"),
        }
    }

    #[test]
    fn event_with_no_path_is_ignored() {
        let event = Event::new(EventKind::Create(CreateKind::File));
        assert!(classify(&event).is_none());
    }

    struct CountingCallbacks {
        seen: std::sync::atomic::AtomicUsize,
    }

    impl rbop::Callbacks for CountingCallbacks {
        fn pre(&self) -> rbop::CallbackResult {
            rbop::CallbackResult::Success
        }

        fn per_item(&self, _op: &BackgroundOperation) -> rbop::CallbackResult {
            self.seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            rbop::CallbackResult::Success
        }

        fn post(&self) -> rbop::CallbackResult {
            rbop::CallbackResult::Success
        }
    }

    #[test]
    fn watcher_boundary_enqueues_operation_for_a_real_file_create() {
        use rbop::{GitLock, Processor, SledStore};
        use std::sync::atomic::Ordering;
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn rbop::DurableStore> = Arc::new(SledStore::temporary().unwrap());
        let callbacks = Arc::new(CountingCallbacks {
            seen: std::sync::atomic::AtomicUsize::new(0),
        });
        let processor = Arc::new(Processor::new(
            store,
            Arc::new(GitLock::new()),
            callbacks.clone(),
            "test",
        ));
        processor.start().unwrap();

        let mut watcher = WatcherBoundary::new(Arc::clone(&processor));
        watcher.start(dir.path()).unwrap();

        std::fs::write(dir.path().join("touched.txt"), b"hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && callbacks.seen.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(25));
        }

        processor.shutdown();
        assert!(callbacks.seen.load(Ordering::SeqCst) > 0);
    }
}
