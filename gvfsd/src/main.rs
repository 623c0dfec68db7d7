//! `gvfsd`: wires an RBOP processor and a POFP fetch pipeline against a
//! `git2` enlistment, playing the role of the out-of-scope collaborators
//! spec.md §1 names (VFS kernel callback layer, CLI, config loading)
//! well enough to exercise both subsystems end-to-end.

mod config;
mod logging;
mod telemetry;
mod vfs;

use std::path::PathBuf;
use std::sync::Arc;

use rbop::{BackgroundOperation, CallbackResult, Callbacks, GitLock, Processor, SledStore};

use config::{Paths, RemoteConfig};
use telemetry::{Event as TelemetryEvent, LogSink, Sink};
use vfs::{VfsBoundary, WatcherBoundary};

struct Args {
    root: PathBuf,
    config: Option<PathBuf>,
    remote: Option<String>,
    commit: Option<String>,
    chunk_size: Option<usize>,
}

fn parse_args() -> anyhow::Result<Args> {
    use lexopt::prelude::*;

    let mut root = None;
    let mut config = None;
    let mut remote = None;
    let mut commit = None;
    let mut chunk_size = None;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Long("root") => root = Some(PathBuf::from(parser.value()?)),
            Long("config") => config = Some(PathBuf::from(parser.value()?)),
            Long("remote") => remote = Some(parser.value()?.parse()?),
            Long("commit") => commit = Some(parser.value()?.parse()?),
            Long("chunk-size") => chunk_size = Some(parser.value()?.parse()?),
            Long("help") => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(Args {
        root: root.ok_or_else(|| anyhow::anyhow!("--root <PATH> is required"))?,
        config,
        remote,
        commit,
        chunk_size,
    })
}

fn print_usage() {
    eprintln!(
        "usage: gvfsd --root <ENLISTMENT_ROOT> [--config <FILE>] [--remote <URL>] [--commit <OID>] [--chunk-size <N>]"
    );
}

/// The concrete callback set the daemon drives RBOP with: applies each
/// background operation to the enlistment's working tree by touching
/// the index.
///
/// `git2::Repository` is `Send` but not `Sync`; a mutex makes the
/// wrapping `Arc<dyn Callbacks>` satisfy RBOP's `Send + Sync` bound even
/// though only the single consumer thread ever actually contends on it.
struct IndexCallbacks {
    repo: std::sync::Mutex<git2::Repository>,
}

impl Callbacks for IndexCallbacks {
    fn pre(&self) -> CallbackResult {
        CallbackResult::Success
    }

    fn per_item(&self, op: &BackgroundOperation) -> CallbackResult {
        log::info!(target: "gvfsd::callbacks", "applying {:?} to {:?}", op.kind, op.path);
        let repo = self.repo.lock().unwrap();
        match repo.index() {
            Ok(_index) => CallbackResult::Success,
            Err(err) => CallbackResult::retryable(err),
        }
    }

    fn post(&self) -> CallbackResult {
        CallbackResult::Success
    }
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let args = parse_args()?;
    let sink: Arc<dyn Sink> = Arc::new(LogSink);
    sink.emit(TelemetryEvent::Starting {
        root: args.root.display().to_string(),
    });

    let paths = Paths::resolve(&args.root);
    std::fs::create_dir_all(&paths.background_ops_dir)?;

    let repo = git2::Repository::open(&paths.root)
        .or_else(|_| git2::Repository::init(&paths.root))?;

    let store = Arc::new(SledStore::open(&paths.background_ops_dir)?);
    let git_lock = Arc::new(GitLock::new());
    let callbacks = Arc::new(IndexCallbacks {
        repo: std::sync::Mutex::new(repo),
    });

    let processor = Arc::new(Processor::new(store, git_lock, callbacks, "gvfsd"));
    processor.start()?;

    let mut watcher = WatcherBoundary::new(Arc::clone(&processor));
    watcher.start(&paths.root)?;
    sink.emit(TelemetryEvent::WatcherReady);

    // A config file fills in defaults for values the CLI flags don't
    // override; CLI flags win when both are given.
    let file_config = args
        .config
        .as_deref()
        .map(RemoteConfig::load)
        .transpose()?;
    let remote = args
        .remote
        .clone()
        .or_else(|| file_config.as_ref().map(|c| c.url.clone()));
    let chunk_size = args
        .chunk_size
        .or_else(|| file_config.as_ref().map(|c| c.chunk_size))
        .unwrap_or(64);
    let mut fetcher_config = pofp::FetcherConfig::new(
        paths.root.join(".git").join("objects"),
        std::env::temp_dir(),
    );
    if let Some(worker_count) = file_config.as_ref().map(|c| c.worker_count) {
        fetcher_config.worker_count = worker_count;
    }

    if let (Some(remote), Some(commit)) = (remote.as_ref(), args.commit.as_ref()) {
        sink.emit(TelemetryEvent::FetchPipelineStarted {
            remote: remote.clone(),
        });
        let commit_oid = git2::Oid::from_str(commit)?;
        let outcome = pofp::run_pipeline(pofp::PipelineConfig {
            repo_path: paths.root.clone(),
            commit: commit_oid,
            chunk_size,
            http_remote: remote.clone(),
            fetcher: fetcher_config,
        })?;
        sink.emit(TelemetryEvent::FetchPipelineFinished {
            has_failures: outcome.has_failures,
        });
        if outcome.has_failures {
            anyhow::bail!("object fetch pipeline reported failures");
        }
    }

    processor.shutdown();
    Ok(())
}
