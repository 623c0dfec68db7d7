//! C7: wires the chunker, fetcher, pack indexer, and checkout stages
//! together, propagating channel completion in the exact order spec.md
//! §4.7 mandates (the pack indexer is started late, after the blob
//! finder completes, because parallel indexing would otherwise contend
//! with blob finding for I/O).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;

use crate::checkout::checkout_one;
use crate::chunker::BoundedChunker;
use crate::discover::find_missing_blobs;
use crate::fetch::{FetcherConfig, ObjectFetcher};
use crate::http::HttpClient;
use crate::indexer::index_one;
use crate::types::BlobDownloadRequest;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub struct PipelineConfig {
    pub repo_path: PathBuf,
    /// The commit whose tree is walked for missing blobs.
    pub commit: git2::Oid,
    pub chunk_size: usize,
    pub http_remote: String,
    pub fetcher: FetcherConfig,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub has_failures: bool,
    pub bytes_downloaded: u64,
    pub objects_checked_out: u64,
}

/// Run the full pipeline to completion, following spec.md §4.7's
/// six-step sequencing. Blocks the calling thread.
pub fn run(config: PipelineConfig) -> Result<PipelineOutcome, PipelineError> {
    let has_failures = Arc::new(AtomicBool::new(false));
    let checked_out = Arc::new(AtomicU64::new(0));

    let (missing_tx, missing_rx) = unbounded::<crate::types::Sha>();
    let (batch_tx, batch_rx) = unbounded::<BlobDownloadRequest>();
    let (objects_tx, objects_rx) = unbounded::<crate::types::Sha>();
    let (packs_tx, packs_rx) = unbounded::<crate::types::IndexPackRequest>();

    // The chunker is pure plumbing between the blob finder and the
    // downloader; it runs for the whole pipeline lifetime.
    let chunk_size = config.chunk_size;
    let chunker_handle = thread::Builder::new()
        .name("pofp-chunker".to_string())
        .spawn(move || {
            let chunker = BoundedChunker::new(missing_rx, chunk_size);
            while let Some(shas) = chunker.try_take() {
                if batch_tx.send(BlobDownloadRequest::new(shas)).is_err() {
                    break;
                }
            }
        })?;

    // --- Step 1: start downloader, blob-finder, checkout workers. ---

    let fetcher = Arc::new(ObjectFetcher::new(
        HttpClient::new(config.http_remote.clone()),
        config.fetcher,
    ));
    let downloader_fetcher = Arc::clone(&fetcher);
    let downloader_objects_tx = objects_tx.clone();
    let downloader_handle = thread::Builder::new()
        .name("pofp-downloader".to_string())
        .spawn(move || downloader_fetcher.run(batch_rx, downloader_objects_tx, packs_tx))?;

    let blob_finder_repo_path = config.repo_path.clone();
    let commit = config.commit;
    let blob_finder_handle = thread::Builder::new()
        .name("pofp-blobfinder".to_string())
        .spawn(move || -> Result<(), crate::discover::DiscoverError> {
            let repo = git2::Repository::open(&blob_finder_repo_path)?;
            find_missing_blobs(&repo, commit, missing_tx)
        })?;

    let checkout_repo_path = config.repo_path.clone();
    let checkout_failures = Arc::clone(&has_failures);
    let checkout_checked_out = Arc::clone(&checked_out);
    let checkout_handle = thread::Builder::new()
        .name("pofp-checkout".to_string())
        .spawn(move || {
            let repo = match git2::Repository::open(&checkout_repo_path) {
                Ok(repo) => repo,
                Err(err) => {
                    log::error!(target: "pofp::pipeline", "checkout worker failed to open repository: {err}");
                    checkout_failures.store(true, Ordering::SeqCst);
                    return;
                }
            };
            for sha in objects_rx.iter() {
                match checkout_one(&repo, sha) {
                    Ok(()) => {
                        checkout_checked_out.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => {
                        log::error!(target: "pofp::pipeline", "checkout failed for {sha}: {err}");
                        checkout_failures.store(true, Ordering::SeqCst);
                    }
                }
            }
        })?;

    // --- Step 2: wait for blob-finder completion. ---
    match blob_finder_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            log::error!(target: "pofp::pipeline", "blob finder failed: {err}");
            has_failures.store(true, Ordering::SeqCst);
        }
        Err(_) => has_failures.store(true, Ordering::SeqCst),
    }

    // --- Step 3: only now start the pack indexer. ---
    let indexer_repo_path = config.repo_path.clone();
    let indexer_failures = Arc::clone(&has_failures);
    let indexer_handle = thread::Builder::new()
        .name("pofp-indexer".to_string())
        .spawn(move || {
            let repo = match git2::Repository::open(&indexer_repo_path) {
                Ok(repo) => repo,
                Err(err) => {
                    log::error!(target: "pofp::pipeline", "pack indexer failed to open repository: {err}");
                    indexer_failures.store(true, Ordering::SeqCst);
                    return;
                }
            };
            for request in packs_rx.iter() {
                match index_one(&repo, &request) {
                    Ok(shas) => {
                        for sha in shas {
                            // Objects_tx's last clone lives here; once
                            // this loop ends and the function returns,
                            // it is dropped, closing the channel only
                            // after both producers are done — the
                            // close-ordering step 6 asks for (spec.md
                            // §4.7), achieved through ownership rather
                            // than an explicit close call.
                            let _ = objects_tx.send(sha);
                        }
                    }
                    Err(err) => {
                        log::error!(target: "pofp::pipeline", "pack indexing failed: {err}");
                        indexer_failures.store(true, Ordering::SeqCst);
                    }
                }
            }
        })?;

    // --- Step 4: wait for downloader completion. ---
    let _ = downloader_handle.join();
    if fetcher.has_failures() {
        has_failures.store(true, Ordering::SeqCst);
    }

    // --- Step 5: wait for pack indexer completion. ---
    let _ = indexer_handle.join();

    // --- Step 6 is implicit here: the checkout channel closes once
    // both producer-side senders (the downloader's clone, already
    // dropped at step 4, and the indexer's clone, just dropped at step
    // 5) are gone. ---

    // --- Step 7: wait for checkout completion. ---
    let _ = checkout_handle.join();
    let _ = chunker_handle.join();

    Ok(PipelineOutcome {
        has_failures: has_failures.load(Ordering::SeqCst),
        bytes_downloaded: fetcher.bytes_downloaded(),
        objects_checked_out: checked_out.load(Ordering::SeqCst),
    })
}
