//! C6: downloads a batch as loose objects or a pack, dispatching by
//! response content type (spec.md §4.6).

use std::collections::HashSet;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use rbop::CallbackResult;

use crate::http::HttpClient;
use crate::loose::write_loose_object_atomic;
use crate::types::{BlobDownloadRequest, ContentType, IndexPackRequest, PackId, Sha};
use crate::{batch_codec, telemetry::FetchTelemetry, telemetry::LogTelemetry};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

#[derive(thiserror::Error, Debug)]
enum DispatchError {
    #[error("response Content-Type header missing or unrecognized")]
    UnknownContentType,
    #[error("server returned a loose-object response for a batch request")]
    UnexpectedLooseObject,
    #[error("fetched pack file is missing or empty")]
    EmptyPack,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid sha in batched response: {0}")]
    InvalidSha(String),
    #[error("batched-loose-objects response ended before all requested objects arrived")]
    IncompleteBatch,
    #[error("downstream channel closed")]
    ChannelClosed,
}

pub struct FetcherConfig {
    pub worker_count: usize,
    pub loose_object_root: PathBuf,
    pub temp_pack_dir: PathBuf,
    pub commit_depth: u32,
    pub prefer_batched_loose_objects: bool,
    pub heartbeat_interval: Duration,
}

impl FetcherConfig {
    pub fn new(loose_object_root: PathBuf, temp_pack_dir: PathBuf) -> Self {
        Self {
            worker_count: 8,
            loose_object_root,
            temp_pack_dir,
            commit_depth: 1,
            prefer_batched_loose_objects: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Downloads batches produced by [`crate::chunker::BoundedChunker`],
/// publishing available SHAs and pack files to the downstream channels
/// the pipeline orchestrator wires up.
pub struct ObjectFetcher {
    client: HttpClient,
    config: FetcherConfig,
    telemetry: Box<dyn FetchTelemetry>,
    has_failures: AtomicBool,
    bytes_downloaded: AtomicU64,
    request_count: AtomicU64,
    active_downloads: AtomicUsize,
}

impl ObjectFetcher {
    pub fn new(client: HttpClient, config: FetcherConfig) -> Self {
        Self {
            client,
            config,
            telemetry: Box::new(LogTelemetry),
            has_failures: AtomicBool::new(false),
            bytes_downloaded: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            active_downloads: AtomicUsize::new(0),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Box<dyn FetchTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn has_failures(&self) -> bool {
        self.has_failures.load(Ordering::SeqCst)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// Run the worker pool. Blocks until `batches` is closed and
    /// drained and every worker has returned, at which point both
    /// output channels are dropped (closing them) — this function owns
    /// the sending halves, so closure cannot happen before every
    /// worker has stopped using them (spec.md §5).
    pub fn run(
        self: Arc<Self>,
        batches: Receiver<BlobDownloadRequest>,
        available_objects: Sender<Sha>,
        available_packs: Sender<IndexPackRequest>,
    ) {
        std::fs::create_dir_all(&self.config.temp_pack_dir).ok();

        let stop_heartbeat = Arc::new(AtomicBool::new(false));
        let heartbeat = {
            let this = Arc::clone(&self);
            let stop = Arc::clone(&stop_heartbeat);
            thread::Builder::new()
                .name("pofp-heartbeat".to_string())
                .spawn(move || this.heartbeat_loop(stop))
                .expect("failed to spawn pofp heartbeat thread")
        };

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for i in 0..self.config.worker_count {
            let this = Arc::clone(&self);
            let batches = batches.clone();
            let available_objects = available_objects.clone();
            let available_packs = available_packs.clone();
            let handle = thread::Builder::new()
                .name(format!("pofp-fetch#{i}"))
                .spawn(move || {
                    while let Ok(batch) = batches.recv() {
                        this.process_batch(&batch, &available_objects, &available_packs);
                    }
                })
                .expect("failed to spawn pofp fetch worker");
            workers.push(handle);
        }
        drop(batches);
        drop(available_objects);
        drop(available_packs);

        for worker in workers {
            let _ = worker.join();
        }

        stop_heartbeat.store(true, Ordering::SeqCst);
        let _ = heartbeat.join();

        self.telemetry
            .stopped(self.request_count.load(Ordering::SeqCst), self.bytes_downloaded());
    }

    fn heartbeat_loop(&self, stop: Arc<AtomicBool>) {
        let mut last = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            if last.elapsed() >= self.config.heartbeat_interval {
                self.telemetry.heartbeat(self.active_downloads.load(Ordering::SeqCst));
                last = Instant::now();
            }
        }
    }

    fn process_batch(
        &self,
        batch: &BlobDownloadRequest,
        available_objects: &Sender<Sha>,
        available_packs: &Sender<IndexPackRequest>,
    ) {
        self.active_downloads.fetch_add(1, Ordering::SeqCst);
        if batch.shas().len() == 1 {
            self.fetch_single(batch, available_objects, available_packs);
        } else {
            self.fetch_bulk(batch, available_objects, available_packs);
        }
        self.active_downloads.fetch_sub(1, Ordering::SeqCst);
    }

    fn fetch_single(
        &self,
        batch: &BlobDownloadRequest,
        available_objects: &Sender<Sha>,
        available_packs: &Sender<IndexPackRequest>,
    ) {
        let sha = batch.shas()[0];
        self.request_count.fetch_add(1, Ordering::SeqCst);
        let result = self.client.try_download_loose_object(
            sha,
            |_attempt, response| {
                self.dispatch(response, Some(sha), batch, available_objects, available_packs, None)
            },
            |_err| {
                log::warn!(target: "pofp::fetch", "loose object fetch for {sha} exhausted retries");
            },
        );
        if !result.succeeded() {
            self.has_failures.store(true, Ordering::SeqCst);
        }
    }

    fn fetch_bulk(
        &self,
        batch: &BlobDownloadRequest,
        available_objects: &Sender<Sha>,
        available_packs: &Sender<IndexPackRequest>,
    ) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        let succeeded: Mutex<HashSet<Sha>> = Mutex::new(HashSet::new());
        let result = self.client.try_download_objects(
            || {
                let done = succeeded.lock().expect("succeeded-set mutex poisoned");
                batch
                    .shas()
                    .iter()
                    .copied()
                    .filter(|sha| !done.contains(sha))
                    .collect()
            },
            self.config.commit_depth,
            |_attempt, response| {
                self.dispatch(
                    response,
                    None,
                    batch,
                    available_objects,
                    available_packs,
                    Some(&succeeded),
                )
            },
            |_err| {
                log::warn!(target: "pofp::fetch", "bulk fetch for {} exhausted retries", batch.pack_id());
            },
            self.config.prefer_batched_loose_objects,
        );
        if !result.succeeded() {
            self.has_failures.store(true, Ordering::SeqCst);
        }
    }

    /// `write_object_or_pack`: dispatch a response by content type
    /// (spec.md §4.6).
    fn dispatch(
        &self,
        response: ureq::Response,
        requested_sha: Option<Sha>,
        request: &BlobDownloadRequest,
        available_objects: &Sender<Sha>,
        available_packs: &Sender<IndexPackRequest>,
        succeeded: Option<&Mutex<HashSet<Sha>>>,
    ) -> CallbackResult {
        let content_type = response
            .header("Content-Type")
            .and_then(ContentType::from_header);

        match content_type {
            Some(ContentType::LooseObject) => {
                let Some(sha) = requested_sha else {
                    return CallbackResult::retryable(DispatchError::UnexpectedLooseObject);
                };
                self.write_single_loose_object(response, sha, available_objects)
            }
            Some(ContentType::PackFile) => {
                self.write_pack_file(response, request, available_packs)
            }
            Some(ContentType::BatchedLooseObjects) => {
                self.write_batched_loose_objects(response, request, available_objects, succeeded)
            }
            None => CallbackResult::retryable(DispatchError::UnknownContentType),
        }
    }

    fn write_single_loose_object(
        &self,
        response: ureq::Response,
        sha: Sha,
        available_objects: &Sender<Sha>,
    ) -> CallbackResult {
        let mut body = Vec::new();
        if let Err(err) = response.into_reader().read_to_end(&mut body) {
            return CallbackResult::retryable(DispatchError::Io(err));
        }
        self.bytes_downloaded.fetch_add(body.len() as u64, Ordering::SeqCst);
        if let Err(err) =
            write_loose_object_atomic(&self.config.loose_object_root, sha, Cursor::new(body))
        {
            return CallbackResult::retryable(DispatchError::Io(err));
        }
        if available_objects.send(sha).is_err() {
            return CallbackResult::fatal(DispatchError::ChannelClosed);
        }
        CallbackResult::Success
    }

    fn write_pack_file(
        &self,
        response: ureq::Response,
        request: &BlobDownloadRequest,
        available_packs: &Sender<IndexPackRequest>,
    ) -> CallbackResult {
        let path = self
            .config
            .temp_pack_dir
            .join(format!("{}.pack", request.pack_id()));
        match stream_to_pack_file(&path, response) {
            Ok(0) => CallbackResult::retryable(DispatchError::EmptyPack),
            Ok(len) => {
                self.bytes_downloaded.fetch_add(len, Ordering::SeqCst);
                let request = IndexPackRequest {
                    temp_pack_path: path,
                    request: request.clone(),
                };
                if available_packs.send(request).is_err() {
                    return CallbackResult::fatal(DispatchError::ChannelClosed);
                }
                CallbackResult::Success
            }
            Err(err) => CallbackResult::retryable(DispatchError::Io(err)),
        }
    }

    /// Decodes the framed record stream and, on a clean EOF, checks that
    /// every SHA `request` asked for was actually received before
    /// reporting success. A well-framed but partial response must still
    /// be retried for the missing SHAs rather than silently accepted.
    fn write_batched_loose_objects(
        &self,
        response: ureq::Response,
        request: &BlobDownloadRequest,
        available_objects: &Sender<Sha>,
        succeeded: Option<&Mutex<HashSet<Sha>>>,
    ) -> CallbackResult {
        let mut reader = response.into_reader();
        let mut received_this_call = HashSet::new();
        loop {
            let record = match batch_codec::read_record(&mut reader) {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => return CallbackResult::retryable(DispatchError::Io(err)),
            };
            let (sha_hex, body) = record;
            let sha = match Sha::parse(&sha_hex) {
                Ok(sha) => sha,
                Err(_) => return CallbackResult::retryable(DispatchError::InvalidSha(sha_hex)),
            };
            self.bytes_downloaded.fetch_add(body.len() as u64, Ordering::SeqCst);
            if let Err(err) =
                write_loose_object_atomic(&self.config.loose_object_root, sha, Cursor::new(body))
            {
                return CallbackResult::retryable(DispatchError::Io(err));
            }
            received_this_call.insert(sha);
            if let Some(set) = succeeded {
                set.lock().expect("succeeded-set mutex poisoned").insert(sha);
            }
            if available_objects.send(sha).is_err() {
                return CallbackResult::fatal(DispatchError::ChannelClosed);
            }
        }

        let all_received = |sha: &Sha| match succeeded {
            Some(set) => set.lock().expect("succeeded-set mutex poisoned").contains(sha),
            None => received_this_call.contains(sha),
        };
        if request.shas().iter().any(|sha| !all_received(sha)) {
            return CallbackResult::retryable(DispatchError::IncompleteBatch);
        }
        CallbackResult::Success
    }
}

fn stream_to_pack_file(path: &Path, response: ureq::Response) -> io::Result<u64> {
    let mut reader = response.into_reader();
    let mut file = std::fs::File::create(path)?;
    io::copy(&mut reader, &mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlobDownloadRequest;
    use std::io::Write;
    use std::net::TcpListener;
    use crossbeam_channel::unbounded;

    /// Starts a one-shot HTTP/1.1 server on an ephemeral port that
    /// replies to the first request it receives with a fixed response,
    /// then returns its base URL. Used to exercise `dispatch` against a
    /// real `ureq::Response` — `ureq::Response` has no public
    /// constructor, so a real socket round-trip is the only way to get
    /// one outside of `ureq` itself.
    fn one_shot_server(status_line: &str, headers: &[(&str, &str)], body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status_line = status_line.to_string();
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = std::io::Read::read(&mut stream, &mut buf);
            write!(stream, "{status_line}\r\n").unwrap();
            for (k, v) in &headers {
                write!(stream, "{k}: {v}\r\n").unwrap();
            }
            write!(stream, "Content-Length: {}\r\n\r\n", body.len()).unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher(remote: &str, dir: &tempfile::TempDir) -> ObjectFetcher {
        let client = HttpClient::new(remote);
        let config = FetcherConfig::new(dir.path().join("loose"), dir.path().join("packs"));
        ObjectFetcher::new(client, config)
    }

    #[test]
    fn dispatch_loose_object_writes_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            &[("Content-Type", "application/x-git-loose-object")],
            b"blob body".to_vec(),
        );
        let fetcher = fetcher(&url, &dir);
        let sha = Sha::parse("000000000000000000000000000000000000000a").unwrap();
        let response = ureq::get(&format!("{url}/objects/{sha}")).call().unwrap();
        let (tx, rx) = unbounded();
        let (_pack_tx, pack_rx) = unbounded();
        let result = fetcher.write_single_loose_object(response, sha, &tx);
        assert!(matches!(result, CallbackResult::Success));
        assert_eq!(rx.try_recv().unwrap(), sha);
        assert!(pack_rx.try_recv().is_err());
        assert!(crate::loose::loose_object_exists(
            &dir.path().join("loose"),
            sha
        ));
    }

    #[test]
    fn dispatch_pack_file_streams_to_temp_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            &[("Content-Type", "application/x-git-packfile")],
            b"PACK...".to_vec(),
        );
        let fetcher = fetcher(&url, &dir);
        std::fs::create_dir_all(dir.path().join("packs")).unwrap();
        let sha = Sha::parse("000000000000000000000000000000000000000b").unwrap();
        let request = BlobDownloadRequest::new(vec![sha]);
        let response = ureq::get(&url).call().unwrap();
        let (available_packs_tx, available_packs_rx) = unbounded();
        let result = fetcher.write_pack_file(response, &request, &available_packs_tx);
        assert!(matches!(result, CallbackResult::Success));
        let received = available_packs_rx.try_recv().unwrap();
        assert!(received.temp_pack_path.exists());
        assert_eq!(std::fs::read(&received.temp_pack_path).unwrap(), b"PACK...");
    }

    #[test]
    fn batched_response_covering_every_requested_sha_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let sha_x = Sha::parse("000000000000000000000000000000000000000d").unwrap();
        let sha_y = Sha::parse("000000000000000000000000000000000000000e").unwrap();
        let mut body = Vec::new();
        batch_codec::write_record(&mut body, &sha_x.to_string(), b"x-body").unwrap();
        batch_codec::write_record(&mut body, &sha_y.to_string(), b"y-body").unwrap();
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            &[("Content-Type", "application/x-git-loose-objects-batch")],
            body,
        );
        let fetcher = fetcher(&url, &dir);
        let request = BlobDownloadRequest::new(vec![sha_x, sha_y]);
        let response = ureq::get(&url).call().unwrap();
        let (objects_tx, objects_rx) = unbounded();
        let result = fetcher.write_batched_loose_objects(response, &request, &objects_tx, None);
        assert!(matches!(result, CallbackResult::Success));
        let mut received: Vec<Sha> = objects_rx.try_iter().collect();
        received.sort_by_key(|s| s.to_string());
        assert_eq!(received, vec![sha_x, sha_y]);
    }

    #[test]
    fn batched_response_missing_a_requested_sha_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let sha_x = Sha::parse("00000000000000000000000000000000000000aa").unwrap();
        let sha_z = Sha::parse("00000000000000000000000000000000000000bb").unwrap();
        // The server only ever returns X; Z is requested but never shows
        // up before the clean EOF, a well-framed but partial response.
        let mut body = Vec::new();
        batch_codec::write_record(&mut body, &sha_x.to_string(), b"x-body").unwrap();
        let url = one_shot_server(
            "HTTP/1.1 200 OK",
            &[("Content-Type", "application/x-git-loose-objects-batch")],
            body,
        );
        let fetcher = fetcher(&url, &dir);
        let request = BlobDownloadRequest::new(vec![sha_x, sha_z]);
        let response = ureq::get(&url).call().unwrap();
        let (objects_tx, objects_rx) = unbounded();
        let result = fetcher.write_batched_loose_objects(response, &request, &objects_tx, None);
        assert!(matches!(result, CallbackResult::RetryableError(_)));
        assert_eq!(objects_rx.try_recv().unwrap(), sha_x);
        assert!(objects_rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_unknown_content_type_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let url = one_shot_server("HTTP/1.1 200 OK", &[("Content-Type", "text/plain")], Vec::new());
        let fetcher = fetcher(&url, &dir);
        let sha = Sha::parse("000000000000000000000000000000000000000c").unwrap();
        let request = BlobDownloadRequest::new(vec![sha]);
        let response = ureq::get(&url).call().unwrap();
        let (objects_tx, _objects_rx) = unbounded();
        let (packs_tx, _packs_rx) = unbounded();
        let result = fetcher.dispatch(response, Some(sha), &request, &objects_tx, &packs_tx, None);
        assert!(matches!(result, CallbackResult::RetryableError(_)));
    }
}
