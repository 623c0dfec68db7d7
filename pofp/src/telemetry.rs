//! POFP telemetry events (spec.md §6): a heartbeat every 20s and a stop
//! event carrying request/byte counters.

pub trait FetchTelemetry: Send + Sync {
    fn heartbeat(&self, active_downloads: usize);
    fn stopped(&self, request_count: u64, bytes_downloaded: u64);
}

/// Default sink: structured `log` records, matching the
/// `target: "worker"` / `target: "pool"` convention `radicle-node`
/// uses for its own worker-pool telemetry.
pub struct LogTelemetry;

impl FetchTelemetry for LogTelemetry {
    fn heartbeat(&self, active_downloads: usize) {
        log::info!(target: "pofp::fetch", "DownloadHeartbeat active_downloads={active_downloads}");
    }

    fn stopped(&self, request_count: u64, bytes_downloaded: u64) {
        log::info!(
            target: "pofp::fetch",
            "download stopped request_count={request_count} bytes_downloaded={bytes_downloaded}"
        );
    }
}
