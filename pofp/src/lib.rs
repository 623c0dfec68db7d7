//! Parallel Object Fetch Pipeline.
//!
//! A multi-stage producer/consumer pipeline that discovers missing
//! blob identifiers, batches them, downloads them over HTTP as loose
//! objects or packfiles with bounded retry, indexes the received
//! packs, and streams the resulting available-object identifiers to a
//! checkout stage.

pub mod batch_codec;
pub mod checkout;
pub mod chunker;
pub mod discover;
pub mod fetch;
pub mod http;
pub mod indexer;
pub mod loose;
pub mod pipeline;
pub mod telemetry;
pub mod types;

pub use chunker::BoundedChunker;
pub use fetch::{FetcherConfig, ObjectFetcher};
pub use http::HttpClient;
pub use pipeline::{run as run_pipeline, PipelineConfig, PipelineError, PipelineOutcome};
pub use types::{BlobDownloadRequest, ContentType, IndexPackRequest, PackId, Sha};
