//! Shared data model for the fetch pipeline (spec.md §3).

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// A Git object's content address. Thin wrapper over `git2::Oid` so the
/// fetch pipeline stays typed against the same identity the checkout
/// stage and the `git2`-backed repository use.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha(git2::Oid);

impl Sha {
    pub fn from_oid(oid: git2::Oid) -> Self {
        Self(oid)
    }

    pub fn oid(&self) -> git2::Oid {
        self.0
    }

    pub fn parse(hex: &str) -> Result<Self, git2::Error> {
        git2::Oid::from_str(hex).map(Self)
    }
}

impl fmt::Debug for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically assigned identifier used for telemetry correlation
/// only — it carries no ordering contract over the data it labels
/// (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackId(u64);

impl PackId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pack-{}", self.0)
    }
}

/// A non-empty ordered batch of object SHAs to fetch in one request,
/// plus a pack id carried only for telemetry correlation (spec.md §3).
#[derive(Clone, Debug)]
pub struct BlobDownloadRequest {
    pack_id: PackId,
    shas: Vec<Sha>,
}

impl BlobDownloadRequest {
    /// Panics if `shas` is empty: `BoundedChunker` never emits empty
    /// batches, and this type's only constructor is downstream of it.
    pub fn new(shas: Vec<Sha>) -> Self {
        assert!(!shas.is_empty(), "BlobDownloadRequest must be non-empty");
        Self {
            pack_id: PackId::next(),
            shas,
        }
    }

    pub fn pack_id(&self) -> PackId {
        self.pack_id
    }

    pub fn shas(&self) -> &[Sha] {
        &self.shas
    }
}

/// A pack file on disk paired with the request that produced it. The
/// pack file is owned by the indexer once this value is sent down the
/// "available packs" channel (spec.md §3).
#[derive(Debug)]
pub struct IndexPackRequest {
    pub temp_pack_path: PathBuf,
    pub request: BlobDownloadRequest,
}

/// Response discriminator for a fetch (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    LooseObject,
    PackFile,
    BatchedLooseObjects,
}

impl ContentType {
    /// Parse from the `Content-Type` response header value, matching
    /// the content negotiation described in spec.md §6.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.split(';').next().unwrap_or(value).trim();
        match value {
            "application/x-git-loose-object" => Some(Self::LooseObject),
            "application/x-git-packfile" => Some(Self::PackFile),
            "application/x-git-loose-objects-batch" => Some(Self::BatchedLooseObjects),
            _ => None,
        }
    }

    pub fn accept_header(prefer_batched_loose_objects: bool) -> &'static str {
        if prefer_batched_loose_objects {
            "application/x-git-loose-objects-batch, application/x-git-packfile"
        } else {
            "application/x-git-packfile"
        }
    }
}
