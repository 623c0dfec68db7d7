use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A 128-bit identifier for a [`BackgroundOperation`].
///
/// Printed as lowercase hex; used verbatim as the `sled` key (big-endian
/// bytes), so enumeration order on recovery follows id order, not
/// enqueue order — callers must not depend on it (spec.md §3/§5).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub u128);

impl OperationId {
    /// Generate a fresh id. Not cryptographically secure; collision odds
    /// are astronomically low for a single enlistment's lifetime.
    pub fn generate() -> Self {
        let hi = fastrand::u64(..);
        let lo = fastrand::u64(..);
        Self(((hi as u128) << 64) | lo as u128)
    }

    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// What the VFS layer observed happen to a path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Delete,
    Rename { to: PathBuf },
    SetFileProperties,
}

/// A durable record of one filesystem-change notification awaiting
/// replay into the Git index/working tree.
///
/// Invariant: an id present in the durable store is either pending or
/// currently being processed; it is removed from the store only after
/// its callback returns [`CallbackResult::Success`] (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackgroundOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub path: PathBuf,
}

impl BackgroundOperation {
    pub fn new(kind: OperationKind, path: PathBuf) -> Self {
        Self {
            id: OperationId::generate(),
            kind,
            path,
        }
    }
}

/// Tri-state outcome of a single-item or lifecycle callback (spec.md §3).
///
/// `RetryableError` causes a backoff-then-retry of the *same* item
/// without dequeue; `FatalError` terminates the process.
#[derive(Debug)]
pub enum CallbackResult {
    Success,
    RetryableError(Box<dyn std::error::Error + Send + Sync>),
    FatalError(Box<dyn std::error::Error + Send + Sync>),
}

impl CallbackResult {
    pub fn retryable<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::RetryableError(Box::new(err))
    }

    pub fn fatal<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::FatalError(Box::new(err))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
