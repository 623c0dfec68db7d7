//! C3: the crash-safe id → [`BackgroundOperation`] mapping (spec.md §4.3).

use std::path::Path;

use crate::operation::{BackgroundOperation, OperationId};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("durable store I/O error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to decode operation record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Durability contract (spec.md §4.3): after `put` + `flush` returns,
/// the mapping survives process kill; after `delete` + `flush` returns,
/// the mapping is gone. Enumeration order is unspecified.
pub trait DurableStore: Send + Sync {
    fn put(&self, op: &BackgroundOperation) -> Result<(), StoreError>;
    fn delete(&self, id: OperationId) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
    fn get(&self, id: OperationId) -> Result<Option<BackgroundOperation>, StoreError>;
    fn keys(&self) -> Result<Vec<OperationId>, StoreError>;
    /// All pending operations, in whatever order the store enumerates
    /// them (recovery order is not required to match enqueue order).
    fn replay(&self) -> Result<Vec<BackgroundOperation>, StoreError>;
    fn close(&self) -> Result<(), StoreError>;
}

/// `sled`-backed implementation. Lives at
/// `<enlistment-root>/.gvfs/background-ops/` per spec.md §6.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// An ephemeral store for tests; not a production code path.
    #[cfg(any(test, feature = "test-support"))]
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl DurableStore for SledStore {
    fn put(&self, op: &BackgroundOperation) -> Result<(), StoreError> {
        let value = serde_json::to_vec(op)?;
        self.db.insert(op.id.to_be_bytes(), value)?;
        Ok(())
    }

    fn delete(&self, id: OperationId) -> Result<(), StoreError> {
        self.db.remove(id.to_be_bytes())?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn get(&self, id: OperationId) -> Result<Option<BackgroundOperation>, StoreError> {
        match self.db.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn keys(&self) -> Result<Vec<OperationId>, StoreError> {
        let mut ids = Vec::new();
        for entry in self.db.iter() {
            let (key, _) = entry?;
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&key);
            ids.push(OperationId::from_be_bytes(buf));
        }
        Ok(ids)
    }

    fn replay(&self) -> Result<Vec<BackgroundOperation>, StoreError> {
        let mut ops = Vec::new();
        for entry in self.db.iter() {
            let (_, value) = entry?;
            ops.push(serde_json::from_slice(&value)?);
        }
        Ok(ops)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use std::path::PathBuf;

    fn op() -> BackgroundOperation {
        BackgroundOperation::new(OperationKind::Create, PathBuf::from("a/b.txt"))
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = SledStore::temporary().unwrap();
        let op = op();
        store.put(&op).unwrap();
        store.flush().unwrap();
        let loaded = store.get(op.id).unwrap().unwrap();
        assert_eq!(loaded.id, op.id);
        assert_eq!(loaded.path, op.path);
    }

    #[test]
    fn delete_removes_the_mapping() {
        let store = SledStore::temporary().unwrap();
        let op = op();
        store.put(&op).unwrap();
        store.flush().unwrap();
        store.delete(op.id).unwrap();
        store.flush().unwrap();
        assert!(store.get(op.id).unwrap().is_none());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn survives_reopen_at_the_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = SledStore::open(dir.path()).unwrap();
            let op = op();
            store.put(&op).unwrap();
            store.flush().unwrap();
            store.close().unwrap();
            op.id
        };
        let reopened = SledStore::open(dir.path()).unwrap();
        assert!(reopened.get(id).unwrap().is_some());
    }

    #[test]
    fn replay_is_permutation_tolerant() {
        let store = SledStore::temporary().unwrap();
        let ops: Vec<_> = (0..3).map(|_| op()).collect();
        for op in &ops {
            store.put(op).unwrap();
        }
        store.flush().unwrap();
        let mut replayed_ids: Vec<_> = store.replay().unwrap().into_iter().map(|o| o.id).collect();
        let mut expected_ids: Vec<_> = ops.iter().map(|o| o.id).collect();
        replayed_ids.sort();
        expected_ids.sort();
        assert_eq!(replayed_ids, expected_ids);
    }
}
