//! Snapshot persistence, one blob per tree node.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::NodeId;

/// Storage of serialized games keyed by the owning tree node.
///
/// `copy` duplicates a snapshot under a new id without deserializing it;
/// forward children and branch expansions are plain snapshot copies.
pub trait SnapshotStore: Sync {
    fn write(&self, id: &NodeId, bytes: &[u8]) -> Result<()>;

    fn read(&self, id: &NodeId) -> Result<Vec<u8>>;

    fn copy(&self, from: &NodeId, to: &NodeId) -> Result<()> {
        let bytes = self.read(from)?;
        self.write(to, &bytes)
    }
}

/// Stores `<id>.json` files under one directory. Writes go through a temp
/// file and rename so readers never observe a half-written snapshot.
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &NodeId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn write(&self, id: &NodeId, bytes: &[u8]) -> Result<()> {
        let path = self.path(id);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace snapshot {}", path.display()))?;
        Ok(())
    }

    fn read(&self, id: &NodeId) -> Result<Vec<u8>> {
        let path = self.path(id);
        fs::read(&path).with_context(|| format!("read snapshot {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_copy_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsSnapshotStore::new(temp.path().join("snapshots")).expect("store");

        let a = NodeId::random();
        let b = NodeId::random();
        store.write(&a, b"{\"status\":\"PAUSED\"}").expect("write");
        store.copy(&a, &b).expect("copy");

        assert_eq!(store.read(&a).expect("read a"), store.read(&b).expect("read b"));
    }

    #[test]
    fn reading_a_missing_snapshot_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsSnapshotStore::new(temp.path()).expect("store");
        assert!(store.read(&NodeId::random()).is_err());
    }
}
