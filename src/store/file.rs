//! Directory-backed store: one file per record under `s{scale}/block_{id}.sg`,
//! plus `attributes.json` describing the volume layout.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use glam::UVec3;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{BlockKey, SubgraphStore};
use crate::blocking::Pyramid;
use crate::error::{GraphError, Result};

const ATTRIBUTES_FILE: &str = "attributes.json";

/// Layout metadata persisted next to the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttributes {
    pub shape: UVec3,
    pub leaf_shape: UVec3,
    pub factor: u32,
}

impl VolumeAttributes {
    pub fn pyramid(&self, max_scale: Option<u32>) -> Result<Pyramid> {
        Pyramid::new(self.shape, self.leaf_shape, self.factor, max_scale)
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, key: BlockKey) -> PathBuf {
        self.root
            .join(format!("s{}", key.scale))
            .join(format!("block_{}.sg", key.block))
    }

    /// Read `attributes.json`, or `None` if it was never written.
    pub fn attributes(&self) -> Result<Option<VolumeAttributes>> {
        match fs::read(self.root.join(ATTRIBUTES_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `attributes.json`. Re-writing the same layout is a no-op; a
    /// different layout is refused.
    pub fn write_attributes(&self, attrs: &VolumeAttributes) -> Result<()> {
        if let Some(existing) = self.attributes()? {
            if existing == *attrs {
                return Ok(());
            }
            return Err(GraphError::invalid_config(format!(
                "store at {} holds a different volume layout: {existing:?}",
                self.root.display()
            )));
        }
        let bytes = serde_json::to_vec_pretty(attrs)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(ATTRIBUTES_FILE))
            .map_err(|e| GraphError::Io(e.error))?;
        Ok(())
    }
}

impl SubgraphStore for FileStore {
    fn put_record(&self, key: BlockKey, bytes: &[u8]) -> Result<()> {
        let path = self.record_path(key);
        let dir = path
            .parent()
            .ok_or_else(|| GraphError::invalid_config(format!("bad record path for {key}")))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                tracing::trace!(%key, bytes = bytes.len(), "record written");
                Ok(())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                if fs::read(&path)? == bytes {
                    Ok(())
                } else {
                    Err(GraphError::already_exists(key))
                }
            }
            Err(e) => Err(GraphError::Io(e.error)),
        }
    }

    fn get_record(&self, key: BlockKey) -> Result<Vec<u8>> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(GraphError::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: BlockKey) -> Result<bool> {
        Ok(self.record_path(key).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subgraph::Subgraph;

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let g = Subgraph::from_parts(vec![1, 2], vec![[1, 2]], None, vec![], vec![]).unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put(1, 5, &g).unwrap();
            assert!(store.record_path(BlockKey::new(1, 5)).ends_with("s1/block_5.sg"));
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get(1, 5).unwrap(), g);
        assert_eq!(store.list_missing(1, &[4, 5]).unwrap(), vec![4]);
    }

    #[test]
    fn test_conflicting_put_leaves_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = BlockKey::new(0, 0);
        store.put_record(key, b"aaaaaaaa").unwrap();
        store.put_record(key, b"aaaaaaaa").unwrap();
        assert!(matches!(
            store.put_record(key, b"bbbbbbbb"),
            Err(GraphError::AlreadyExists { .. })
        ));
        assert_eq!(store.get_record(key).unwrap(), b"aaaaaaaa");
        // No stray temp files next to the record.
        let entries = fs::read_dir(dir.path().join("s0")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get(3, 3).unwrap_err().is_recoverable());
    }

    #[test]
    fn test_attributes_roundtrip_and_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.attributes().unwrap(), None);
        let attrs = VolumeAttributes {
            shape: UVec3::new(64, 64, 32),
            leaf_shape: UVec3::splat(16),
            factor: 2,
        };
        store.write_attributes(&attrs).unwrap();
        store.write_attributes(&attrs).unwrap();
        assert_eq!(store.attributes().unwrap(), Some(attrs));
        assert_eq!(attrs.pyramid(None).unwrap().top_scale(), 2);

        let other = VolumeAttributes { factor: 4, ..attrs };
        assert!(matches!(
            store.write_attributes(&other),
            Err(GraphError::InvalidConfig(_))
        ));
    }
}
