//! Identity registry for cluster handles
//!
//! Handles outlive the process that created them. The registry keeps them in
//! a state directory (by default `~/.hg5k/`):
//! - `<type>/<id>.json`: one serialized [`ClusterHandle`] per `(type, id)`
//! - `<type>/default`: id of the most recently persisted handle of that type
//! - `<type>/links/<id>.json`: parent `(type, id)` a layered handle was built on
//!
//! Every write goes to a temporary file in the target directory and is renamed
//! over the record, so a crash never leaves a half-written record behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::cluster::{ClusterHandle, ClusterType};
use crate::{Error, Result};

const RECORD_EXT: &str = "json";
const DEFAULT_FILE_NAME: &str = "default";
const LINKS_DIR_NAME: &str = "links";

/// Reference to a handle of another type, recorded at creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub cluster_type: ClusterType,
    pub id: u32,
}

/// Directory backed store of cluster handles.
#[derive(Clone, Debug)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// Open (and create if needed) a registry rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::config(format!("failed to create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, cluster_type: ClusterType) -> PathBuf {
        self.root.join(cluster_type.as_str())
    }

    fn record_path(&self, cluster_type: ClusterType, id: u32) -> PathBuf {
        self.type_dir(cluster_type)
            .join(format!("{}.{}", id, RECORD_EXT))
    }

    fn default_path(&self, cluster_type: ClusterType) -> PathBuf {
        self.type_dir(cluster_type).join(DEFAULT_FILE_NAME)
    }

    fn link_path(&self, cluster_type: ClusterType, id: u32) -> PathBuf {
        self.type_dir(cluster_type)
            .join(LINKS_DIR_NAME)
            .join(format!("{}.{}", id, RECORD_EXT))
    }

    /// Ids stored for `cluster_type`, ascending.
    pub fn ids(&self, cluster_type: ClusterType) -> Result<Vec<u32>> {
        let dir = self.type_dir(cluster_type);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// An id not used by any stored handle of `cluster_type`.
    ///
    /// Ids start at 1 and grow past the highest stored id. Once `u32::MAX`
    /// is taken the lowest free id is handed out instead.
    pub fn generate_new_id(&self, cluster_type: ClusterType) -> Result<u32> {
        let ids = self.ids(cluster_type)?;
        let next = match ids.last() {
            None => 1,
            Some(max) => match max.checked_add(1) {
                Some(next) => next,
                None => lowest_free_id(&ids).ok_or_else(|| {
                    Error::config(format!("no {} cluster id left", cluster_type))
                })?,
            },
        };
        debug!(cluster_type = %cluster_type, id = next, "Generated cluster id");
        Ok(next)
    }

    pub fn exists(&self, cluster_type: ClusterType, id: u32) -> bool {
        self.record_path(cluster_type, id).is_file()
    }

    /// Id of the most recently persisted handle of `cluster_type`.
    ///
    /// A pointer to a record that no longer exists reads as absent.
    pub fn default_id(&self, cluster_type: ClusterType) -> Result<Option<u32>> {
        let path = self.default_path(cluster_type);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)?;
        let id: u32 = raw.trim().parse().map_err(|_| {
            Error::config(format!(
                "corrupt default pointer {}: {:?}",
                path.display(),
                raw.trim()
            ))
        })?;

        if !self.exists(cluster_type, id) {
            warn!(
                cluster_type = %cluster_type,
                id,
                "Default pointer references a missing cluster, ignoring it"
            );
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// Persist `handle` under `(cluster_type, id)` and make it the default.
    pub fn serialize(&self, cluster_type: ClusterType, id: u32, handle: &ClusterHandle) -> Result<()> {
        let data = serde_json::to_vec_pretty(handle)?;
        write_atomic(&self.record_path(cluster_type, id), &data)?;
        write_atomic(&self.default_path(cluster_type), id.to_string().as_bytes())?;
        debug!(cluster_type = %cluster_type, id, "Persisted cluster");
        Ok(())
    }

    /// Load the handle stored under `(cluster_type, id)`.
    pub fn deserialize(&self, cluster_type: ClusterType, id: u32) -> Result<ClusterHandle> {
        let path = self.record_path(cluster_type, id);
        if !path.is_file() {
            return Err(Error::NotFound { cluster_type, id });
        }

        let data = fs::read(&path)?;
        let handle: ClusterHandle = serde_json::from_slice(&data).map_err(|e| {
            Error::config(format!("failed to parse {}: {}", path.display(), e))
        })?;

        if handle.cluster_type != cluster_type || handle.id != id {
            return Err(Error::config(format!(
                "{} holds {} cluster {}",
                path.display(),
                handle.cluster_type,
                handle.id
            )));
        }
        handle.validate()?;
        Ok(handle)
    }

    /// Delete the record, its link and, if it was the default, the default pointer.
    pub fn remove(&self, cluster_type: ClusterType, id: u32) -> Result<()> {
        let path = self.record_path(cluster_type, id);
        if !path.is_file() {
            return Err(Error::NotFound { cluster_type, id });
        }

        // Read the pointer before the record goes away; afterwards it reads as absent.
        let was_default = self.default_id(cluster_type)? == Some(id);

        fs::remove_file(&path)?;

        let link = self.link_path(cluster_type, id);
        if link.exists() {
            fs::remove_file(link)?;
        }
        if was_default {
            fs::remove_file(self.default_path(cluster_type))?;
        }

        debug!(cluster_type = %cluster_type, id, "Removed cluster");
        Ok(())
    }

    /// Record that `(child_type, child_id)` was built on `(parent_type, parent_id)`.
    ///
    /// Links can only be written before the child is first persisted; after
    /// that, re-recording the same link is a no-op and a different one is
    /// rejected.
    pub fn link(
        &self,
        child_type: ClusterType,
        child_id: u32,
        parent_type: ClusterType,
        parent_id: u32,
    ) -> Result<()> {
        let link = Link {
            cluster_type: parent_type,
            id: parent_id,
        };

        if self.exists(child_type, child_id) {
            return match self.parent_of(child_type, child_id)? {
                Some(existing) if existing == link => Ok(()),
                _ => Err(Error::usage(format!(
                    "{} cluster {} already exists, its link cannot change",
                    child_type, child_id
                ))),
            };
        }

        let data = serde_json::to_vec_pretty(&link)?;
        write_atomic(&self.link_path(child_type, child_id), &data)
    }

    /// Parent a layered handle was built on, if any.
    pub fn parent_of(&self, cluster_type: ClusterType, id: u32) -> Result<Option<Link>> {
        let path = self.link_path(cluster_type, id);
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::config(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Lowest id in `1..=u32::MAX` missing from the sorted `ids`.
fn lowest_free_id(ids: &[u32]) -> Option<u32> {
    let mut candidate = 1u32;
    for &id in ids {
        match id.cmp(&candidate) {
            std::cmp::Ordering::Less => {}
            std::cmp::Ordering::Equal => candidate = candidate.checked_add(1)?,
            std::cmp::Ordering::Greater => return Some(candidate),
        }
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSettings, Service, Version};

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path().join("state")).unwrap();
        (dir, registry)
    }

    fn handle(cluster_type: ClusterType, id: u32) -> ClusterHandle {
        ClusterHandle::new(
            cluster_type,
            id,
            vec!["node-1.rennes.grid5000.fr".into(), "node-2.rennes.grid5000.fr".into()],
            Version::new(2, 6),
            ClusterSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn stored_handle_reads_back_equal() {
        let (_dir, registry) = registry();
        let id = registry.generate_new_id(ClusterType::Hadoop).unwrap();
        let mut h = handle(ClusterType::Hadoop, id);
        h.set_initialized(true);
        h.set_running(Service::Filesystem, true).unwrap();

        registry.serialize(ClusterType::Hadoop, id, &h).unwrap();
        let loaded = registry.deserialize(ClusterType::Hadoop, id).unwrap();
        assert_eq!(loaded, h);
    }

    #[test]
    fn generated_ids_are_never_in_use() {
        let (_dir, registry) = registry();
        for _ in 0..5 {
            let id = registry.generate_new_id(ClusterType::Hadoop).unwrap();
            assert!(!registry.exists(ClusterType::Hadoop, id));
            registry
                .serialize(ClusterType::Hadoop, id, &handle(ClusterType::Hadoop, id))
                .unwrap();
        }
        assert_eq!(registry.ids(ClusterType::Hadoop).unwrap(), vec![1, 2, 3, 4, 5]);

        // A gap left by removal is not reused ahead of the maximum
        registry.remove(ClusterType::Hadoop, 2).unwrap();
        let id = registry.generate_new_id(ClusterType::Hadoop).unwrap();
        assert_eq!(id, 6);
    }

    #[test]
    fn id_after_the_last_possible_one_reuses_a_free_id() {
        let (_dir, registry) = registry();
        for id in [1, 2, u32::MAX] {
            registry
                .serialize(ClusterType::Hadoop, id, &handle(ClusterType::Hadoop, id))
                .unwrap();
        }

        let id = registry.generate_new_id(ClusterType::Hadoop).unwrap();
        assert_eq!(id, 3);
        assert!(!registry.exists(ClusterType::Hadoop, id));
    }

    #[test]
    fn lowest_free_id_skips_taken_ids() {
        assert_eq!(lowest_free_id(&[]), Some(1));
        assert_eq!(lowest_free_id(&[1, 2, 4]), Some(3));
        assert_eq!(lowest_free_id(&[2, u32::MAX]), Some(1));
    }

    #[test]
    fn ids_are_scoped_per_type() {
        let (_dir, registry) = registry();
        registry
            .serialize(ClusterType::Hadoop, 1, &handle(ClusterType::Hadoop, 1))
            .unwrap();
        assert!(registry.exists(ClusterType::Hadoop, 1));
        assert!(!registry.exists(ClusterType::Hive, 1));
        assert_eq!(registry.generate_new_id(ClusterType::Hive).unwrap(), 1);
    }

    #[test]
    fn default_tracks_last_persisted_and_clears_on_remove() {
        let (_dir, registry) = registry();
        assert_eq!(registry.default_id(ClusterType::Hadoop).unwrap(), None);

        registry
            .serialize(ClusterType::Hadoop, 1, &handle(ClusterType::Hadoop, 1))
            .unwrap();
        registry
            .serialize(ClusterType::Hadoop, 2, &handle(ClusterType::Hadoop, 2))
            .unwrap();
        assert_eq!(registry.default_id(ClusterType::Hadoop).unwrap(), Some(2));

        // Removing a non-default record keeps the pointer
        registry.remove(ClusterType::Hadoop, 1).unwrap();
        assert_eq!(registry.default_id(ClusterType::Hadoop).unwrap(), Some(2));

        registry.remove(ClusterType::Hadoop, 2).unwrap();
        assert_eq!(registry.default_id(ClusterType::Hadoop).unwrap(), None);
    }

    #[test]
    fn missing_records_are_not_found() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.deserialize(ClusterType::Hadoop, 7),
            Err(Error::NotFound { id: 7, .. })
        ));
        assert!(matches!(
            registry.remove(ClusterType::Hadoop, 7),
            Err(Error::NotFound { id: 7, .. })
        ));
    }

    #[test]
    fn removing_twice_reports_not_found() {
        let (_dir, registry) = registry();
        registry
            .serialize(ClusterType::Hadoop, 3, &handle(ClusterType::Hadoop, 3))
            .unwrap();
        registry.remove(ClusterType::Hadoop, 3).unwrap();
        assert!(matches!(
            registry.remove(ClusterType::Hadoop, 3),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn overwrite_replaces_previous_record() {
        let (_dir, registry) = registry();
        let mut h = handle(ClusterType::Hadoop, 1);
        registry.serialize(ClusterType::Hadoop, 1, &h).unwrap();

        h.set_initialized(true);
        registry.serialize(ClusterType::Hadoop, 1, &h).unwrap();
        assert!(registry.deserialize(ClusterType::Hadoop, 1).unwrap().initialized);

        // No temp files are left next to the records
        let entries: Vec<_> = fs::read_dir(registry.root().join("hadoop"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 2, "unexpected entries: {:?}", entries);
    }

    #[test]
    fn links_are_fixed_after_first_persist() {
        let (_dir, registry) = registry();
        registry
            .link(ClusterType::Hive, 1, ClusterType::Hadoop, 4)
            .unwrap();
        // Still creating: overwrite allowed
        registry
            .link(ClusterType::Hive, 1, ClusterType::Hadoop, 5)
            .unwrap();
        registry
            .serialize(ClusterType::Hive, 1, &handle(ClusterType::Hive, 1))
            .unwrap();

        let parent = registry.parent_of(ClusterType::Hive, 1).unwrap().unwrap();
        assert_eq!(
            parent,
            Link {
                cluster_type: ClusterType::Hadoop,
                id: 5
            }
        );

        registry
            .link(ClusterType::Hive, 1, ClusterType::Hadoop, 5)
            .unwrap();
        assert!(registry
            .link(ClusterType::Hive, 1, ClusterType::Hadoop, 6)
            .is_err());

        registry.remove(ClusterType::Hive, 1).unwrap();
        assert!(registry.parent_of(ClusterType::Hive, 1).unwrap().is_none());
    }

    #[test]
    fn mismatched_record_is_rejected() {
        let (_dir, registry) = registry();
        registry
            .serialize(ClusterType::Hadoop, 1, &handle(ClusterType::Hadoop, 9))
            .unwrap();
        assert!(matches!(
            registry.deserialize(ClusterType::Hadoop, 1),
            Err(Error::Config(_))
        ));
    }
}
