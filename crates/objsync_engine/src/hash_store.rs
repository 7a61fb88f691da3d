//! Content hashes of consumed fragments.
//!
//! A record is skipped when every fragment's current hash equals the hash
//! recorded after its last successful commit.

use crate::error::{SyncError, SyncResult};
use crate::repository::{ContentHash, RepositoryReader};
use fs2::FileExt;
use objsync_model::{RepositoryLocation, RepositoryLocationsCollection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Persists the last committed hash per fragment.
pub trait HashStore {
    /// Last recorded hash.
    fn get(&self, location: &RepositoryLocation) -> Option<ContentHash>;

    /// Records a hash.
    fn set(&mut self, location: &RepositoryLocation, hash: ContentHash);

    /// Forgets a fragment.
    fn remove(&mut self, location: &RepositoryLocation);

    /// Every recorded fragment of `object_type`.
    fn locations(&self, object_type: &str) -> Vec<RepositoryLocation>;

    /// Makes recorded hashes durable.
    fn flush(&mut self) -> SyncResult<()> {
        Ok(())
    }
}

/// Current hashes of a collection, computed once per pass.
pub type FragmentHashes = Vec<(RepositoryLocation, ContentHash)>;

/// Hashes every fragment of `collection`.
pub fn current_hashes<R>(
    repository: &R,
    collection: &RepositoryLocationsCollection,
) -> SyncResult<FragmentHashes>
where
    R: RepositoryReader + ?Sized,
{
    collection
        .locations()
        .map(|loc| -> SyncResult<_> { Ok((loc.clone(), repository.hash(loc)?)) })
        .collect()
}

/// True unless every fragment hash matches the recorded one.
pub fn has_changed<H>(hashes: &H, current: &FragmentHashes) -> bool
where
    H: HashStore + ?Sized,
{
    current
        .iter()
        .any(|(loc, hash)| hashes.get(loc).as_ref() != Some(hash))
}

/// Hash store kept in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryHashStore {
    entries: BTreeMap<RepositoryLocation, ContentHash>,
}

impl MemoryHashStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded fragments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HashStore for MemoryHashStore {
    fn get(&self, location: &RepositoryLocation) -> Option<ContentHash> {
        self.entries.get(location).copied()
    }

    fn set(&mut self, location: &RepositoryLocation, hash: ContentHash) {
        self.entries.insert(location.clone(), hash);
    }

    fn remove(&mut self, location: &RepositoryLocation) {
        self.entries.remove(location);
    }

    fn locations(&self, object_type: &str) -> Vec<RepositoryLocation> {
        self.entries
            .keys()
            .filter(|l| l.object_type == object_type)
            .cloned()
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct HashEntry {
    object_type: String,
    key: String,
    hash: ContentHash,
}

/// Hash store persisted as a JSON file.
///
/// An exclusive lock on `<path>.lock` is held for the lifetime of the
/// store, so two processes never write the same table.
#[derive(Debug)]
pub struct FileHashStore {
    path: PathBuf,
    memory: MemoryHashStore,
    dirty: bool,
    _lock: File,
}

impl FileHashStore {
    /// Opens (or creates) the table at `path`.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_path = lock_path_for(&path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|e| SyncError::Repository {
            location: lock_path.display().to_string(),
            message: format!("hash table is locked by another process: {e}"),
        })?;

        let mut memory = MemoryHashStore::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if !content.trim().is_empty() {
                let entries: Vec<HashEntry> = serde_json::from_str(&content)?;
                for entry in entries {
                    memory.set(&RepositoryLocation::new(entry.object_type, entry.key), entry.hash);
                }
            }
        }
        tracing::debug!("Opened hash table {:?} with {} entries", path, memory.len());

        Ok(Self {
            path,
            memory,
            dirty: false,
            _lock: lock,
        })
    }

    /// Table path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of recorded fragments.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

impl HashStore for FileHashStore {
    fn get(&self, location: &RepositoryLocation) -> Option<ContentHash> {
        self.memory.get(location)
    }

    fn set(&mut self, location: &RepositoryLocation, hash: ContentHash) {
        self.memory.set(location, hash);
        self.dirty = true;
    }

    fn remove(&mut self, location: &RepositoryLocation) {
        self.memory.remove(location);
        self.dirty = true;
    }

    fn locations(&self, object_type: &str) -> Vec<RepositoryLocation> {
        self.memory.locations(object_type)
    }

    fn flush(&mut self) -> SyncResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let entries: Vec<HashEntry> = self
            .memory
            .entries
            .iter()
            .map(|(loc, hash)| HashEntry {
                object_type: loc.object_type.clone(),
                key: loc.key.clone(),
                hash: *hash,
            })
            .collect();
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        tracing::debug!("Flushed {} hashes to {:?}", entries.len(), self.path);
        Ok(())
    }
}

impl<H: HashStore + ?Sized> HashStore for &mut H {
    fn get(&self, location: &RepositoryLocation) -> Option<ContentHash> {
        (**self).get(location)
    }

    fn set(&mut self, location: &RepositoryLocation, hash: ContentHash) {
        (**self).set(location, hash)
    }

    fn remove(&mut self, location: &RepositoryLocation) {
        (**self).remove(location)
    }

    fn locations(&self, object_type: &str) -> Vec<RepositoryLocation> {
        (**self).locations(object_type)
    }

    fn flush(&mut self) -> SyncResult<()> {
        (**self).flush()
    }
}
