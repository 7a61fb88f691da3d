//! Repository readers.
//!
//! The engine never touches paths directly; it works with
//! [`RepositoryLocation`] handles produced by a [`RepositoryReader`].
//!
//! Layout shared by the built-in readers:
//!
//! ```text
//! <type>/<code name>.json           main fragment
//! <type>/<code name>/<field>[.ext]  auxiliary fragment for <field>
//! ```

use crate::error::{SyncError, SyncResult};
use objsync_model::{RepositoryLocation, RepositoryLocationsCollection, TypeInfo};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MAIN_EXTENSION: &str = "json";

/// SHA-256 digest of a fragment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hashes `content`.
    pub fn of(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-case hex encoding.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses a hex encoding produced by [`ContentHash::to_hex`].
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid content hash: {value}"))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

/// Read access to serialized fragments.
pub trait RepositoryReader {
    /// Whether the fragment exists.
    fn exists(&self, location: &RepositoryLocation) -> bool;

    /// Reads the fragment content.
    fn read(&self, location: &RepositoryLocation) -> SyncResult<String>;

    /// Hashes the fragment content.
    fn hash(&self, location: &RepositoryLocation) -> SyncResult<ContentHash> {
        Ok(ContentHash::of(self.read(location)?.as_bytes()))
    }

    /// Every record collection stored for `info`'s type, in code name order.
    fn collections(&self, info: &TypeInfo) -> SyncResult<Vec<RepositoryLocationsCollection>>;

    /// Drops any cached content for the fragment.
    fn evict(&self, _location: &RepositoryLocation) {}
}

/// Key of the main fragment.
pub fn main_key(object_type: &str, code_name: &str) -> String {
    format!("{object_type}/{code_name}.{MAIN_EXTENSION}")
}

/// Key of an auxiliary fragment.
pub fn auxiliary_key(object_type: &str, code_name: &str, file_name: &str) -> String {
    format!("{object_type}/{code_name}/{file_name}")
}

fn field_of(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Reads fragments from a directory tree.
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    /// Opens a repository rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, location: &RepositoryLocation) -> SyncResult<PathBuf> {
        if location.key.split('/').any(|part| part == "..") {
            return Err(SyncError::repository(location, "key escapes repository root"));
        }
        Ok(self.root.join(&location.key))
    }
}

impl RepositoryReader for FsRepository {
    fn exists(&self, location: &RepositoryLocation) -> bool {
        self.path_of(location).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read(&self, location: &RepositoryLocation) -> SyncResult<String> {
        let path = self.path_of(location)?;
        std::fs::read_to_string(&path).map_err(|e| SyncError::repository(location, e.to_string()))
    }

    fn collections(&self, info: &TypeInfo) -> SyncResult<Vec<RepositoryLocationsCollection>> {
        let type_dir = self.root.join(&info.object_type);
        if !type_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut mains = Vec::new();
        for entry in std::fs::read_dir(&type_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(MAIN_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    mains.push(stem.to_string());
                }
            }
        }
        mains.sort();

        let mut collections = Vec::with_capacity(mains.len());
        for code_name in mains {
            let main = RepositoryLocation::new(&info.object_type, main_key(&info.object_type, &code_name));
            let mut collection = RepositoryLocationsCollection::new(&code_name, main);

            let aux_dir = type_dir.join(&code_name);
            if aux_dir.is_dir() {
                let mut files: Vec<String> = std::fs::read_dir(&aux_dir)?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_file())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect();
                files.sort();
                for file_name in files {
                    let location = RepositoryLocation::new(
                        &info.object_type,
                        auxiliary_key(&info.object_type, &code_name, &file_name),
                    );
                    collection = collection.with_auxiliary(field_of(&file_name), location);
                }
            }
            collections.push(collection);
        }
        Ok(collections)
    }
}

/// In-memory repository for tests and tooling.
///
/// Uses the same key layout as [`FsRepository`]. Counts reads so that tests
/// can assert that unchanged records are never re-read.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    fragments: RwLock<BTreeMap<String, String>>,
    reads: AtomicUsize,
}

impl MemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a main fragment.
    pub fn put_record(&self, object_type: &str, code_name: &str, content: impl Into<String>) {
        self.fragments
            .write()
            .insert(main_key(object_type, code_name), content.into());
    }

    /// Stores an auxiliary fragment.
    pub fn put_auxiliary(
        &self,
        object_type: &str,
        code_name: &str,
        file_name: &str,
        content: impl Into<String>,
    ) {
        self.fragments.write().insert(
            auxiliary_key(object_type, code_name, file_name),
            content.into(),
        );
    }

    /// Removes a record together with its auxiliary fragments.
    pub fn remove_record(&self, object_type: &str, code_name: &str) {
        let aux_prefix = format!("{object_type}/{code_name}/");
        let main = main_key(object_type, code_name);
        self.fragments
            .write()
            .retain(|key, _| key != &main && !key.starts_with(&aux_prefix));
    }

    /// Removes one auxiliary fragment.
    pub fn remove_auxiliary(&self, object_type: &str, code_name: &str, file_name: &str) {
        self.fragments
            .write()
            .remove(&auxiliary_key(object_type, code_name, file_name));
    }

    /// Number of `read` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RepositoryReader for MemoryRepository {
    fn exists(&self, location: &RepositoryLocation) -> bool {
        self.fragments.read().contains_key(&location.key)
    }

    fn read(&self, location: &RepositoryLocation) -> SyncResult<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.fragments
            .read()
            .get(&location.key)
            .cloned()
            .ok_or_else(|| SyncError::repository(location, "fragment not found"))
    }

    fn hash(&self, location: &RepositoryLocation) -> SyncResult<ContentHash> {
        self.fragments
            .read()
            .get(&location.key)
            .map(|c| ContentHash::of(c.as_bytes()))
            .ok_or_else(|| SyncError::repository(location, "fragment not found"))
    }

    fn collections(&self, info: &TypeInfo) -> SyncResult<Vec<RepositoryLocationsCollection>> {
        let prefix = format!("{}/", info.object_type);
        let fragments = self.fragments.read();
        let mut by_code: BTreeMap<String, RepositoryLocationsCollection> = BTreeMap::new();

        for key in fragments.keys().filter(|k| k.starts_with(&prefix)) {
            let rest = &key[prefix.len()..];
            if let Some(code_name) = rest.strip_suffix(&format!(".{MAIN_EXTENSION}")) {
                if !code_name.contains('/') {
                    let main = RepositoryLocation::new(&info.object_type, key.clone());
                    by_code
                        .entry(code_name.to_string())
                        .or_insert_with(|| RepositoryLocationsCollection::new(code_name, main));
                }
            }
        }
        for key in fragments.keys().filter(|k| k.starts_with(&prefix)) {
            let rest = &key[prefix.len()..];
            if let Some((code_name, file_name)) = rest.split_once('/') {
                if let Some(collection) = by_code.get_mut(code_name) {
                    let location = RepositoryLocation::new(&info.object_type, key.clone());
                    collection.auxiliary.push(objsync_model::AuxiliaryLocation {
                        field: field_of(file_name).to_string(),
                        location,
                    });
                }
            }
        }
        Ok(by_code.into_values().collect())
    }
}

impl<R: RepositoryReader + ?Sized> RepositoryReader for Arc<R> {
    fn exists(&self, location: &RepositoryLocation) -> bool {
        (**self).exists(location)
    }

    fn read(&self, location: &RepositoryLocation) -> SyncResult<String> {
        (**self).read(location)
    }

    fn hash(&self, location: &RepositoryLocation) -> SyncResult<ContentHash> {
        (**self).hash(location)
    }

    fn collections(&self, info: &TypeInfo) -> SyncResult<Vec<RepositoryLocationsCollection>> {
        (**self).collections(info)
    }

    fn evict(&self, location: &RepositoryLocation) {
        (**self).evict(location)
    }
}

struct CacheState {
    entries: HashMap<RepositoryLocation, Arc<str>>,
    order: VecDeque<RepositoryLocation>,
}

/// Bounded content cache in front of another reader.
///
/// Change detection reads every fragment to hash it; the cache keeps that
/// content around for the deserializer. Skipped records are evicted.
pub struct CachingRepository<R> {
    inner: R,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl<R: RepositoryReader> CachingRepository<R> {
    /// Wraps `inner` with a cache of at most `capacity` fragments.
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of cached fragments.
    pub fn cached(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn content(&self, location: &RepositoryLocation) -> SyncResult<Arc<str>> {
        if let Some(hit) = self.state.lock().entries.get(location) {
            return Ok(Arc::clone(hit));
        }
        let content: Arc<str> = Arc::from(self.inner.read(location)?);

        let mut state = self.state.lock();
        if state.entries.insert(location.clone(), Arc::clone(&content)).is_none() {
            state.order.push_back(location.clone());
        }
        while state.entries.len() > self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
        Ok(content)
    }
}

impl<R: RepositoryReader> RepositoryReader for CachingRepository<R> {
    fn exists(&self, location: &RepositoryLocation) -> bool {
        self.state.lock().entries.contains_key(location) || self.inner.exists(location)
    }

    fn read(&self, location: &RepositoryLocation) -> SyncResult<String> {
        Ok(self.content(location)?.to_string())
    }

    fn hash(&self, location: &RepositoryLocation) -> SyncResult<ContentHash> {
        Ok(ContentHash::of(self.content(location)?.as_bytes()))
    }

    fn collections(&self, info: &TypeInfo) -> SyncResult<Vec<RepositoryLocationsCollection>> {
        self.inner.collections(info)
    }

    fn evict(&self, location: &RepositoryLocation) {
        let mut state = self.state.lock();
        if state.entries.remove(location).is_some() {
            state.order.retain(|l| l != location);
        }
        drop(state);
        self.inner.evict(location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tag_info() -> TypeInfo {
        TypeInfo::new("blog.tag").with_structured_field("body")
    }

    #[test]
    fn content_hash_hex_round_trip() {
        let hash = ContentHash::of(b"hello");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentHash::from_hex(&hex), Some(hash));
        assert!(ContentHash::from_hex("zz").is_none());
        assert_ne!(hash, ContentHash::of(b"hello!"));
    }

    #[test]
    fn memory_repository_groups_fragments() {
        let repo = MemoryRepository::new();
        repo.put_record("blog.tag", "rust", "{}");
        repo.put_record("blog.tag", "go", "{}");
        repo.put_auxiliary("blog.tag", "rust", "body.md", "# Rust");
        repo.put_record("blog.article", "hello", "{}");

        let collections = repo.collections(&tag_info()).unwrap();
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].code_name, "go");
        assert_eq!(collections[1].code_name, "rust");
        let body = collections[1].auxiliary_for("body").unwrap();
        assert_eq!(repo.read(body).unwrap(), "# Rust");

        repo.remove_record("blog.tag", "rust");
        assert_eq!(repo.collections(&tag_info()).unwrap().len(), 1);
    }

    #[test]
    fn memory_repository_hash_does_not_count_as_read() {
        let repo = MemoryRepository::new();
        repo.put_record("blog.tag", "rust", "{}");
        let loc = RepositoryLocation::new("blog.tag", main_key("blog.tag", "rust"));
        repo.hash(&loc).unwrap();
        assert_eq!(repo.read_count(), 0);
        repo.read(&loc).unwrap();
        assert_eq!(repo.read_count(), 1);
    }

    #[test]
    fn fs_repository_layout() {
        let dir = TempDir::new().unwrap();
        let type_dir = dir.path().join("blog.tag");
        std::fs::create_dir_all(type_dir.join("rust")).unwrap();
        std::fs::write(type_dir.join("rust.json"), r#"{"blog.tag": {}}"#).unwrap();
        std::fs::write(type_dir.join("rust").join("body.md"), "# Rust").unwrap();
        std::fs::write(type_dir.join("notes.txt"), "ignored").unwrap();

        let repo = FsRepository::new(dir.path());
        let collections = repo.collections(&tag_info()).unwrap();
        assert_eq!(collections.len(), 1);
        let collection = &collections[0];
        assert_eq!(collection.code_name, "rust");
        assert_eq!(collection.main.key, "blog.tag/rust.json");
        assert!(repo.exists(&collection.main));
        assert_eq!(
            repo.read(collection.auxiliary_for("body").unwrap()).unwrap(),
            "# Rust"
        );

        let missing = RepositoryLocation::new("blog.tag", "blog.tag/go.json");
        assert!(!repo.exists(&missing));
        assert!(matches!(repo.read(&missing), Err(SyncError::Repository { .. })));

        let escaping = RepositoryLocation::new("blog.tag", "../secret");
        assert!(repo.read(&escaping).is_err());
        assert!(repo
            .collections(&TypeInfo::new("blog.none"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn caching_repository_bounds_and_evicts() {
        let repo = MemoryRepository::new();
        for code in ["a", "b", "c"] {
            repo.put_record("blog.tag", code, format!("{{\"{code}\": 1}}"));
        }
        let cache = CachingRepository::new(repo, 2);
        let loc = |code: &str| RepositoryLocation::new("blog.tag", main_key("blog.tag", code));

        cache.hash(&loc("a")).unwrap();
        cache.read(&loc("a")).unwrap();
        assert_eq!(cache.inner().read_count(), 1);

        cache.read(&loc("b")).unwrap();
        cache.read(&loc("c")).unwrap();
        assert_eq!(cache.cached(), 2);

        cache.evict(&loc("c"));
        assert_eq!(cache.cached(), 1);
    }
}
