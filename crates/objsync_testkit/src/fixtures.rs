//! Test fixtures: sample schemas, fragment builders and job helpers.

use objsync_engine::{
    main_key, auxiliary_key, FsRepository, MemoryHashStore, MemoryRepository, MemoryStore,
    RestoreJob, SyncConfig, TargetStore, WriteOp,
};
use objsync_model::{Integrity, ObjectId, Row, SchemaRegistry, TypeInfo, Value};
use serde_json::{Map, Value as Json};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A job over in-memory repository, store and hash store.
pub type MemoryJob = RestoreJob<MemoryRepository, MemoryStore, MemoryHashStore>;

/// Authors, tags, articles, article/tag bindings and comments.
///
/// `blog.article.author_id` is required, `blog.article.tag_id` is optional.
pub fn blog_schema() -> Vec<TypeInfo> {
    vec![
        TypeInfo::new("blog.author"),
        TypeInfo::new("blog.tag"),
        TypeInfo::new("blog.article")
            .with_reference("author_id", "blog.author", Integrity::Required)
            .with_reference("tag_id", "blog.tag", Integrity::NotRequired),
        TypeInfo::binding("blog.article_tag", "article_id", "blog.article")
            .with_reference("tag_id", "blog.tag", Integrity::Binding),
        TypeInfo::new("blog.comment")
            .with_reference("article_id", "blog.article", Integrity::Required),
    ]
}

/// A hierarchical `fs.node` type with required `fs.attachment` dependents.
pub fn node_schema() -> Vec<TypeInfo> {
    vec![
        TypeInfo::new("fs.node")
            .with_parent("parent_id", "fs.node")
            .with_path_column("path"),
        TypeInfo::new("fs.attachment").with_reference("node_id", "fs.node", Integrity::Required),
    ]
}

/// Templates with a `blank` default object and pages falling back to it.
pub fn template_schema() -> Vec<TypeInfo> {
    vec![
        TypeInfo::new("cms.template").with_default_object("blank"),
        TypeInfo::new("cms.page")
            .with_reference("template_id", "cms.template", Integrity::RequiredHasDefault),
    ]
}

/// A single `chain.link` type whose `next_id` points at another link.
pub fn chain_schema() -> Vec<TypeInfo> {
    vec![TypeInfo::new("chain.link").with_reference("next_id", "chain.link", Integrity::Required)]
}

/// Builds a validated registry.
pub fn registry(types: Vec<TypeInfo>) -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::new(types).expect("Invalid fixture schema"))
}

/// Creates an in-memory job with default configuration.
pub fn memory_job(types: Vec<TypeInfo>) -> MemoryJob {
    memory_job_with(types, SyncConfig::default())
}

/// Creates an in-memory job.
pub fn memory_job_with(types: Vec<TypeInfo>, config: SyncConfig) -> MemoryJob {
    let registry = registry(types);
    RestoreJob::new(
        registry.clone(),
        MemoryRepository::new(),
        MemoryStore::new(registry),
        MemoryHashStore::new(),
        config,
    )
}

/// Main fragment for one record.
pub fn record_json(object_type: &str, fields: &[(&str, Json)]) -> String {
    let body: Map<String, Json> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    labelled(object_type, Json::Object(body))
}

/// Main fragment for a binding group.
pub fn binding_json(object_type: &str, rows: &[&[(&str, Json)]]) -> String {
    let rows: Vec<Json> = rows
        .iter()
        .map(|fields| {
            Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            )
        })
        .collect();
    labelled(object_type, Json::Array(rows))
}

fn labelled(object_type: &str, body: Json) -> String {
    let mut root = Map::new();
    root.insert(object_type.to_string(), body);
    Json::Object(root).to_string()
}

/// Stores a chain of links in `repo`.
///
/// `order[k]` names the k-th link of the chain (`link-<order[k]>`); every
/// link points at the next one and the last points nowhere. The repository
/// presents links in code name order, so the permutation decides how many
/// links are forward references.
pub fn put_chain(repo: &MemoryRepository, order: &[usize]) {
    for (k, index) in order.iter().enumerate() {
        let next = order
            .get(k + 1)
            .map(|n| Json::String(link_code(*n)))
            .unwrap_or(Json::Null);
        repo.put_record(
            "chain.link",
            &link_code(*index),
            record_json("chain.link", &[("next_id", next)]),
        );
    }
}

/// Code name of the chain link with the given index.
pub fn link_code(index: usize) -> String {
    format!("link-{index:03}")
}

/// Inserts one row directly into a store.
pub fn insert_row<S: TargetStore>(store: &mut S, object_type: &str, pairs: &[(&str, Value)]) -> ObjectId {
    let row: Row = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    store
        .apply(vec![WriteOp::Insert {
            object_type: object_type.to_string(),
            row,
        }])
        .expect("Failed to insert fixture row")
        .ids[0]
}

/// A repository directory that is removed on drop.
pub struct TempRepository {
    dir: TempDir,
}

impl TempRepository {
    /// Creates an empty repository directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a main fragment.
    pub fn write_record(&self, object_type: &str, code_name: &str, content: &str) {
        self.write(&main_key(object_type, code_name), content);
    }

    /// Writes an auxiliary fragment.
    pub fn write_auxiliary(&self, object_type: &str, code_name: &str, file_name: &str, content: &str) {
        self.write(&auxiliary_key(object_type, code_name, file_name), content);
    }

    /// Removes a main fragment and its auxiliary directory.
    pub fn remove_record(&self, object_type: &str, code_name: &str) {
        let main = self.root().join(main_key(object_type, code_name));
        std::fs::remove_file(main).expect("Failed to remove fragment");
        let aux = self.root().join(object_type).join(code_name);
        if aux.is_dir() {
            std::fs::remove_dir_all(aux).expect("Failed to remove auxiliary fragments");
        }
    }

    /// A reader over the directory.
    pub fn reader(&self) -> FsRepository {
        FsRepository::new(self.root())
    }

    fn write(&self, key: &str, content: &str) {
        let path = self.root().join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fragment directory");
        }
        std::fs::write(path, content).expect("Failed to write fragment");
    }
}

impl Default for TempRepository {
    fn default() -> Self {
        Self::new()
    }
}
