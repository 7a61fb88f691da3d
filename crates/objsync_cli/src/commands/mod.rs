//! CLI command implementations.

pub mod hashes;
pub mod plan_delete;
pub mod restore;

use objsync_engine::{MemoryStore, StoreSnapshot};
use objsync_model::{SchemaError, SchemaRegistry, TypeInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors loading or saving the files commands work on.
#[derive(Debug, Error)]
pub enum CliError {
    /// A file could not be read or written.
    #[error("cannot access {path:?}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A file is not valid JSON of the expected shape.
    #[error("invalid content in {path:?}: {source}")]
    Json {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The schema is inconsistent.
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    /// No object with this code name exists.
    #[error("no {object_type} named '{code_name}' in the store")]
    UnknownObject {
        /// Object type.
        object_type: String,
        /// Code name.
        code_name: String,
    },
}

/// Loads and validates the type definitions in `path`.
pub fn load_schema(path: &Path) -> Result<Arc<SchemaRegistry>, CliError> {
    let types: Vec<TypeInfo> = read_json(path)?;
    Ok(Arc::new(SchemaRegistry::new(types)?))
}

/// Loads a store snapshot, or an empty store if `path` does not exist.
pub fn load_store(registry: Arc<SchemaRegistry>, path: &Path) -> Result<MemoryStore, CliError> {
    if !path.exists() {
        return Ok(MemoryStore::new(registry));
    }
    let snapshot: StoreSnapshot = read_json(path)?;
    Ok(MemoryStore::from_snapshot(registry, snapshot))
}

/// Writes a store snapshot.
pub fn save_store(store: &MemoryStore, path: &Path) -> Result<(), CliError> {
    let content = serde_json::to_string_pretty(&store.snapshot()).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(|source| CliError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_engine::{TargetStore, WriteOp};
    use objsync_model::Row;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"[
        {"object_type": "blog.tag", "code_name_column": "code_name"},
        {"object_type": "blog.article", "code_name_column": "code_name",
         "depends_on": [{"dependent_type": "blog.article", "dependency_column": "tag_id",
                         "dependency_type": "blog.tag", "integrity": "not_required"}]}
    ]"#;

    #[test]
    fn schema_and_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let schema_path = dir.path().join("schema.json");
        std::fs::write(&schema_path, SCHEMA).unwrap();
        let registry = load_schema(&schema_path).unwrap();
        assert!(registry.contains("blog.article"));

        let store_path = dir.path().join("store.json");
        let mut store = load_store(registry.clone(), &store_path).unwrap();
        let mut row = Row::new();
        row.insert("code_name".into(), "rust".into());
        store
            .apply(vec![WriteOp::Insert {
                object_type: "blog.tag".into(),
                row,
            }])
            .unwrap();
        save_store(&store, &store_path).unwrap();

        let reloaded = load_store(registry, &store_path).unwrap();
        assert_eq!(reloaded.snapshot(), store.snapshot());
    }

    #[test]
    fn invalid_schema_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(load_schema(&path), Err(CliError::Json { .. })));

        std::fs::write(
            &path,
            r#"[{"object_type": "a.b", "code_name_column": "code_name", "depends_on": [
                {"dependent_type": "a.b", "dependency_column": "x_id",
                 "dependency_type": "a.missing", "integrity": "required"}]}]"#,
        )
        .unwrap();
        assert!(matches!(load_schema(&path), Err(CliError::Schema(_))));
        assert!(matches!(
            load_schema(&dir.path().join("none.json")),
            Err(CliError::Io { .. })
        ));
    }
}
