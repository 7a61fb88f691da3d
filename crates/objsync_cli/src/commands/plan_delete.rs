//! Plan-delete command implementation.

use super::{load_schema, load_store, CliError};
use objsync_engine::DependencyResolver;
use objsync_model::{RemoveDependencyInfo, Value};
use std::path::Path;

/// Runs the plan-delete command.
pub fn run(
    schema: &Path,
    store_path: &Path,
    object_type: &str,
    code_name: &str,
    delete_all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let instructions = plan(schema, store_path, object_type, code_name, delete_all)?;

    println!("Removing {} '{}' needs {} instructions", object_type, code_name, instructions.len());
    for (i, instruction) in instructions.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, instruction);
    }
    Ok(())
}

fn plan(
    schema: &Path,
    store_path: &Path,
    object_type: &str,
    code_name: &str,
    delete_all: bool,
) -> Result<Vec<RemoveDependencyInfo>, Box<dyn std::error::Error>> {
    let registry = load_schema(schema)?;
    let info = registry.require(object_type)?.clone();
    let store = load_store(registry.clone(), store_path)?;

    let unknown = || CliError::UnknownObject {
        object_type: object_type.to_string(),
        code_name: code_name.to_string(),
    };
    let row = store.find_by_code_name(object_type, code_name).ok_or_else(unknown)?;
    let id = row
        .get(&info.id_column)
        .and_then(Value::as_object_id)
        .ok_or_else(unknown)?;

    let instructions =
        DependencyResolver::new(&registry, &store).remove_dependencies(object_type, id, delete_all)?;
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::save_store;
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
    fn plans_from_store_file() {
        let dir = TempDir::new().unwrap();
        let schema = dir.path().join("schema.json");
        std::fs::write(&schema, SCHEMA).unwrap();
        let store_path = dir.path().join("store.json");
        let mut store = load_store(load_schema(&schema).unwrap(), &store_path).unwrap();
        let mut row = Row::new();
        row.insert("code_name".into(), "rust".into());
        store
            .apply(vec![WriteOp::Insert {
                object_type: "blog.tag".into(),
                row,
            }])
            .unwrap();
        save_store(&store, &store_path).unwrap();

        let instructions = plan(&schema, &store_path, "blog.tag", "rust", false).unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].object_type, "blog.article");
        assert!(!instructions[0].is_delete());

        let deletes = plan(&schema, &store_path, "blog.tag", "rust", true).unwrap();
        assert!(deletes[0].is_delete());

        assert!(plan(&schema, &store_path, "blog.tag", "go", false).is_err());
    }
}
