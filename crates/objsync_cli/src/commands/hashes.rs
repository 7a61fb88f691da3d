//! Hashes command implementation.

use super::load_schema;
use objsync_engine::{FileHashStore, HashStore};
use std::path::Path;

/// Runs the hashes command.
///
/// Lists recorded fragments per type. With `forget`, the listed entries are
/// dropped so the next restore treats those records as changed.
pub fn run(
    schema: &Path,
    hashes_path: &Path,
    types: &[String],
    forget: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_schema(schema)?;
    for object_type in types {
        registry.require(object_type)?;
    }
    let mut hashes = FileHashStore::open(hashes_path)?;

    let selected: Vec<String> = registry
        .types()
        .map(|info| info.object_type.clone())
        .filter(|t| types.is_empty() || types.contains(t))
        .collect();

    println!("Hash table {:?}: {} entries", hashes.path(), hashes.len());
    let mut forgotten = 0;
    for object_type in &selected {
        let locations = hashes.locations(object_type);
        if locations.is_empty() {
            continue;
        }
        println!();
        println!("{} ({} fragments)", object_type, locations.len());
        for location in &locations {
            let hex = hashes.get(location).map(|h| h.to_hex()).unwrap_or_default();
            println!("  {}  {}", &hex[..hex.len().min(12)], location.key);
        }
        if forget {
            for location in &locations {
                hashes.remove(location);
                forgotten += 1;
            }
        }
    }

    if forget {
        hashes.flush()?;
        println!();
        println!("Forgot {} entries", forgotten);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_engine::ContentHash;
    use objsync_model::RepositoryLocation;
    use tempfile::TempDir;

    #[test]
    fn forget_drops_selected_types() {
        let dir = TempDir::new().unwrap();
        let schema = dir.path().join("schema.json");
        std::fs::write(
            &schema,
            r#"[{"object_type": "blog.tag", "code_name_column": "code_name"},
                {"object_type": "blog.author", "code_name_column": "code_name"}]"#,
        )
        .unwrap();
        let path = dir.path().join("hashes.json");
        {
            let mut hashes = FileHashStore::open(&path).unwrap();
            hashes.set(
                &RepositoryLocation::new("blog.tag", "blog.tag/rust.json"),
                ContentHash::of(b"{}"),
            );
            hashes.set(
                &RepositoryLocation::new("blog.author", "blog.author/ann.json"),
                ContentHash::of(b"{}"),
            );
            hashes.flush().unwrap();
        }

        run(&schema, &path, &["blog.tag".to_string()], true).unwrap();

        let hashes = FileHashStore::open(&path).unwrap();
        assert!(hashes.locations("blog.tag").is_empty());
        assert_eq!(hashes.locations("blog.author").len(), 1);
    }
}
