//! Code name to identifier translation.
//!
//! The resolver caches `(type, code name) -> id` translations in front of the
//! target store. It is passed explicitly through the pipeline and mutated
//! only by the job that owns it.

use crate::error::SyncResult;
use crate::store::TargetStore;
use objsync_model::{
    DeserializationResult, ObjectId, SchemaRegistry, TypeInfo, Value, WhereCondition,
};
use std::collections::HashMap;

/// Translation cache with a reverse index.
#[derive(Debug, Default, Clone)]
pub struct ReferenceResolver {
    forward: HashMap<(String, String), ObjectId>,
    reverse: HashMap<(String, ObjectId), String>,
}

impl ReferenceResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached translations.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Cached id, without consulting the store.
    pub fn cached(&self, object_type: &str, code_name: &str) -> Option<ObjectId> {
        self.forward
            .get(&(object_type.to_string(), code_name.to_string()))
            .copied()
    }

    /// Resolves a code name, falling back to the store on a cache miss.
    ///
    /// Binding types have no code names and never resolve.
    pub fn resolve<S>(
        &mut self,
        store: &S,
        info: &TypeInfo,
        code_name: &str,
    ) -> SyncResult<Option<ObjectId>>
    where
        S: TargetStore + ?Sized,
    {
        if let Some(id) = self.cached(&info.object_type, code_name) {
            return Ok(Some(id));
        }
        let Some(column) = info.code_name_column.as_deref() else {
            return Ok(None);
        };

        let rows = store.query(&info.object_type, &WhereCondition::eq(column, code_name))?;
        let id = rows
            .first()
            .and_then(|row| row.get(&info.id_column))
            .and_then(Value::as_object_id);
        if let Some(id) = id {
            self.register(&info.object_type, code_name, id);
        }
        Ok(id)
    }

    /// Code name of a stored object, falling back to the store.
    pub fn code_name_of<S>(
        &mut self,
        store: &S,
        info: &TypeInfo,
        id: ObjectId,
    ) -> SyncResult<Option<String>>
    where
        S: TargetStore + ?Sized,
    {
        if let Some(code) = self.reverse.get(&(info.object_type.clone(), id)) {
            return Ok(Some(code.clone()));
        }
        let Some(column) = info.code_name_column.as_deref() else {
            return Ok(None);
        };
        let code = store
            .get(info, id)?
            .and_then(|row| row.get(column).and_then(Value::as_text).map(str::to_string));
        if let Some(code) = &code {
            self.register(&info.object_type, code, id);
        }
        Ok(code)
    }

    /// Records a translation, replacing stale ones for the same code name or id.
    pub fn register(&mut self, object_type: &str, code_name: &str, id: ObjectId) {
        let key = (object_type.to_string(), code_name.to_string());
        if let Some(old_id) = self.forward.insert(key, id) {
            if old_id != id {
                self.reverse.remove(&(object_type.to_string(), old_id));
            }
        }
        if let Some(old_code) = self
            .reverse
            .insert((object_type.to_string(), id), code_name.to_string())
        {
            if old_code != code_name {
                self.forward.remove(&(object_type.to_string(), old_code));
            }
        }
    }

    /// Drops the translation of one object.
    pub fn forget(&mut self, object_type: &str, id: ObjectId) {
        if let Some(code) = self.reverse.remove(&(object_type.to_string(), id)) {
            self.forward.remove(&(object_type.to_string(), code));
        }
    }

    /// Drops every translation of a type.
    pub fn invalidate_type(&mut self, object_type: &str) {
        self.forward.retain(|(t, _), _| t != object_type);
        self.reverse.retain(|(t, _), _| t != object_type);
    }

    /// Loads every translation of a type from the store.
    pub fn preload<S>(&mut self, store: &S, info: &TypeInfo) -> SyncResult<usize>
    where
        S: TargetStore + ?Sized,
    {
        let Some(column) = info.code_name_column.as_deref() else {
            return Ok(0);
        };
        let mut loaded = 0;
        for row in store.query(&info.object_type, &WhereCondition::All)? {
            let id = row.get(&info.id_column).and_then(Value::as_object_id);
            let code = row.get(column).and_then(Value::as_text);
            if let (Some(id), Some(code)) = (id, code) {
                self.register(&info.object_type, code, id);
                loaded += 1;
            }
        }
        tracing::debug!("Preloaded {} translations for {}", loaded, info.object_type);
        Ok(loaded)
    }

    /// Re-attempts every failed mapping of `result`.
    ///
    /// Resolved mappings are written into the record and removed from the
    /// failure list. Returns the number resolved.
    pub fn retry<S>(
        &mut self,
        store: &S,
        registry: &SchemaRegistry,
        result: &mut DeserializationResult,
    ) -> SyncResult<usize>
    where
        S: TargetStore + ?Sized,
    {
        let mut resolved = 0;
        let mut remaining = Vec::with_capacity(result.failed_mappings.len());
        for mapping in std::mem::take(&mut result.failed_mappings) {
            let target = registry.require(&mapping.referenced_type)?;
            match self.resolve(store, target, &mapping.referenced_code_name)? {
                Some(id) => {
                    result.record.set(mapping.field.clone(), id);
                    resolved += 1;
                }
                None => remaining.push(mapping),
            }
        }
        result.failed_mappings = remaining;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WriteOp};
    use objsync_model::{FailedMapping, Integrity, Row, TypedRecord};
    use std::sync::Arc;

    fn setup() -> (Arc<SchemaRegistry>, MemoryStore) {
        let registry = Arc::new(
            SchemaRegistry::new(vec![
                TypeInfo::new("blog.tag"),
                TypeInfo::new("blog.article")
                    .with_reference("tag_id", "blog.tag", Integrity::NotRequired),
            ])
            .unwrap(),
        );
        let store = MemoryStore::new(registry.clone());
        (registry, store)
    }

    fn insert_tag(store: &mut MemoryStore, code: &str) -> ObjectId {
        let mut row = Row::new();
        row.insert("code_name".into(), code.into());
        store
            .apply(vec![WriteOp::Insert {
                object_type: "blog.tag".into(),
                row,
            }])
            .unwrap()
            .ids[0]
    }

    #[test]
    fn resolves_from_store_and_caches() {
        let (registry, mut store) = setup();
        let id = insert_tag(&mut store, "rust");
        let tag = registry.require("blog.tag").unwrap();

        let mut resolver = ReferenceResolver::new();
        assert_eq!(resolver.cached("blog.tag", "rust"), None);
        assert_eq!(resolver.resolve(&store, tag, "rust").unwrap(), Some(id));
        assert_eq!(resolver.cached("blog.tag", "rust"), Some(id));
        assert_eq!(resolver.resolve(&store, tag, "go").unwrap(), None);
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn register_replaces_stale_translations() {
        let mut resolver = ReferenceResolver::new();
        resolver.register("cms.page", "home", 1);
        resolver.register("cms.page", "home", 7);
        assert_eq!(resolver.cached("cms.page", "home"), Some(7));
        assert_eq!(resolver.len(), 1);

        resolver.register("cms.page", "start", 7);
        assert_eq!(resolver.cached("cms.page", "home"), None);
        assert_eq!(resolver.cached("cms.page", "start"), Some(7));

        resolver.forget("cms.page", 7);
        assert!(resolver.is_empty());
    }

    #[test]
    fn invalidation_and_preload() {
        let (registry, mut store) = setup();
        insert_tag(&mut store, "rust");
        insert_tag(&mut store, "go");
        let tag = registry.require("blog.tag").unwrap();

        let mut resolver = ReferenceResolver::new();
        assert_eq!(resolver.preload(&store, tag).unwrap(), 2);
        resolver.register("blog.article", "hello", 3);
        resolver.invalidate_type("blog.tag");
        assert_eq!(resolver.len(), 1);
        assert_eq!(resolver.code_name_of(&store, tag, 2).unwrap().as_deref(), Some("go"));
    }

    #[test]
    fn retry_fills_resolved_mappings() {
        let (registry, mut store) = setup();
        let article = registry.require("blog.article").unwrap().clone();
        let mut result = DeserializationResult::new(TypedRecord::new(article));
        result.fail_mapping(FailedMapping {
            field: "tag_id".into(),
            referenced_type: "blog.tag".into(),
            referenced_code_name: "rust".into(),
            integrity: Integrity::NotRequired,
        });

        let mut resolver = ReferenceResolver::new();
        assert_eq!(resolver.retry(&store, &registry, &mut result).unwrap(), 0);
        assert!(!result.is_valid());

        let id = insert_tag(&mut store, "rust");
        assert_eq!(resolver.retry(&store, &registry, &mut result).unwrap(), 1);
        assert!(result.is_valid());
        assert_eq!(result.record.get("tag_id"), Some(&Value::Integer(id)));
    }
}
