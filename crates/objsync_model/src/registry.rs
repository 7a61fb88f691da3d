//! Registry of object types with a reverse dependency index.

use crate::error::{SchemaError, SchemaResult};
use crate::schema::{DependencyReference, DynamicDependencyReference, TypeInfo};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// All known object types.
///
/// Types declare their *outgoing* references. The registry inverts them so
/// that removal code can ask "who depends on type T?".
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, Arc<TypeInfo>>,
    dependents: BTreeMap<String, Vec<DependencyReference>>,
    dynamic: Vec<DynamicDependencyReference>,
}

impl SchemaRegistry {
    /// Builds and validates a registry.
    pub fn new(types: impl IntoIterator<Item = TypeInfo>) -> SchemaResult<Self> {
        let mut map = BTreeMap::new();
        for info in types {
            if map.contains_key(&info.object_type) {
                return Err(SchemaError::DuplicateType(info.object_type));
            }
            map.insert(info.object_type.clone(), Arc::new(info));
        }

        let mut dependents: BTreeMap<String, Vec<DependencyReference>> = BTreeMap::new();
        let mut dynamic = Vec::new();

        for info in map.values() {
            if info.is_binding && info.parent.is_none() {
                return Err(SchemaError::BindingWithoutParent(info.object_type.clone()));
            }
            if !info.is_binding && info.code_name_column.is_none() {
                return Err(SchemaError::MissingCodeName(info.object_type.clone()));
            }

            for reference in info.all_references() {
                if reference.dependent_type != info.object_type {
                    return Err(SchemaError::ReferenceOwnerMismatch {
                        declared_by: info.object_type.clone(),
                        dependent_type: reference.dependent_type,
                        column: reference.dependency_column,
                    });
                }
                if !map.contains_key(&reference.dependency_type) {
                    return Err(SchemaError::UnknownReference {
                        object_type: info.object_type.clone(),
                        column: reference.dependency_column,
                        target: reference.dependency_type,
                    });
                }
                dependents
                    .entry(reference.dependency_type.clone())
                    .or_default()
                    .push(reference);
            }

            for reference in &info.dynamic_depends_on {
                if reference.dependent_type != info.object_type {
                    return Err(SchemaError::ReferenceOwnerMismatch {
                        declared_by: info.object_type.clone(),
                        dependent_type: reference.dependent_type.clone(),
                        column: reference.dependency_column.clone(),
                    });
                }
                dynamic.push(reference.clone());
            }
        }

        Ok(Self {
            types: map,
            dependents,
            dynamic,
        })
    }

    /// Looks up a type.
    pub fn get(&self, object_type: &str) -> Option<&Arc<TypeInfo>> {
        self.types.get(object_type)
    }

    /// Looks up a type, failing if it is unknown.
    pub fn require(&self, object_type: &str) -> SchemaResult<&Arc<TypeInfo>> {
        self.types
            .get(object_type)
            .ok_or_else(|| SchemaError::UnknownType(object_type.to_string()))
    }

    /// Whether the type is registered.
    pub fn contains(&self, object_type: &str) -> bool {
        self.types.contains_key(object_type)
    }

    /// Iterates all types in name order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeInfo>> {
        self.types.values()
    }

    /// Static references whose dependency type is `object_type`.
    pub fn dependents_of(&self, object_type: &str) -> &[DependencyReference] {
        self.dependents
            .get(object_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All polymorphic references in the schema.
    pub fn dynamic_references(&self) -> &[DynamicDependencyReference] {
        &self.dynamic
    }

    /// Type names a polymorphic column may store to point at `object_type`.
    ///
    /// This is the type itself, its composite type, and every type that
    /// names it as composite.
    pub fn concrete_type_names(&self, object_type: &str) -> Vec<String> {
        let mut names = BTreeSet::new();
        names.insert(object_type.to_string());
        if let Some(composite) = self.get(object_type).and_then(|i| i.composite_type.clone()) {
            names.insert(composite);
        }
        for info in self.types.values() {
            if info.composite_type.as_deref() == Some(object_type) {
                names.insert(info.object_type.clone());
            }
        }
        names.into_iter().collect()
    }

    /// Types that start on the recursion stack when removing `object_type`.
    pub fn recursion_seed(&self, object_type: &str) -> Vec<String> {
        let mut seed = vec![object_type.to_string()];
        if let Some(composite) = self.get(object_type).and_then(|i| i.composite_type.clone()) {
            if composite != object_type {
                seed.push(composite);
            }
        }
        seed
    }

    /// Orders types so that dependencies come before their dependents.
    ///
    /// Cycles are broken at the first back edge found while walking types in
    /// name order, so the result is deterministic.
    pub fn restore_order(&self) -> Vec<String> {
        fn visit(
            registry: &SchemaRegistry,
            name: &str,
            on_stack: &mut BTreeSet<String>,
            done: &mut BTreeSet<String>,
            order: &mut Vec<String>,
        ) {
            if done.contains(name) || on_stack.contains(name) {
                return;
            }
            let Some(info) = registry.get(name) else {
                return;
            };
            on_stack.insert(name.to_string());
            for reference in info.all_references() {
                visit(registry, &reference.dependency_type, on_stack, done, order);
            }
            on_stack.remove(name);
            done.insert(name.to_string());
            order.push(name.to_string());
        }

        let mut on_stack = BTreeSet::new();
        let mut done = BTreeSet::new();
        let mut order = Vec::with_capacity(self.types.len());
        for name in self.types.keys() {
            visit(self, name, &mut on_stack, &mut done, &mut order);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Integrity;

    fn blog_schema() -> SchemaRegistry {
        SchemaRegistry::new(vec![
            TypeInfo::new("blog.tag"),
            TypeInfo::new("blog.author"),
            TypeInfo::new("blog.article")
                .with_reference("tag_id", "blog.tag", Integrity::NotRequired)
                .with_reference("author_id", "blog.author", Integrity::Required),
            TypeInfo::new("blog.comment")
                .with_dynamic_reference("target_id", "target_type", Integrity::Required),
        ])
        .unwrap()
    }

    #[test]
    fn reverse_index() {
        let registry = blog_schema();
        let deps = registry.dependents_of("blog.tag");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].dependent_type, "blog.article");
        assert!(registry.dependents_of("blog.article").is_empty());
        assert_eq!(registry.dynamic_references().len(), 1);
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let err = SchemaRegistry::new(vec![
            TypeInfo::new("a").with_reference("b_id", "b", Integrity::Required)
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownReference { .. }));
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let err = SchemaRegistry::new(vec![TypeInfo::new("a"), TypeInfo::new("a")]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateType("a".into()));
    }

    #[test]
    fn restore_order_puts_dependencies_first() {
        let registry = blog_schema();
        let order = registry.restore_order();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("blog.tag") < pos("blog.article"));
        assert!(pos("blog.author") < pos("blog.article"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn restore_order_survives_cycles() {
        let registry = SchemaRegistry::new(vec![
            TypeInfo::new("x").with_reference("y_id", "y", Integrity::NotRequired),
            TypeInfo::new("y").with_reference("x_id", "x", Integrity::NotRequired),
            TypeInfo::new("node").with_parent("parent_id", "node"),
        ])
        .unwrap();
        let order = registry.restore_order();
        assert_eq!(order.len(), 3);
        assert_eq!(order.iter().filter(|n| *n == "node").count(), 1);
    }

    #[test]
    fn composite_names() {
        let registry = SchemaRegistry::new(vec![
            TypeInfo::new("cms.document"),
            TypeInfo::new("cms.tree").with_composite_type("cms.document"),
        ])
        .unwrap();
        assert_eq!(
            registry.concrete_type_names("cms.document"),
            vec!["cms.document".to_string(), "cms.tree".to_string()]
        );
        assert_eq!(
            registry.recursion_seed("cms.tree"),
            vec!["cms.tree".to_string(), "cms.document".to_string()]
        );
    }
}
