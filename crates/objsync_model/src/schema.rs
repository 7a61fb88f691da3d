//! Object type metadata.
//!
//! A [`TypeInfo`] describes one object type: its identity, code name,
//! parent/site/path columns and the foreign keys it carries. Foreign keys are
//! declared on the type that owns the column (the *dependent* type) and point
//! at the *dependency* type.

use serde::{Deserialize, Serialize};

/// Classification of a foreign-key relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrity {
    /// Dependent rows are deleted together with the dependency.
    Required,
    /// Dependent rows are re-pointed at the dependency type's default object.
    RequiredHasDefault,
    /// Dependent column is set to null when the dependency goes away.
    NotRequired,
    /// Association row; deleted together with either side.
    Binding,
}

impl Integrity {
    /// Returns true when removing the dependency deletes the dependent row.
    pub fn cascades_delete(&self) -> bool {
        matches!(self, Integrity::Required | Integrity::Binding)
    }

    /// Returns true when an unresolved reference may be left unset on commit.
    pub fn allows_unset(&self) -> bool {
        matches!(self, Integrity::NotRequired)
    }
}

/// A static foreign key: `dependent_type.dependency_column -> dependency_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyReference {
    /// Type owning the foreign-key column.
    pub dependent_type: String,
    /// Referenced type.
    pub dependency_type: String,
    /// Foreign-key column on the dependent type.
    pub dependency_column: String,
    /// Relationship kind.
    pub integrity: Integrity,
}

impl DependencyReference {
    /// Creates a new reference.
    pub fn new(
        dependent_type: impl Into<String>,
        dependency_type: impl Into<String>,
        dependency_column: impl Into<String>,
        integrity: Integrity,
    ) -> Self {
        Self {
            dependent_type: dependent_type.into(),
            dependency_type: dependency_type.into(),
            dependency_column: dependency_column.into(),
            integrity,
        }
    }
}

/// A polymorphic foreign key.
///
/// The dependent row stores the referenced type name in `type_column` and the
/// referenced object in `dependency_column`. The concrete
/// [`DependencyReference`] is only known at traversal time, see
/// [`DynamicDependencyReference::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DynamicDependencyReference {
    /// Type owning the foreign-key column.
    pub dependent_type: String,
    /// Foreign-key column on the dependent type.
    pub dependency_column: String,
    /// Column holding the referenced type name.
    pub type_column: String,
    /// Relationship kind.
    pub integrity: Integrity,
}

impl DynamicDependencyReference {
    /// Creates a new dynamic reference.
    pub fn new(
        dependent_type: impl Into<String>,
        dependency_column: impl Into<String>,
        type_column: impl Into<String>,
        integrity: Integrity,
    ) -> Self {
        Self {
            dependent_type: dependent_type.into(),
            dependency_column: dependency_column.into(),
            type_column: type_column.into(),
            integrity,
        }
    }

    /// Produces the static reference for one concrete referenced type.
    pub fn resolve(&self, concrete_type: &str) -> DependencyReference {
        DependencyReference::new(
            self.dependent_type.clone(),
            concrete_type,
            self.dependency_column.clone(),
            self.integrity,
        )
    }
}

/// A column that points at another type (parent or site).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnReference {
    /// Column name.
    pub column: String,
    /// Referenced type.
    pub object_type: String,
}

impl ColumnReference {
    /// Creates a new column reference.
    pub fn new(column: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            object_type: object_type.into(),
        }
    }
}

/// Reasons a type must be removed object-by-object instead of in bulk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiRequirements {
    /// The type runs custom code when deleted.
    pub custom_delete: bool,
    /// Columns whose content lives outside the store.
    pub external_binary_columns: Vec<String>,
    /// Event handlers are registered for this type.
    pub has_event_handlers: bool,
}

impl ApiRequirements {
    /// Returns true if any API-level side effect is required.
    pub fn any(&self) -> bool {
        self.custom_delete || self.has_event_handlers || !self.external_binary_columns.is_empty()
    }
}

fn default_id_column() -> String {
    "id".to_string()
}

/// Metadata for one object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Type name, e.g. `cms.user`.
    pub object_type: String,
    /// Identity column.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Code name column. Absent for binding types.
    #[serde(default)]
    pub code_name_column: Option<String>,
    /// Column holding a globally unique identifier, assigned on insert.
    #[serde(default)]
    pub guid_column: Option<String>,
    /// Parent reference.
    #[serde(default)]
    pub parent: Option<ColumnReference>,
    /// Site reference.
    #[serde(default)]
    pub site: Option<ColumnReference>,
    /// Hierarchical path column (`/a/b/c`).
    #[serde(default)]
    pub path_column: Option<String>,
    /// Composite type this type is a constituent of.
    #[serde(default)]
    pub composite_type: Option<String>,
    /// Outgoing static foreign keys.
    #[serde(default)]
    pub depends_on: Vec<DependencyReference>,
    /// Outgoing polymorphic foreign keys.
    #[serde(default)]
    pub dynamic_depends_on: Vec<DynamicDependencyReference>,
    /// Fields stored in auxiliary fragments.
    #[serde(default)]
    pub structured_fields: Vec<String>,
    /// Whether this is a binding (association) type.
    #[serde(default)]
    pub is_binding: bool,
    /// Code name of the designated default object.
    #[serde(default)]
    pub default_code_name: Option<String>,
    /// API-level deletion requirements.
    #[serde(default)]
    pub api: ApiRequirements,
}

impl TypeInfo {
    /// Creates metadata for a plain type with `id` and `code_name` columns.
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            id_column: default_id_column(),
            code_name_column: Some("code_name".to_string()),
            guid_column: None,
            parent: None,
            site: None,
            path_column: None,
            composite_type: None,
            depends_on: Vec::new(),
            dynamic_depends_on: Vec::new(),
            structured_fields: Vec::new(),
            is_binding: false,
            default_code_name: None,
            api: ApiRequirements::default(),
        }
    }

    /// Creates metadata for a binding type whose rows belong to `parent`.
    pub fn binding(
        object_type: impl Into<String>,
        parent_column: impl Into<String>,
        parent_type: impl Into<String>,
    ) -> Self {
        let mut info = Self::new(object_type);
        info.code_name_column = None;
        info.is_binding = true;
        info.parent = Some(ColumnReference::new(parent_column, parent_type));
        info
    }

    /// Adds a static foreign key.
    pub fn with_reference(
        mut self,
        column: impl Into<String>,
        dependency_type: impl Into<String>,
        integrity: Integrity,
    ) -> Self {
        let reference = DependencyReference::new(
            self.object_type.clone(),
            dependency_type,
            column,
            integrity,
        );
        self.depends_on.push(reference);
        self
    }

    /// Adds a polymorphic foreign key.
    pub fn with_dynamic_reference(
        mut self,
        column: impl Into<String>,
        type_column: impl Into<String>,
        integrity: Integrity,
    ) -> Self {
        let reference = DynamicDependencyReference::new(
            self.object_type.clone(),
            column,
            type_column,
            integrity,
        );
        self.dynamic_depends_on.push(reference);
        self
    }

    /// Sets the parent reference.
    pub fn with_parent(
        mut self,
        column: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        self.parent = Some(ColumnReference::new(column, object_type));
        self
    }

    /// Sets the site reference.
    pub fn with_site(mut self, column: impl Into<String>, object_type: impl Into<String>) -> Self {
        self.site = Some(ColumnReference::new(column, object_type));
        self
    }

    /// Sets the hierarchical path column.
    pub fn with_path_column(mut self, column: impl Into<String>) -> Self {
        self.path_column = Some(column.into());
        self
    }

    /// Sets the GUID column.
    pub fn with_guid_column(mut self, column: impl Into<String>) -> Self {
        self.guid_column = Some(column.into());
        self
    }

    /// Sets the composite type.
    pub fn with_composite_type(mut self, composite: impl Into<String>) -> Self {
        self.composite_type = Some(composite.into());
        self
    }

    /// Declares a field stored in an auxiliary fragment.
    pub fn with_structured_field(mut self, field: impl Into<String>) -> Self {
        self.structured_fields.push(field.into());
        self
    }

    /// Sets the default object code name.
    pub fn with_default_object(mut self, code_name: impl Into<String>) -> Self {
        self.default_code_name = Some(code_name.into());
        self
    }

    /// Sets the API-level deletion requirements.
    pub fn with_api(mut self, api: ApiRequirements) -> Self {
        self.api = api;
        self
    }

    /// All outgoing static references, parent and site included.
    ///
    /// Parent and site columns behave as required references.
    pub fn all_references(&self) -> Vec<DependencyReference> {
        let mut refs = Vec::with_capacity(self.depends_on.len() + 2);
        for column_ref in self.parent.iter().chain(self.site.iter()) {
            refs.push(DependencyReference::new(
                self.object_type.clone(),
                column_ref.object_type.clone(),
                column_ref.column.clone(),
                if self.is_binding {
                    Integrity::Binding
                } else {
                    Integrity::Required
                },
            ));
        }
        refs.extend(self.depends_on.iter().cloned());
        refs
    }

    /// Returns the reference declared for `column`, if it is a foreign key.
    pub fn reference_for_column(&self, column: &str) -> Option<DependencyReference> {
        self.all_references()
            .into_iter()
            .find(|r| r.dependency_column == column)
    }

    /// Returns the dynamic reference declared for `column`.
    pub fn dynamic_reference_for_column(
        &self,
        column: &str,
    ) -> Option<&DynamicDependencyReference> {
        self.dynamic_depends_on
            .iter()
            .find(|r| r.dependency_column == column)
    }

    /// Whether removal must go object-by-object.
    pub fn requires_api_deletion(&self) -> bool {
        self.api.any()
    }

    /// Whether the type is hierarchical.
    pub fn is_hierarchical(&self) -> bool {
        self.path_column.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_site_are_required_references() {
        let info = TypeInfo::new("cms.page")
            .with_parent("parent_id", "cms.page")
            .with_site("site_id", "cms.site")
            .with_reference("template_id", "cms.template", Integrity::NotRequired);

        let refs = info.all_references();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].integrity, Integrity::Required);
        assert_eq!(refs[1].dependency_type, "cms.site");
        assert_eq!(
            info.reference_for_column("template_id").unwrap().integrity,
            Integrity::NotRequired
        );
        assert!(info.reference_for_column("name").is_none());
    }

    #[test]
    fn binding_parent_uses_binding_integrity() {
        let info = TypeInfo::binding("cms.userrole", "user_id", "cms.user")
            .with_reference("role_id", "cms.role", Integrity::Binding);
        assert!(info.is_binding);
        assert!(info.code_name_column.is_none());
        assert!(info
            .all_references()
            .iter()
            .all(|r| r.integrity == Integrity::Binding));
    }

    #[test]
    fn api_requirements() {
        assert!(!TypeInfo::new("a").requires_api_deletion());
        let info = TypeInfo::new("media.file").with_api(ApiRequirements {
            external_binary_columns: vec!["binary".into()],
            ..Default::default()
        });
        assert!(info.requires_api_deletion());
    }

    #[test]
    fn dynamic_reference_resolves_per_type() {
        let dynamic = DynamicDependencyReference::new(
            "cms.comment",
            "target_id",
            "target_type",
            Integrity::Required,
        );
        let resolved = dynamic.resolve("cms.article");
        assert_eq!(resolved.dependency_type, "cms.article");
        assert_eq!(resolved.dependency_column, "target_id");
    }

    #[test]
    fn type_info_from_json_uses_defaults() {
        let info: TypeInfo = serde_json::from_str(
            r#"{"object_type": "cms.tag", "code_name_column": "code_name",
                "depends_on": [{"dependent_type": "cms.tag", "dependency_type": "cms.group",
                                "dependency_column": "group_id", "integrity": "not_required"}]}"#,
        )
        .unwrap();
        assert_eq!(info.id_column, "id");
        assert_eq!(info.depends_on[0].integrity, Integrity::NotRequired);
        assert!(!info.is_binding);
    }
}
