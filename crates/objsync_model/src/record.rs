//! Typed records and deserialization results.

use crate::schema::{DependencyReference, Integrity, TypeInfo};
use crate::value::{ObjectId, Row, Value};
use std::fmt;
use std::sync::Arc;

/// A record of a known object type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    info: Arc<TypeInfo>,
    fields: Row,
}

impl TypedRecord {
    /// Creates an empty record.
    pub fn new(info: Arc<TypeInfo>) -> Self {
        Self {
            info,
            fields: Row::new(),
        }
    }

    /// Creates a record from an existing row.
    pub fn from_row(info: Arc<TypeInfo>, fields: Row) -> Self {
        Self { info, fields }
    }

    /// Type metadata.
    pub fn info(&self) -> &Arc<TypeInfo> {
        &self.info
    }

    /// Type name.
    pub fn object_type(&self) -> &str {
        &self.info.object_type
    }

    /// Reads a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// Writes a column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(column.into(), value.into());
    }

    /// Sets a column to null.
    pub fn unset(&mut self, column: &str) {
        self.fields.insert(column.to_string(), Value::Null);
    }

    /// All columns.
    pub fn fields(&self) -> &Row {
        &self.fields
    }

    /// Consumes the record into its row.
    pub fn into_row(self) -> Row {
        self.fields
    }

    /// Identity column value.
    pub fn id(&self) -> Option<ObjectId> {
        self.get(&self.info.id_column).and_then(Value::as_object_id)
    }

    /// Sets the identity column.
    pub fn set_id(&mut self, id: ObjectId) {
        let column = self.info.id_column.clone();
        self.set(column, id);
    }

    /// Code name, if the type has one and it is set.
    pub fn code_name(&self) -> Option<&str> {
        let column = self.info.code_name_column.as_deref()?;
        self.get(column).and_then(Value::as_text)
    }

    /// Parent identifier.
    pub fn parent_id(&self) -> Option<ObjectId> {
        let parent = self.info.parent.as_ref()?;
        self.get(&parent.column).and_then(Value::as_object_id)
    }

    /// Site identifier.
    pub fn site_id(&self) -> Option<ObjectId> {
        let site = self.info.site.as_ref()?;
        self.get(&site.column).and_then(Value::as_object_id)
    }

    /// Hierarchical path.
    pub fn path(&self) -> Option<&str> {
        let column = self.info.path_column.as_deref()?;
        self.get(column).and_then(Value::as_text)
    }

    /// Outgoing references of this record's type.
    pub fn depends_on(&self) -> Vec<DependencyReference> {
        self.info.all_references()
    }

    /// Human readable identity used in logs and progress messages.
    pub fn identity(&self) -> String {
        if let Some(code) = self.code_name() {
            return code.to_string();
        }
        let mut parts: Vec<String> = self
            .info
            .all_references()
            .iter()
            .filter_map(|r| {
                self.get(&r.dependency_column)
                    .filter(|v| !v.is_null())
                    .map(|v| format!("{}={}", r.dependency_column, v))
            })
            .collect();
        if parts.is_empty() {
            if let Some(id) = self.id() {
                parts.push(format!("#{id}"));
            }
        }
        parts.join(",")
    }
}

/// A foreign key whose referenced code name could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailedMapping {
    /// Foreign-key column.
    pub field: String,
    /// Referenced type.
    pub referenced_type: String,
    /// Referenced code name.
    pub referenced_code_name: String,
    /// Integrity of the failed column.
    pub integrity: Integrity,
}

impl fmt::Display for FailedMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} '{}'",
            self.field, self.referenced_type, self.referenced_code_name
        )
    }
}

/// Outcome of deserializing one logical record.
///
/// The record is usable even when invalid: failed fields are left unset and
/// failed mappings can be re-attempted later.
#[derive(Debug, Clone, PartialEq)]
pub struct DeserializationResult {
    /// The (possibly incomplete) record.
    pub record: TypedRecord,
    /// Fields that could not be read.
    pub failed_fields: Vec<String>,
    /// Foreign keys that could not be resolved.
    pub failed_mappings: Vec<FailedMapping>,
    /// Integrity of failed fields that are foreign-key columns.
    pub failed_reference_fields: Vec<(String, Integrity)>,
}

impl DeserializationResult {
    /// Wraps a record with no failures.
    pub fn new(record: TypedRecord) -> Self {
        Self {
            record,
            failed_fields: Vec::new(),
            failed_mappings: Vec::new(),
            failed_reference_fields: Vec::new(),
        }
    }

    /// True when nothing failed.
    pub fn is_valid(&self) -> bool {
        self.failed_fields.is_empty() && self.failed_mappings.is_empty()
    }

    /// Marks a field as failed.
    pub fn fail_field(&mut self, field: impl Into<String>) {
        let field = field.into();
        if !self.failed_fields.contains(&field) {
            self.failed_fields.push(field);
        }
    }

    /// Marks a foreign-key column as unreadable.
    ///
    /// The value cannot name a target, so retrying will not help; the
    /// column's integrity still decides whether it may be left unset.
    pub fn fail_reference_field(&mut self, field: impl Into<String>, integrity: Integrity) {
        let field = field.into();
        self.record.unset(&field);
        if !self.failed_reference_fields.iter().any(|(f, _)| f == &field) {
            self.failed_reference_fields.push((field.clone(), integrity));
        }
        self.fail_field(field);
    }

    /// Records an unresolved reference.
    pub fn fail_mapping(&mut self, mapping: FailedMapping) {
        self.record.unset(&mapping.field);
        if !self.failed_mappings.iter().any(|m| m.field == mapping.field) {
            self.failed_mappings.push(mapping);
        }
    }

    /// Merges failed fields reported by another step.
    pub fn merge_failed_fields(&mut self, fields: impl IntoIterator<Item = String>) {
        for field in fields {
            self.fail_field(field);
        }
    }

    /// True when every failed foreign key may be left unset.
    ///
    /// Covers unresolved mappings as well as reference columns whose value
    /// could not be read.
    pub fn only_optional_mappings_failed(&self) -> bool {
        self.failed_mappings.iter().all(|m| m.integrity.allows_unset())
            && self
                .failed_reference_fields
                .iter()
                .all(|(_, integrity)| integrity.allows_unset())
    }

    /// Short description of every failure.
    pub fn failure_summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.failed_fields.is_empty() {
            parts.push(format!("failed fields: {}", self.failed_fields.join(", ")));
        }
        if !self.failed_mappings.is_empty() {
            let mappings: Vec<String> =
                self.failed_mappings.iter().map(ToString::to_string).collect();
            parts.push(format!("unresolved references: {}", mappings.join(", ")));
        }
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> Arc<TypeInfo> {
        Arc::new(
            TypeInfo::new("blog.article")
                .with_reference("tag_id", "blog.tag", Integrity::NotRequired)
                .with_reference("author_id", "blog.author", Integrity::Required),
        )
    }

    fn mapping(field: &str, integrity: Integrity) -> FailedMapping {
        FailedMapping {
            field: field.into(),
            referenced_type: "blog.tag".into(),
            referenced_code_name: "rust".into(),
            integrity,
        }
    }

    #[test]
    fn validity_tracks_failures() {
        let mut result = DeserializationResult::new(TypedRecord::new(article()));
        assert!(result.is_valid());

        result.fail_mapping(mapping("tag_id", Integrity::NotRequired));
        assert!(!result.is_valid());
        assert!(result.only_optional_mappings_failed());

        result.fail_mapping(mapping("author_id", Integrity::Required));
        assert!(!result.only_optional_mappings_failed());
        assert_eq!(result.failed_mappings.len(), 2);
    }

    #[test]
    fn unreadable_reference_field_keeps_integrity() {
        let mut record = TypedRecord::new(article());
        record.set("author_id", 5);
        let mut result = DeserializationResult::new(record);
        result.fail_reference_field("tag_id", Integrity::NotRequired);
        assert!(result.only_optional_mappings_failed());
        assert_eq!(result.failed_fields, vec!["tag_id".to_string()]);

        result.fail_reference_field("author_id", Integrity::Required);
        assert!(!result.is_valid());
        assert!(!result.only_optional_mappings_failed());
        assert!(result.record.get("author_id").unwrap().is_null());
    }

    #[test]
    fn failed_mapping_clears_column() {
        let mut record = TypedRecord::new(article());
        record.set("tag_id", 5);
        let mut result = DeserializationResult::new(record);
        result.fail_mapping(mapping("tag_id", Integrity::NotRequired));
        assert!(result.record.get("tag_id").unwrap().is_null());
    }

    #[test]
    fn identity_prefers_code_name() {
        let mut record = TypedRecord::new(article());
        record.set_id(9);
        assert_eq!(record.identity(), "#9");
        record.set("code_name", "hello");
        assert_eq!(record.identity(), "hello");
        assert_eq!(record.id(), Some(9));
    }

    #[test]
    fn binding_identity_lists_references() {
        let info = Arc::new(
            TypeInfo::binding("cms.userrole", "user_id", "cms.user")
                .with_reference("role_id", "cms.role", Integrity::Binding),
        );
        let mut record = TypedRecord::new(info);
        record.set("user_id", 1);
        record.set("role_id", 2);
        assert_eq!(record.identity(), "user_id=1,role_id=2");
        assert_eq!(record.parent_id(), Some(1));
    }
}
