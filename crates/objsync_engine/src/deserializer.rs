//! Fragment deserialization.
//!
//! A main fragment is a JSON labelled tree whose single root key names the
//! object type:
//!
//! ```text
//! {"blog.article": {"code_name": "hello", "tag_id": "rust"}}
//! {"blog.article_tag": [{"tag_id": "rust"}, {"tag_id": "go"}]}
//! ```
//!
//! Foreign keys carry the referenced object's code name. Binding fragments
//! hold every row of one parent; the parent column may be omitted and
//! defaults to the collection's code name.

use crate::error::{SyncError, SyncResult};
use crate::repository::RepositoryReader;
use crate::resolver::ReferenceResolver;
use crate::store::TargetStore;
use objsync_model::{
    DeserializationResult, FailedMapping, RepositoryLocationsCollection, SchemaRegistry,
    TypeInfo, TypedRecord, Value,
};
use serde_json::{Map, Value as Json};
use std::sync::Arc;

/// Parsed fields of one record, before references are resolved.
pub type FieldTree = Map<String, Json>;

/// Read access to the fragments of the record being deserialized.
pub struct FragmentSource<'a> {
    collection: &'a RepositoryLocationsCollection,
    reader: &'a dyn RepositoryReader,
}

impl<'a> FragmentSource<'a> {
    /// Creates a source over `collection`.
    pub fn new(collection: &'a RepositoryLocationsCollection, reader: &'a dyn RepositoryReader) -> Self {
        Self { collection, reader }
    }

    /// The record's collection.
    pub fn collection(&self) -> &RepositoryLocationsCollection {
        self.collection
    }

    /// Content of the auxiliary fragment for `field`, if there is one.
    pub fn auxiliary(&self, field: &str) -> Option<SyncResult<String>> {
        self.collection
            .auxiliary_for(field)
            .map(|location| self.reader.read(location))
    }
}

/// Rewrites or extends a parsed tree before field assignment.
///
/// Returned field names are marked failed on the result; they never abort
/// deserialization.
pub trait RecordPreprocessor: Send + Sync {
    /// Whether this preprocessor handles `object_type`.
    fn applies_to(&self, object_type: &str) -> bool;

    /// Processes one record tree.
    fn preprocess(&self, tree: &mut FieldTree, source: &FragmentSource<'_>) -> Vec<String>;
}

/// Builds one text field by joining several auxiliary fragments.
#[derive(Debug, Clone)]
pub struct ConcatenatedFieldPreprocessor {
    object_type: String,
    field: String,
    parts: Vec<String>,
    separator: String,
}

impl ConcatenatedFieldPreprocessor {
    /// Joins the auxiliary fragments `parts` into `field`.
    pub fn new<I, P>(object_type: impl Into<String>, field: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            object_type: object_type.into(),
            field: field.into(),
            parts: parts.into_iter().map(Into::into).collect(),
            separator: "\n".to_string(),
        }
    }

    /// Sets the separator placed between parts.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl RecordPreprocessor for ConcatenatedFieldPreprocessor {
    fn applies_to(&self, object_type: &str) -> bool {
        self.object_type == object_type
    }

    fn preprocess(&self, tree: &mut FieldTree, source: &FragmentSource<'_>) -> Vec<String> {
        let mut pieces = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match source.auxiliary(part) {
                Some(Ok(content)) => pieces.push(content),
                Some(Err(e)) => {
                    tracing::warn!("Cannot read part {} of {}: {}", part, self.field, e);
                    return vec![self.field.clone()];
                }
                None => return vec![self.field.clone()],
            }
        }
        tree.insert(self.field.clone(), Json::String(pieces.join(&self.separator)));
        Vec::new()
    }
}

/// Turns fragment collections into deserialization results.
pub struct Deserializer {
    registry: Arc<SchemaRegistry>,
    preprocessors: Vec<Arc<dyn RecordPreprocessor>>,
}

impl Deserializer {
    /// Creates a deserializer for the registry's types.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            preprocessors: Vec::new(),
        }
    }

    /// Adds a preprocessor.
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn RecordPreprocessor>) -> Self {
        self.preprocessors.push(preprocessor);
        self
    }

    /// Adds a preprocessor in place.
    pub fn add_preprocessor(&mut self, preprocessor: Arc<dyn RecordPreprocessor>) {
        self.preprocessors.push(preprocessor);
    }

    /// Deserializes one collection.
    ///
    /// Returns one result for a plain record and one per row for a binding
    /// group. An unreadable or malformed main fragment is an error; missing
    /// references and auxiliary fragments are recorded on the results.
    pub fn deserialize<R, S>(
        &self,
        reader: &R,
        store: &S,
        resolver: &mut ReferenceResolver,
        collection: &RepositoryLocationsCollection,
    ) -> SyncResult<Vec<DeserializationResult>>
    where
        R: RepositoryReader,
        S: TargetStore + ?Sized,
    {
        let main = &collection.main;
        let content = reader.read(main)?;
        let root: Json = serde_json::from_str(&content)
            .map_err(|e| SyncError::parse(main, e.to_string()))?;

        let Json::Object(mut root) = root else {
            return Err(SyncError::parse(main, "expected an object at the root"));
        };
        if root.len() != 1 {
            return Err(SyncError::parse(main, "expected exactly one root label"));
        }
        let Some((label, body)) = root.iter_mut().next() else {
            return Err(SyncError::parse(main, "missing root label"));
        };
        if label != &collection.object_type {
            return Err(SyncError::parse(
                main,
                format!("root label '{label}' does not match type {}", collection.object_type),
            ));
        }
        let info = self
            .registry
            .require(label)
            .map_err(|e| SyncError::parse(main, e.to_string()))?
            .clone();
        let body = body.take();
        let source = FragmentSource::new(collection, reader);

        match (info.is_binding, body) {
            (true, Json::Array(rows)) => {
                let mut results = Vec::with_capacity(rows.len());
                for (index, row) in rows.into_iter().enumerate() {
                    let Json::Object(mut tree) = row else {
                        return Err(SyncError::parse(main, format!("binding row {index} is not an object")));
                    };
                    if let Some(parent) = &info.parent {
                        tree.entry(parent.column.clone())
                            .or_insert_with(|| Json::String(collection.code_name.clone()));
                    }
                    results.push(self.build(&info, tree, &source, store, resolver)?);
                }
                Ok(results)
            }
            (false, Json::Object(mut tree)) => {
                let mut failed = self.merge_auxiliary(&info, &mut tree, &source);
                failed.extend(self.run_preprocessors(&info, &mut tree, &source));

                let code_column = info
                    .code_name_column
                    .clone()
                    .ok_or_else(|| SyncError::parse(main, "type has no code name column"))?;
                match tree.get(&code_column) {
                    None | Some(Json::Null) => {
                        tree.insert(code_column, Json::String(collection.code_name.clone()));
                    }
                    Some(Json::String(code)) if code == &collection.code_name => {}
                    Some(other) => {
                        return Err(SyncError::parse(
                            main,
                            format!("code name {other} does not match '{}'", collection.code_name),
                        ))
                    }
                }

                let mut result = self.build(&info, tree, &source, store, resolver)?;
                result.merge_failed_fields(failed);
                Ok(vec![result])
            }
            (true, _) => Err(SyncError::parse(main, "binding fragment must hold an array of rows")),
            (false, _) => Err(SyncError::parse(main, "record fragment must hold an object")),
        }
    }

    fn merge_auxiliary(
        &self,
        info: &TypeInfo,
        tree: &mut FieldTree,
        source: &FragmentSource<'_>,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        for field in &info.structured_fields {
            match source.auxiliary(field) {
                Some(Ok(content)) => {
                    tree.insert(field.clone(), Json::String(content));
                }
                Some(Err(e)) => {
                    tracing::warn!("Unreadable auxiliary fragment for {}.{}: {}", info.object_type, field, e);
                    failed.push(field.clone());
                }
                None if tree.contains_key(field) => {}
                None => failed.push(field.clone()),
            }
        }
        failed
    }

    fn run_preprocessors(
        &self,
        info: &TypeInfo,
        tree: &mut FieldTree,
        source: &FragmentSource<'_>,
    ) -> Vec<String> {
        self.preprocessors
            .iter()
            .filter(|p| p.applies_to(&info.object_type))
            .flat_map(|p| p.preprocess(tree, source))
            .collect()
    }

    fn build<S>(
        &self,
        info: &Arc<TypeInfo>,
        tree: FieldTree,
        source: &FragmentSource<'_>,
        store: &S,
        resolver: &mut ReferenceResolver,
    ) -> SyncResult<DeserializationResult>
    where
        S: TargetStore + ?Sized,
    {
        let mut result = DeserializationResult::new(TypedRecord::new(info.clone()));

        for (field, value) in &tree {
            if field == &info.id_column {
                continue;
            }

            if let Some(reference) = info.reference_for_column(field) {
                match value {
                    Json::Null => result.record.unset(field),
                    Json::String(code) => {
                        let target = self.registry.require(&reference.dependency_type)?;
                        match resolver.resolve(store, target, code)? {
                            Some(id) => result.record.set(field.clone(), id),
                            None => result.fail_mapping(FailedMapping {
                                field: field.clone(),
                                referenced_type: reference.dependency_type.clone(),
                                referenced_code_name: code.clone(),
                                integrity: reference.integrity,
                            }),
                        }
                    }
                    _ => result.fail_reference_field(field.clone(), reference.integrity),
                }
                continue;
            }

            if let Some(dynamic) = info.dynamic_reference_for_column(field) {
                let target_type = tree.get(&dynamic.type_column).and_then(Json::as_str);
                match (value, target_type.and_then(|t| self.registry.get(t))) {
                    (Json::Null, _) => result.record.unset(field),
                    (Json::String(code), Some(target)) => {
                        match resolver.resolve(store, target, code)? {
                            Some(id) => result.record.set(field.clone(), id),
                            None => result.fail_mapping(FailedMapping {
                                field: field.clone(),
                                referenced_type: target.object_type.clone(),
                                referenced_code_name: code.clone(),
                                integrity: dynamic.integrity,
                            }),
                        }
                    }
                    _ => result.fail_reference_field(field.clone(), dynamic.integrity),
                }
                continue;
            }

            result.record.set(field.clone(), scalar(value));
        }

        tracing::trace!(
            "Deserialized {} '{}' from {}",
            info.object_type,
            result.record.identity(),
            source.collection().main
        );
        Ok(result)
    }
}

fn scalar(value: &Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}
