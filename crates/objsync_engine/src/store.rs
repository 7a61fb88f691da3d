//! Target store abstraction and an in-memory implementation.

use objsync_model::{ObjectId, Row, SchemaRegistry, TypeInfo, Value, WhereCondition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a target store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// The type has no table.
    #[error("unknown object type: {0}")]
    UnknownType(String),

    /// Row to update does not exist.
    #[error("{object_type} #{id} not found")]
    NotFound {
        /// Object type.
        object_type: String,
        /// Identifier.
        id: ObjectId,
    },

    /// A constraint was violated.
    #[error("constraint violation on {object_type}: {message}")]
    Constraint {
        /// Object type.
        object_type: String,
        /// Description.
        message: String,
    },

    /// Backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Inserts a row. The store assigns an id unless the row carries one.
    Insert {
        /// Object type.
        object_type: String,
        /// Columns.
        row: Row,
    },
    /// Overwrites the given columns of an existing row.
    Update {
        /// Object type.
        object_type: String,
        /// Row identifier.
        id: ObjectId,
        /// Columns to overwrite.
        row: Row,
    },
    /// Deletes matching rows.
    DeleteWhere {
        /// Object type.
        object_type: String,
        /// Filter.
        condition: WhereCondition,
    },
    /// Sets one column on matching rows.
    UpdateWhere {
        /// Object type.
        object_type: String,
        /// Column.
        column: String,
        /// New value.
        value: Value,
        /// Filter.
        condition: WhereCondition,
    },
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids of inserted or updated rows, in batch order.
    pub ids: Vec<ObjectId>,
    /// Rows touched by conditional deletes and updates.
    pub affected: usize,
}

/// The relational store objects are restored into.
///
/// Batches are atomic: either every op applies or none does.
pub trait TargetStore {
    /// Applies a batch atomically.
    fn apply(&mut self, batch: Vec<WriteOp>) -> StoreResult<BatchOutcome>;

    /// Rows of `object_type` matching `condition`.
    fn query(&self, object_type: &str, condition: &WhereCondition) -> StoreResult<Vec<Row>>;

    /// Row with the given id.
    fn get(&self, info: &TypeInfo, id: ObjectId) -> StoreResult<Option<Row>> {
        Ok(self
            .query(&info.object_type, &WhereCondition::eq(info.id_column.clone(), id))?
            .into_iter()
            .next())
    }
}

impl<S: TargetStore + ?Sized> TargetStore for Box<S> {
    fn apply(&mut self, batch: Vec<WriteOp>) -> StoreResult<BatchOutcome> {
        (**self).apply(batch)
    }

    fn query(&self, object_type: &str, condition: &WhereCondition) -> StoreResult<Vec<Row>> {
        (**self).query(object_type, condition)
    }
}

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Rows per type, keyed by id.
    pub tables: BTreeMap<String, BTreeMap<ObjectId, Row>>,
    /// Highest id ever assigned per type.
    #[serde(default)]
    pub last_ids: BTreeMap<String, ObjectId>,
}

/// A schema-aware in-memory store.
///
/// Ids are never reused: each table keeps the highest id it has handed out,
/// including ids of rows deleted since.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    registry: Arc<SchemaRegistry>,
    tables: BTreeMap<String, BTreeMap<ObjectId, Row>>,
    last_ids: BTreeMap<String, ObjectId>,
    batches: usize,
}

impl MemoryStore {
    /// Creates an empty store for the registry's types.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            tables: BTreeMap::new(),
            last_ids: BTreeMap::new(),
            batches: 0,
        }
    }

    /// Restores a store from a snapshot.
    ///
    /// Snapshots without id counters resume after the highest stored id.
    pub fn from_snapshot(registry: Arc<SchemaRegistry>, snapshot: StoreSnapshot) -> Self {
        let mut last_ids = snapshot.last_ids;
        for (object_type, table) in &snapshot.tables {
            if let Some(max) = table.keys().next_back() {
                let last = last_ids.entry(object_type.clone()).or_insert(*max);
                *last = (*last).max(*max);
            }
        }
        Self {
            registry,
            tables: snapshot.tables,
            last_ids,
            batches: 0,
        }
    }

    /// Copies the current content.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            tables: self.tables.clone(),
            last_ids: self.last_ids.clone(),
        }
    }

    /// Number of batches applied so far.
    pub fn batch_count(&self) -> usize {
        self.batches
    }

    /// Number of rows of `object_type`.
    pub fn count(&self, object_type: &str) -> usize {
        self.tables.get(object_type).map(BTreeMap::len).unwrap_or(0)
    }

    /// Every row of `object_type`.
    pub fn rows(&self, object_type: &str) -> Vec<Row> {
        self.tables
            .get(object_type)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Row of `object_type` with the given code name.
    pub fn find_by_code_name(&self, object_type: &str, code_name: &str) -> Option<Row> {
        let column = self
            .registry
            .get(object_type)?
            .code_name_column
            .clone()?;
        self.tables.get(object_type)?.values().find(|row| {
            row.get(&column).and_then(Value::as_text) == Some(code_name)
        }).cloned()
    }

    fn info(&self, object_type: &str) -> StoreResult<Arc<TypeInfo>> {
        self.registry
            .get(object_type)
            .cloned()
            .ok_or_else(|| StoreError::UnknownType(object_type.to_string()))
    }

    fn select(&self, object_type: &str, column: &str, condition: &WhereCondition) -> Vec<Value> {
        self.matching(object_type, condition)
            .into_iter()
            .filter_map(|(_, row)| row.get(column).cloned())
            .collect()
    }

    fn matching<'a>(
        &'a self,
        object_type: &str,
        condition: &WhereCondition,
    ) -> Vec<(ObjectId, &'a Row)> {
        let subquery = |t: &str, c: &str, inner: &WhereCondition| self.select(t, c, inner);
        self.tables
            .get(object_type)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, row)| condition.matches_with(row, &subquery))
                    .map(|(id, row)| (*id, row))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_unique_code_name(
        &self,
        info: &TypeInfo,
        id: ObjectId,
        row: &Row,
    ) -> StoreResult<()> {
        let Some(column) = info.code_name_column.as_deref() else {
            return Ok(());
        };
        let Some(code) = row.get(column).filter(|v| !v.is_null()) else {
            return Ok(());
        };
        let clash = self
            .tables
            .get(&info.object_type)
            .map(|t| t.iter().any(|(other, r)| *other != id && r.get(column) == Some(code)))
            .unwrap_or(false);
        if clash {
            return Err(StoreError::Constraint {
                object_type: info.object_type.clone(),
                message: format!("duplicate {column} {code}"),
            });
        }
        Ok(())
    }

    fn apply_op(&mut self, op: WriteOp, outcome: &mut BatchOutcome) -> StoreResult<()> {
        match op {
            WriteOp::Insert { object_type, mut row } => {
                let info = self.info(&object_type)?;
                let table = self.tables.entry(object_type.clone()).or_default();
                let last = self.last_ids.get(&object_type).copied().unwrap_or(0);
                let id = match row.get(&info.id_column).and_then(Value::as_object_id) {
                    Some(id) if table.contains_key(&id) => {
                        return Err(StoreError::Constraint {
                            object_type,
                            message: format!("duplicate id {id}"),
                        })
                    }
                    Some(id) => id,
                    None => table.keys().next_back().copied().unwrap_or(0).max(last) + 1,
                };
                row.insert(info.id_column.clone(), Value::Integer(id));
                self.check_unique_code_name(&info, id, &row)?;
                self.last_ids.insert(object_type.clone(), last.max(id));
                self.tables.entry(object_type).or_default().insert(id, row);
                outcome.ids.push(id);
            }
            WriteOp::Update {
                object_type,
                id,
                row,
            } => {
                let info = self.info(&object_type)?;
                let mut merged = self
                    .tables
                    .get(&object_type)
                    .and_then(|t| t.get(&id))
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound {
                        object_type: object_type.clone(),
                        id,
                    })?;
                for (column, value) in row {
                    if column != info.id_column {
                        merged.insert(column, value);
                    }
                }
                self.check_unique_code_name(&info, id, &merged)?;
                self.tables.entry(object_type).or_default().insert(id, merged);
                outcome.ids.push(id);
            }
            WriteOp::DeleteWhere {
                object_type,
                condition,
            } => {
                self.info(&object_type)?;
                let ids: Vec<ObjectId> = self
                    .matching(&object_type, &condition)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
                if let Some(table) = self.tables.get_mut(&object_type) {
                    for id in &ids {
                        table.remove(id);
                    }
                }
                outcome.affected += ids.len();
            }
            WriteOp::UpdateWhere {
                object_type,
                column,
                value,
                condition,
            } => {
                self.info(&object_type)?;
                let ids: Vec<ObjectId> = self
                    .matching(&object_type, &condition)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
                if let Some(table) = self.tables.get_mut(&object_type) {
                    for id in &ids {
                        if let Some(row) = table.get_mut(id) {
                            row.insert(column.clone(), value.clone());
                        }
                    }
                }
                outcome.affected += ids.len();
            }
        }
        Ok(())
    }
}

impl TargetStore for MemoryStore {
    fn apply(&mut self, batch: Vec<WriteOp>) -> StoreResult<BatchOutcome> {
        let before = self.tables.clone();
        let last_ids = self.last_ids.clone();
        let mut outcome = BatchOutcome::default();
        for op in batch {
            if let Err(e) = self.apply_op(op, &mut outcome) {
                self.tables = before;
                self.last_ids = last_ids;
                return Err(e);
            }
        }
        self.batches += 1;
        Ok(outcome)
    }

    fn query(&self, object_type: &str, condition: &WhereCondition) -> StoreResult<Vec<Row>> {
        self.info(object_type)?;
        Ok(self
            .matching(object_type, condition)
            .into_iter()
            .map(|(_, row)| row.clone())
            .collect())
    }
}
