//! Dependency graph resolution for removals.
//!
//! Given one object about to be removed, walks the reverse dependency index
//! and produces the instructions that keep referential integrity: dependent
//! rows are deleted, nulled, or re-pointed at a default object. The walk
//! carries the stack of types on the current path and never expands a type
//! already on it.

use crate::error::{SyncError, SyncResult};
use crate::store::TargetStore;
use objsync_model::{
    ExecutionStrategy, Integrity, ObjectId, RemoveDependencyInfo, SchemaRegistry, TypeInfo,
    Value, WhereCondition,
};
use tracing::debug;

/// Computes removal instructions.
pub struct DependencyResolver<'a, S: ?Sized> {
    registry: &'a SchemaRegistry,
    store: &'a S,
}

impl<'a, S> DependencyResolver<'a, S>
where
    S: TargetStore + ?Sized,
{
    /// Creates a resolver reading rows from `store`.
    pub fn new(registry: &'a SchemaRegistry, store: &'a S) -> Self {
        Self { registry, store }
    }

    /// Instructions needed to remove object `id` of `object_type`.
    ///
    /// With `delete_all`, every dependent is deleted regardless of its
    /// integrity. For hierarchical types the last instruction deletes the
    /// object together with its whole subtree. Otherwise the object itself
    /// is not part of the list.
    pub fn remove_dependencies(
        &self,
        object_type: &str,
        id: ObjectId,
        delete_all: bool,
    ) -> SyncResult<Vec<RemoveDependencyInfo>> {
        let info = self.registry.require(object_type)?;
        let row = self
            .store
            .get(info, id)?
            .ok_or_else(|| SyncError::ObjectNotFound {
                object_type: object_type.to_string(),
                id,
            })?;

        self.check_default_protection(info, &row)?;

        let stack = self.registry.recursion_seed(object_type);
        let own = WhereCondition::eq(info.id_column.clone(), id);
        let mut out = Vec::new();
        self.collect(info, &own, &stack, delete_all, &mut out)?;

        let subtree = info.path_column.as_ref().and_then(|column| {
            row.get(column)
                .and_then(Value::as_text)
                .map(|path| WhereCondition::path_descendants_of(column.clone(), path))
        });
        if let Some(descendants) = subtree {
            self.collect(info, &descendants, &stack, delete_all, &mut out)?;
            out.push(RemoveDependencyInfo::delete(
                object_type,
                own.or(descendants),
                strategy_for(info),
            ));
        }

        debug!(
            "Removing {} #{} needs {} instructions",
            object_type,
            id,
            out.len()
        );
        Ok(out)
    }

    /// Rejects removal of a default object that dependents fall back to.
    fn check_default_protection(
        &self,
        info: &TypeInfo,
        row: &objsync_model::Row,
    ) -> SyncResult<()> {
        let Some(default_code) = info.default_code_name.as_deref() else {
            return Ok(());
        };
        let code = info
            .code_name_column
            .as_deref()
            .and_then(|column| row.get(column))
            .and_then(Value::as_text);
        if code != Some(default_code) {
            return Ok(());
        }

        let static_edge = self
            .registry
            .dependents_of(&info.object_type)
            .iter()
            .find(|r| r.integrity == Integrity::RequiredHasDefault)
            .map(|r| (r.dependent_type.clone(), r.dependency_column.clone()));
        let dynamic_edge = || {
            self.registry
                .dynamic_references()
                .iter()
                .find(|r| r.integrity == Integrity::RequiredHasDefault)
                .map(|r| (r.dependent_type.clone(), r.dependency_column.clone()))
        };
        match static_edge.or_else(dynamic_edge) {
            Some((dependent_type, column)) => Err(SyncError::DefaultObjectDeletion {
                object_type: info.object_type.clone(),
                code_name: default_code.to_string(),
                dependent_type,
                column,
            }),
            None => Ok(()),
        }
    }

    /// Expands every dependent of `target` rows matching `condition`.
    fn collect(
        &self,
        target: &TypeInfo,
        condition: &WhereCondition,
        stack: &[String],
        delete_all: bool,
        out: &mut Vec<RemoveDependencyInfo>,
    ) -> SyncResult<()> {
        for reference in self.registry.dependents_of(&target.object_type) {
            if stack.contains(&reference.dependent_type) {
                continue;
            }
            let dependent = self.registry.require(&reference.dependent_type)?;
            let scoped = WhereCondition::in_subquery(
                reference.dependency_column.clone(),
                target.object_type.clone(),
                target.id_column.clone(),
                condition.clone(),
            );
            self.expand(
                dependent,
                &reference.dependency_column,
                reference.integrity,
                scoped,
                target,
                condition,
                stack,
                delete_all,
                out,
            )?;
        }

        let concrete_types: Vec<Value> = self
            .registry
            .concrete_type_names(&target.object_type)
            .into_iter()
            .map(Value::Text)
            .collect();
        for reference in self.registry.dynamic_references() {
            if stack.contains(&reference.dependent_type) {
                continue;
            }
            let dependent = self.registry.require(&reference.dependent_type)?;
            let scoped = WhereCondition::in_values(reference.type_column.clone(), concrete_types.clone())
                .and(WhereCondition::in_subquery(
                    reference.dependency_column.clone(),
                    target.object_type.clone(),
                    target.id_column.clone(),
                    condition.clone(),
                ));
            self.expand(
                dependent,
                &reference.dependency_column,
                reference.integrity,
                scoped,
                target,
                condition,
                stack,
                delete_all,
                out,
            )?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        dependent: &TypeInfo,
        column: &str,
        integrity: Integrity,
        scoped: WhereCondition,
        target: &TypeInfo,
        target_condition: &WhereCondition,
        stack: &[String],
        delete_all: bool,
        out: &mut Vec<RemoveDependencyInfo>,
    ) -> SyncResult<()> {
        let strategy = strategy_for(dependent);
        if !delete_all {
            match integrity {
                Integrity::NotRequired => {
                    out.push(RemoveDependencyInfo::update(
                        &dependent.object_type,
                        column,
                        Value::Null,
                        scoped,
                        strategy,
                    ));
                    return Ok(());
                }
                Integrity::RequiredHasDefault => {
                    if let Some(default_id) = self.default_object_id(target)? {
                        self.ensure_default_survives(target, target_condition, default_id, dependent, column)?;
                        out.push(RemoveDependencyInfo::update(
                            &dependent.object_type,
                            column,
                            Value::Integer(default_id),
                            scoped,
                            strategy,
                        ));
                        return Ok(());
                    }
                }
                Integrity::Required | Integrity::Binding => {}
            }
        }

        let mut path = stack.to_vec();
        path.push(dependent.object_type.clone());
        self.collect(dependent, &scoped, &path, delete_all, out)?;
        out.push(RemoveDependencyInfo::delete(
            &dependent.object_type,
            scoped,
            strategy,
        ));
        Ok(())
    }

    fn default_object_id(&self, target: &TypeInfo) -> SyncResult<Option<ObjectId>> {
        let (Some(code), Some(column)) = (
            target.default_code_name.as_deref(),
            target.code_name_column.as_deref(),
        ) else {
            return Ok(None);
        };
        Ok(self
            .store
            .query(&target.object_type, &WhereCondition::eq(column, code))?
            .first()
            .and_then(|row| row.get(&target.id_column))
            .and_then(Value::as_object_id))
    }

    fn ensure_default_survives(
        &self,
        target: &TypeInfo,
        target_condition: &WhereCondition,
        default_id: ObjectId,
        dependent: &TypeInfo,
        column: &str,
    ) -> SyncResult<()> {
        let removed = self.store.query(&target.object_type, target_condition)?;
        let hit = removed
            .iter()
            .any(|row| row.get(&target.id_column).and_then(Value::as_object_id) == Some(default_id));
        if hit {
            return Err(SyncError::DefaultObjectDeletion {
                object_type: target.object_type.clone(),
                code_name: target.default_code_name.clone().unwrap_or_default(),
                dependent_type: dependent.object_type.clone(),
                column: column.to_string(),
            });
        }
        Ok(())
    }
}

fn strategy_for(info: &TypeInfo) -> ExecutionStrategy {
    if info.requires_api_deletion() {
        ExecutionStrategy::Api
    } else {
        ExecutionStrategy::Bulk
    }
}
