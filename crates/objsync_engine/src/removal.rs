//! Execution of removal instructions.

use crate::cancel::CancellationToken;
use crate::error::{SyncError, SyncResult};
use crate::resolver::ReferenceResolver;
use crate::store::{TargetStore, WriteOp};
use objsync_model::{
    ExecutionStrategy, ObjectId, RemoveAction, RemoveDependencyInfo, Row, SchemaRegistry,
    TypeInfo, Value, WhereCondition,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-object side effects run by API instructions.
pub trait DeleteHook: Send + Sync {
    /// Runs before a row is deleted. An error aborts the removal.
    fn before_delete(&self, info: &TypeInfo, row: &Row) -> SyncResult<()>;

    /// Runs after a row was deleted.
    fn after_delete(&self, _info: &TypeInfo, _row: &Row) {}
}

/// Delete hooks by object type.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Vec<Arc<dyn DeleteHook>>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook for `object_type`.
    pub fn register(&mut self, object_type: impl Into<String>, hook: Arc<dyn DeleteHook>) {
        self.hooks.entry(object_type.into()).or_default().push(hook);
    }

    /// Adds a hook, builder style.
    pub fn with_hook(mut self, object_type: impl Into<String>, hook: Arc<dyn DeleteHook>) -> Self {
        self.register(object_type, hook);
        self
    }

    /// Hooks of `object_type`.
    pub fn hooks_for(&self, object_type: &str) -> &[Arc<dyn DeleteHook>] {
        self.hooks.get(object_type).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.hooks.iter().map(|(t, h)| (t, h.len())))
            .finish()
    }
}

/// Counters for one executed removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalStats {
    /// Instructions executed.
    pub instructions: usize,
    /// Rows deleted or updated.
    pub affected_rows: usize,
    /// Rows handled one by one.
    pub api_rows: usize,
    /// Whether the object itself was deleted by this removal.
    pub object_deleted: bool,
}

/// Runs removal instructions against a store.
pub struct RemovalExecutor<'a, S> {
    registry: &'a SchemaRegistry,
    store: &'a mut S,
    resolver: &'a mut ReferenceResolver,
    hooks: &'a HookRegistry,
    cancel: &'a CancellationToken,
}

impl<'a, S: TargetStore> RemovalExecutor<'a, S> {
    /// Creates an executor.
    pub fn new(
        registry: &'a SchemaRegistry,
        store: &'a mut S,
        resolver: &'a mut ReferenceResolver,
        hooks: &'a HookRegistry,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            resolver,
            hooks,
            cancel,
        }
    }

    /// Executes instructions in order.
    ///
    /// Consecutive bulk instructions share one store batch. Resolver entries
    /// of every affected type are dropped afterwards.
    pub fn execute(&mut self, instructions: &[RemoveDependencyInfo]) -> SyncResult<RemovalStats> {
        let mut stats = RemovalStats::default();
        let mut batch = Vec::new();
        let mut affected_types = BTreeSet::new();

        for instruction in instructions {
            self.cancel.check()?;
            affected_types.insert(instruction.object_type.clone());
            stats.instructions += 1;
            match instruction.strategy {
                ExecutionStrategy::Bulk => batch.push(bulk_op(instruction)),
                ExecutionStrategy::Api => {
                    self.flush(&mut batch, &mut stats)?;
                    self.execute_api(instruction, &mut stats)?;
                }
            }
        }
        self.flush(&mut batch, &mut stats)?;

        for object_type in &affected_types {
            self.resolver.invalidate_type(object_type);
        }
        Ok(stats)
    }

    /// Executes `instructions`, then deletes the object itself if it is
    /// still present.
    pub fn remove_object(
        &mut self,
        object_type: &str,
        id: ObjectId,
        instructions: &[RemoveDependencyInfo],
    ) -> SyncResult<RemovalStats> {
        let info = self.registry.require(object_type)?.clone();
        let mut stats = self.execute(instructions)?;

        self.cancel.check()?;
        if let Some(row) = self.store.get(&info, id)? {
            let hooks = self.hooks.hooks_for(object_type);
            for hook in hooks {
                hook.before_delete(&info, &row)?;
            }
            let outcome = self.store.apply(vec![WriteOp::DeleteWhere {
                object_type: object_type.to_string(),
                condition: WhereCondition::eq(info.id_column.clone(), id),
            }])?;
            for hook in hooks {
                hook.after_delete(&info, &row);
            }
            stats.affected_rows += outcome.affected;
            stats.object_deleted = outcome.affected > 0;
        } else {
            stats.object_deleted = instructions
                .last()
                .is_some_and(|last| last.object_type == object_type && last.is_delete());
        }
        self.resolver.forget(object_type, id);

        info!(
            "Removed {} #{}: {} instructions, {} rows affected",
            object_type, id, stats.instructions, stats.affected_rows
        );
        Ok(stats)
    }

    fn flush(&mut self, batch: &mut Vec<WriteOp>, stats: &mut RemovalStats) -> SyncResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(batch);
        debug!("Applying {} bulk removal statements", ops.len());
        let outcome = self.store.apply(ops)?;
        stats.affected_rows += outcome.affected;
        Ok(())
    }

    fn execute_api(
        &mut self,
        instruction: &RemoveDependencyInfo,
        stats: &mut RemovalStats,
    ) -> SyncResult<()> {
        let info = self.registry.require(&instruction.object_type)?.clone();
        let rows = self
            .store
            .query(&instruction.object_type, &instruction.condition)?;
        let hooks = self.hooks.hooks_for(&instruction.object_type);

        for row in rows {
            self.cancel.check()?;
            let id = row
                .get(&info.id_column)
                .and_then(Value::as_object_id)
                .ok_or_else(|| SyncError::Hook {
                    object_type: info.object_type.clone(),
                    message: "row without identifier".to_string(),
                })?;
            match &instruction.action {
                RemoveAction::Delete => {
                    for hook in hooks {
                        hook.before_delete(&info, &row)?;
                    }
                    let outcome = self.store.apply(vec![WriteOp::DeleteWhere {
                        object_type: info.object_type.clone(),
                        condition: WhereCondition::eq(info.id_column.clone(), id),
                    }])?;
                    for hook in hooks {
                        hook.after_delete(&info, &row);
                    }
                    stats.affected_rows += outcome.affected;
                }
                RemoveAction::Update { column, value } => {
                    let mut changes = Row::new();
                    changes.insert(column.clone(), value.clone());
                    self.store.apply(vec![WriteOp::Update {
                        object_type: info.object_type.clone(),
                        id,
                        row: changes,
                    }])?;
                    stats.affected_rows += 1;
                }
            }
            stats.api_rows += 1;
        }
        Ok(())
    }
}

fn bulk_op(instruction: &RemoveDependencyInfo) -> WriteOp {
    match &instruction.action {
        RemoveAction::Delete => WriteOp::DeleteWhere {
            object_type: instruction.object_type.clone(),
            condition: instruction.condition.clone(),
        },
        RemoveAction::Update { column, value } => WriteOp::UpdateWhere {
            object_type: instruction.object_type.clone(),
            column: column.clone(),
            value: value.clone(),
            condition: instruction.condition.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::DependencyResolver;
    use crate::store::MemoryStore;
    use objsync_model::{ApiRequirements, Integrity};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHook {
        deleted: Mutex<Vec<String>>,
        refuse: Option<String>,
    }

    impl DeleteHook for RecordingHook {
        fn before_delete(&self, info: &TypeInfo, row: &Row) -> SyncResult<()> {
            let code = row
                .get("code_name")
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string();
            if self.refuse.as_deref() == Some(code.as_str()) {
                return Err(SyncError::Hook {
                    object_type: info.object_type.clone(),
                    message: format!("{code} is locked"),
                });
            }
            self.deleted.lock().push(code);
            Ok(())
        }
    }

    fn media() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::new(vec![
                TypeInfo::new("media.library"),
                TypeInfo::new("media.file")
                    .with_reference("library_id", "media.library", Integrity::Required)
                    .with_api(ApiRequirements {
                        custom_delete: true,
                        ..Default::default()
                    }),
                TypeInfo::new("media.note")
                    .with_reference("library_id", "media.library", Integrity::NotRequired),
            ])
            .unwrap(),
        )
    }

    fn insert(store: &mut MemoryStore, object_type: &str, pairs: &[(&str, Value)]) -> ObjectId {
        let row: Row = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        store
            .apply(vec![WriteOp::Insert {
                object_type: object_type.into(),
                row,
            }])
            .unwrap()
            .ids[0]
    }

    #[test]
    fn api_instructions_run_hooks_per_row() {
        let registry = media();
        let mut store = MemoryStore::new(registry.clone());
        let lib = insert(&mut store, "media.library", &[("code_name", "images".into())]);
        insert(&mut store, "media.file", &[("code_name", "a.png".into()), ("library_id", lib.into())]);
        insert(&mut store, "media.file", &[("code_name", "b.png".into()), ("library_id", lib.into())]);
        insert(&mut store, "media.note", &[("code_name", "n".into()), ("library_id", lib.into())]);

        let plan = DependencyResolver::new(&registry, &store)
            .remove_dependencies("media.library", lib, false)
            .unwrap();
        let hook = Arc::new(RecordingHook::default());
        let hooks = HookRegistry::new().with_hook("media.file", hook.clone());
        let mut resolver = ReferenceResolver::new();
        resolver.register("media.note", "n", 3);
        let cancel = CancellationToken::new();

        let stats = RemovalExecutor::new(&registry, &mut store, &mut resolver, &hooks, &cancel)
            .remove_object("media.library", lib, &plan)
            .unwrap();

        assert_eq!(stats.api_rows, 2);
        assert!(stats.object_deleted);
        assert_eq!(*hook.deleted.lock(), vec!["a.png".to_string(), "b.png".to_string()]);
        assert_eq!(store.count("media.file"), 0);
        assert_eq!(store.count("media.library"), 0);
        assert!(store.find_by_code_name("media.note", "n").unwrap()["library_id"].is_null());
        assert!(resolver.is_empty());
    }

    #[test]
    fn failing_hook_aborts_removal() {
        let registry = media();
        let mut store = MemoryStore::new(registry.clone());
        let lib = insert(&mut store, "media.library", &[("code_name", "images".into())]);
        insert(&mut store, "media.file", &[("code_name", "a.png".into()), ("library_id", lib.into())]);

        let plan = DependencyResolver::new(&registry, &store)
            .remove_dependencies("media.library", lib, false)
            .unwrap();
        let hooks = HookRegistry::new().with_hook(
            "media.file",
            Arc::new(RecordingHook {
                refuse: Some("a.png".into()),
                ..Default::default()
            }),
        );
        let mut resolver = ReferenceResolver::new();
        let cancel = CancellationToken::new();

        let err = RemovalExecutor::new(&registry, &mut store, &mut resolver, &hooks, &cancel)
            .remove_object("media.library", lib, &plan)
            .unwrap_err();
        assert!(matches!(err, SyncError::Hook { .. }));
        assert_eq!(store.count("media.library"), 1);
        assert_eq!(store.count("media.file"), 1);
    }

    #[test]
    fn cancelled_executor_does_nothing() {
        let registry = media();
        let mut store = MemoryStore::new(registry.clone());
        let lib = insert(&mut store, "media.library", &[("code_name", "images".into())]);
        let hooks = HookRegistry::new();
        let mut resolver = ReferenceResolver::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = RemovalExecutor::new(&registry, &mut store, &mut resolver, &hooks, &cancel)
            .remove_object("media.library", lib, &[])
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(store.count("media.library"), 1);
    }
}
