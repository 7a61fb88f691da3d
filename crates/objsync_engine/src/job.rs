//! Restore jobs.
//!
//! A job owns the repository, store, hash store and resolver, and runs the
//! upsert phase followed by the delete phase. Both phases share the same
//! resolver and hash store.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::dependencies::DependencyResolver;
use crate::deserializer::{Deserializer, RecordPreprocessor};
use crate::error::{SyncError, SyncResult};
use crate::hash_store::HashStore;
use crate::progress::{ProgressAction, ProgressSink, Severity, TracingProgress};
use crate::removal::{HookRegistry, RemovalExecutor, RemovalStats};
use crate::repository::RepositoryReader;
use crate::resolver::ReferenceResolver;
use crate::store::{TargetStore, WriteOp};
use crate::upsert::{UpsertEngine, UpsertSummary};
use objsync_model::{
    ObjectId, RemoveDependencyInfo, RepositoryLocation, SchemaRegistry, TypeInfo, Value,
    WhereCondition,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counters for one delete phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Object type.
    pub object_type: String,
    /// Objects (or binding groups) removed.
    pub deleted: usize,
    /// Objects that could not be removed.
    pub failed: usize,
    /// Removal instructions executed.
    pub instructions: usize,
    /// Stale hash entries dropped.
    pub forgotten_hashes: usize,
}

impl DeleteSummary {
    fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            ..Default::default()
        }
    }
}

/// Outcome of restoring one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Object type.
    pub object_type: String,
    /// Upsert phase counters.
    pub upsert: UpsertSummary,
    /// Delete phase counters, when the phase ran.
    pub delete: Option<DeleteSummary>,
}

impl RestoreReport {
    /// Whether every record was synchronized.
    pub fn is_clean(&self) -> bool {
        self.upsert.failed == 0
            && self.upsert.partially_accepted == 0
            && self.delete.as_ref().map_or(true, |d| d.failed == 0)
    }
}

/// Synchronizes a repository snapshot into a target store.
pub struct RestoreJob<R, S, H> {
    registry: Arc<SchemaRegistry>,
    repository: R,
    store: S,
    hashes: H,
    resolver: ReferenceResolver,
    deserializer: Deserializer,
    hooks: HookRegistry,
    config: SyncConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl<R, S, H> RestoreJob<R, S, H>
where
    R: RepositoryReader,
    S: TargetStore,
    H: HashStore,
{
    /// Creates a job reporting progress through `tracing`.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        repository: R,
        store: S,
        hashes: H,
        config: SyncConfig,
    ) -> Self {
        Self {
            deserializer: Deserializer::new(registry.clone()),
            registry,
            repository,
            store,
            hashes,
            resolver: ReferenceResolver::new(),
            hooks: HookRegistry::new(),
            config,
            progress: Arc::new(TracingProgress),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the progress sink.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Sets the delete hooks used by API removals.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Adds a record preprocessor.
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn RecordPreprocessor>) -> Self {
        self.deserializer.add_preprocessor(preprocessor);
        self
    }

    /// Token that cancels this job when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Type metadata.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// The target store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the target store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The hash store.
    pub fn hashes(&self) -> &H {
        &self.hashes
    }

    /// The reference resolver.
    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    /// Job configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Consumes the job into its store and hash store.
    pub fn into_parts(self) -> (S, H) {
        (self.store, self.hashes)
    }

    /// Restores one type: upsert, then delete what the files no longer hold.
    pub fn run_type(&mut self, object_type: &str) -> SyncResult<RestoreReport> {
        self.registry.require(object_type)?;
        if !self.config.scope.includes(object_type) {
            info!("{} is outside the synchronization scope", object_type);
            return Ok(RestoreReport {
                object_type: object_type.to_string(),
                upsert: UpsertSummary::new(object_type),
                delete: None,
            });
        }

        let result = self.restore_type(object_type);
        let flushed = self.hashes.flush();
        let report = result?;
        flushed?;
        Ok(report)
    }

    /// Restores every type in scope.
    ///
    /// Upserts run dependencies first; deletes run in reverse so dependents
    /// go before the objects they reference.
    pub fn run_all(&mut self) -> SyncResult<Vec<RestoreReport>> {
        let result = self.restore_all();
        let flushed = self.hashes.flush();
        let reports = result?;
        flushed?;
        Ok(reports)
    }

    fn restore_type(&mut self, object_type: &str) -> SyncResult<RestoreReport> {
        let upsert = self.upsert(object_type)?;
        let delete = if self.config.delete_missing {
            Some(self.delete_missing(object_type)?)
        } else {
            None
        };
        Ok(RestoreReport {
            object_type: object_type.to_string(),
            upsert,
            delete,
        })
    }

    fn restore_all(&mut self) -> SyncResult<Vec<RestoreReport>> {
        let order: Vec<String> = self
            .registry
            .restore_order()
            .into_iter()
            .filter(|t| self.config.scope.includes(t))
            .collect();
        info!("Restoring {} types", order.len());

        let mut reports = Vec::with_capacity(order.len());
        for object_type in &order {
            reports.push(RestoreReport {
                object_type: object_type.clone(),
                upsert: self.upsert(object_type)?,
                delete: None,
            });
        }
        if self.config.delete_missing {
            for report in reports.iter_mut().rev() {
                report.delete = Some(self.delete_missing(&report.object_type)?);
            }
        }
        Ok(reports)
    }

    /// Runs the upsert phase for one type.
    pub fn upsert(&mut self, object_type: &str) -> SyncResult<UpsertSummary> {
        let ctx = SyncContext {
            registry: &self.registry,
            repository: &self.repository,
            store: &mut self.store,
            hashes: &mut self.hashes,
            resolver: &mut self.resolver,
            config: &self.config,
            progress: self.progress.as_ref(),
            cancel: &self.cancel,
        };
        UpsertEngine::new(ctx, &self.deserializer).run(object_type)
    }

    /// Instructions needed to remove one object, without executing them.
    pub fn plan_removal(
        &self,
        object_type: &str,
        id: ObjectId,
        delete_all: bool,
    ) -> SyncResult<Vec<RemoveDependencyInfo>> {
        DependencyResolver::new(&self.registry, &self.store).remove_dependencies(
            object_type,
            id,
            delete_all,
        )
    }

    /// Removes one object and everything that depends on it.
    pub fn delete_object(&mut self, object_type: &str, id: ObjectId) -> SyncResult<RemovalStats> {
        let instructions = self.plan_removal(object_type, id, false)?;
        RemovalExecutor::new(
            &self.registry,
            &mut self.store,
            &mut self.resolver,
            &self.hooks,
            &self.cancel,
        )
        .remove_object(object_type, id, &instructions)
    }

    /// Runs the delete phase for one type.
    ///
    /// Objects in the store whose code name has no collection in the
    /// repository are removed. Removal failures are reported and counted.
    pub fn delete_missing(&mut self, object_type: &str) -> SyncResult<DeleteSummary> {
        let info = self.registry.require(object_type)?.clone();
        self.cancel.check()?;

        let collections = self.repository.collections(&info)?;
        let present: BTreeSet<String> = collections.iter().map(|c| c.code_name.clone()).collect();
        let live_locations: BTreeSet<RepositoryLocation> = collections
            .iter()
            .flat_map(|c| c.locations().cloned())
            .collect();

        let mut summary = if info.is_binding {
            self.delete_orphan_bindings(&info, &present)?
        } else {
            self.delete_absent_objects(&info, &present)?
        };

        for location in self.hashes.locations(object_type) {
            if !live_locations.contains(&location) {
                self.hashes.remove(&location);
                summary.forgotten_hashes += 1;
            }
        }

        info!(
            "Delete phase for {}: {} deleted, {} failed",
            object_type, summary.deleted, summary.failed
        );
        Ok(summary)
    }

    fn delete_absent_objects(
        &mut self,
        info: &TypeInfo,
        present: &BTreeSet<String>,
    ) -> SyncResult<DeleteSummary> {
        let mut summary = DeleteSummary::new(&info.object_type);
        let Some(code_column) = info.code_name_column.as_deref() else {
            return Ok(summary);
        };

        let absent: Vec<(ObjectId, String)> = self
            .store
            .query(&info.object_type, &WhereCondition::All)?
            .into_iter()
            .filter_map(|row| {
                let id = row.get(&info.id_column).and_then(Value::as_object_id)?;
                let code = row.get(code_column).and_then(Value::as_text)?.to_string();
                (!present.contains(&code)).then_some((id, code))
            })
            .collect();

        for (id, code) in absent {
            self.cancel.check()?;
            if self.store.get(info, id)?.is_none() {
                debug!("{} '{}' already removed with its ancestor", info.object_type, code);
                continue;
            }
            match self.delete_object(&info.object_type, id) {
                Ok(stats) => {
                    summary.deleted += 1;
                    summary.instructions += stats.instructions;
                    self.report(Severity::Info, info, &code, "deleted".to_string());
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    error!("Cannot delete {} '{}': {}", info.object_type, code, e);
                    self.report(Severity::Error, info, &code, e.to_string());
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn delete_orphan_bindings(
        &mut self,
        info: &TypeInfo,
        present: &BTreeSet<String>,
    ) -> SyncResult<DeleteSummary> {
        let mut summary = DeleteSummary::new(&info.object_type);
        let Some(parent) = info.parent.clone() else {
            return Ok(summary);
        };
        let parent_info = self.registry.require(&parent.object_type)?.clone();

        let mut groups: BTreeMap<ObjectId, usize> = BTreeMap::new();
        for row in self.store.query(&info.object_type, &WhereCondition::All)? {
            if let Some(parent_id) = row.get(&parent.column).and_then(Value::as_object_id) {
                *groups.entry(parent_id).or_default() += 1;
            }
        }

        for (parent_id, rows) in groups {
            self.cancel.check()?;
            let parent_code = self
                .resolver
                .code_name_of(&self.store, &parent_info, parent_id)?;
            if parent_code.as_ref().is_some_and(|code| present.contains(code)) {
                continue;
            }
            let identity = parent_code.unwrap_or_else(|| format!("#{parent_id}"));
            let result = self.store.apply(vec![WriteOp::DeleteWhere {
                object_type: info.object_type.clone(),
                condition: WhereCondition::eq(parent.column.clone(), parent_id),
            }]);
            match result {
                Ok(_) => {
                    debug!("Deleted {} {} rows of '{}'", rows, info.object_type, identity);
                    summary.deleted += 1;
                    summary.instructions += 1;
                    self.report(Severity::Info, info, &identity, format!("deleted {rows} rows"));
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    error!("Cannot delete {} of '{}': {}", info.object_type, identity, e);
                    self.report(Severity::Error, info, &identity, e.to_string());
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn report(&self, severity: Severity, info: &TypeInfo, identity: &str, message: String) {
        self.progress.report(crate::progress::ProgressEvent::new(
            severity,
            ProgressAction::Delete,
            &info.object_type,
            identity,
            message,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_store::MemoryHashStore;
    use crate::progress::CollectingProgress;
    use crate::repository::MemoryRepository;
    use crate::store::MemoryStore;
    use objsync_model::Integrity;

    fn job(types: Vec<TypeInfo>) -> RestoreJob<MemoryRepository, MemoryStore, MemoryHashStore> {
        let registry = Arc::new(SchemaRegistry::new(types).unwrap());
        RestoreJob::new(
            registry.clone(),
            MemoryRepository::new(),
            MemoryStore::new(registry),
            MemoryHashStore::new(),
            SyncConfig::default(),
        )
    }

    #[test]
    fn run_type_upserts_then_deletes() {
        let mut job = job(vec![TypeInfo::new("blog.tag")]);
        job.repository().put_record("blog.tag", "rust", r#"{"blog.tag": {}}"#);
        job.repository().put_record("blog.tag", "go", r#"{"blog.tag": {}}"#);
        let report = job.run_type("blog.tag").unwrap();
        assert_eq!(report.upsert.created, 2);
        assert_eq!(report.delete.as_ref().unwrap().deleted, 0);
        assert!(report.is_clean());

        job.repository().remove_record("blog.tag", "go");
        let report = job.run_type("blog.tag").unwrap();
        assert_eq!(report.upsert.skipped, 1);
        let delete = report.delete.unwrap();
        assert_eq!(delete.deleted, 1);
        assert_eq!(delete.forgotten_hashes, 1);
        assert!(job.store().find_by_code_name("blog.tag", "go").is_none());
        assert_eq!(job.hashes().len(), 1);
    }

    #[test]
    fn out_of_scope_type_is_untouched() {
        let registry = Arc::new(SchemaRegistry::new(vec![TypeInfo::new("blog.tag")]).unwrap());
        let mut job = RestoreJob::new(
            registry.clone(),
            MemoryRepository::new(),
            MemoryStore::new(registry),
            MemoryHashStore::new(),
            SyncConfig::default().with_scope(crate::config::SyncScope::only(["blog.article"])),
        );
        job.repository().put_record("blog.tag", "rust", r#"{"blog.tag": {}}"#);
        let report = job.run_type("blog.tag").unwrap();
        assert_eq!(report.upsert.committed(), 0);
        assert_eq!(job.store().count("blog.tag"), 0);
        assert!(job.run_type("blog.none").is_err());
    }

    #[test]
    fn run_all_orders_dependencies_first() {
        let progress = Arc::new(CollectingProgress::new());
        let mut job = job(vec![
            TypeInfo::new("a.article").with_reference("tag_id", "z.tag", Integrity::Required),
            TypeInfo::new("z.tag"),
        ])
        .with_progress(progress.clone());
        job.repository()
            .put_record("a.article", "hello", r#"{"a.article": {"tag_id": "rust"}}"#);
        job.repository().put_record("z.tag", "rust", r#"{"z.tag": {}}"#);

        let reports = job.run_all().unwrap();
        let order: Vec<&str> = reports.iter().map(|r| r.object_type.as_str()).collect();
        assert_eq!(order, vec!["z.tag", "a.article"]);
        assert!(reports.iter().all(|r| r.upsert.passes == 1 && r.is_clean()));
        assert_eq!(progress.count(Severity::Info, ProgressAction::Create), 2);
    }

    #[test]
    fn delete_phase_can_be_disabled() {
        let registry = Arc::new(SchemaRegistry::new(vec![TypeInfo::new("blog.tag")]).unwrap());
        let mut store = MemoryStore::new(registry.clone());
        let mut row = objsync_model::Row::new();
        row.insert("code_name".into(), "legacy".into());
        store
            .apply(vec![WriteOp::Insert {
                object_type: "blog.tag".into(),
                row,
            }])
            .unwrap();
        let mut job = RestoreJob::new(
            registry,
            MemoryRepository::new(),
            store,
            MemoryHashStore::new(),
            SyncConfig::default().with_delete_missing(false),
        );
        let report = job.run_type("blog.tag").unwrap();
        assert!(report.delete.is_none());
        assert_eq!(job.store().count("blog.tag"), 1);
    }
}
