//! Upsert engine.
//!
//! Records of one type are deserialized and committed in a first pass.
//! Records with unresolved references are queued and retried until a pass
//! resolves nothing more. Records left at that fixed point are either
//! partially accepted (only optional references missing) or reported as
//! permanent failures. Failed records, and binding groups with dropped rows,
//! keep their old hashes, so the next run retries them.

use crate::context::SyncContext;
use crate::deserializer::Deserializer;
use crate::error::{SyncError, SyncResult};
use crate::hash_store::{current_hashes, has_changed, FragmentHashes, HashStore};
use crate::progress::{ProgressAction, Severity};
use crate::repository::RepositoryReader;
use crate::store::{StoreError, TargetStore, WriteOp};
use objsync_model::{
    DeserializationResult, ObjectId, RepositoryLocationsCollection, Row, SchemaError, TypeInfo,
    TypedRecord, Value, WhereCondition,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Counters for one upsert run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Object type.
    pub object_type: String,
    /// Unchanged records that were not read.
    pub skipped: usize,
    /// Records inserted.
    pub created: usize,
    /// Records updated.
    pub updated: usize,
    /// Records committed with optional references left unset.
    pub partially_accepted: usize,
    /// Records that could not be committed.
    pub failed: usize,
    /// Passes run, the initial one included.
    pub passes: usize,
}

impl UpsertSummary {
    /// Empty summary for `object_type`.
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            ..Default::default()
        }
    }

    /// Records written to the store.
    pub fn committed(&self) -> usize {
        self.created + self.updated + self.partially_accepted
    }
}

/// One changed collection on its way to the store.
struct Pending {
    collection: RepositoryLocationsCollection,
    hashes: FragmentHashes,
    results: Vec<DeserializationResult>,
    parent_id: Option<ObjectId>,
}

impl Pending {
    fn is_ready(&self, info: &TypeInfo) -> bool {
        let rows_valid = self.results.iter().all(DeserializationResult::is_valid);
        if info.is_binding {
            self.parent_id.is_some() && rows_valid
        } else {
            rows_valid
        }
    }

    fn partially_acceptable(&self, info: &TypeInfo) -> bool {
        if info.is_binding {
            self.parent_id.is_some()
        } else {
            self.results
                .iter()
                .all(DeserializationResult::only_optional_mappings_failed)
        }
    }
}

/// Drives change detection, commits and the retry loop for one type.
pub struct UpsertEngine<'a, R, S, H> {
    ctx: SyncContext<'a, R, S, H>,
    deserializer: &'a Deserializer,
}

impl<'a, R, S, H> UpsertEngine<'a, R, S, H>
where
    R: RepositoryReader,
    S: TargetStore,
    H: HashStore,
{
    /// Creates an engine over the given context.
    pub fn new(ctx: SyncContext<'a, R, S, H>, deserializer: &'a Deserializer) -> Self {
        Self { ctx, deserializer }
    }

    /// Upserts every changed record of `object_type`.
    ///
    /// Only cancellation and repository listing failures abort the run;
    /// per-record problems are reported and counted.
    pub fn run(&mut self, object_type: &str) -> SyncResult<UpsertSummary> {
        let info = self.ctx.registry.require(object_type)?.clone();
        let mut summary = UpsertSummary::new(object_type);
        self.ctx.cancel.check()?;

        let changed = self.changed_collections(&info, &mut summary)?;
        if changed.is_empty() {
            debug!("No changed {} records ({} skipped)", object_type, summary.skipped);
            return Ok(summary);
        }

        summary.passes = 1;
        let mut queue = Vec::new();
        for (collection, hashes) in changed {
            self.ctx.cancel.check()?;
            let results = match self.deserializer.deserialize(
                self.ctx.repository,
                &*self.ctx.store,
                self.ctx.resolver,
                &collection,
            ) {
                Ok(results) => results,
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    self.fail(&info, &collection.code_name, ProgressAction::Create, &e, &mut summary);
                    continue;
                }
            };
            let mut item = Pending {
                collection,
                hashes,
                results,
                parent_id: None,
            };
            if let Err(e) = self.resolve_parent(&info, &mut item) {
                self.fail(&info, &item.collection.code_name, ProgressAction::Create, &e, &mut summary);
                continue;
            }
            if item.is_ready(&info) {
                self.commit(&info, item, false, &mut summary)?;
            } else {
                queue.push(item);
            }
        }

        while !queue.is_empty() {
            if self
                .ctx
                .config
                .max_passes
                .is_some_and(|max| summary.passes >= max)
            {
                debug!("Pass limit reached for {}", object_type);
                break;
            }
            self.ctx.cancel.check()?;
            summary.passes += 1;

            let before = queue.len();
            let mut next = Vec::with_capacity(before);
            for mut item in queue {
                self.ctx.cancel.check()?;
                if let Err(e) = self.refresh(&info, &mut item) {
                    if e.is_cancellation() {
                        return Err(e);
                    }
                    self.fail(&info, &item.collection.code_name, ProgressAction::Create, &e, &mut summary);
                    continue;
                }
                if item.is_ready(&info) {
                    self.commit(&info, item, false, &mut summary)?;
                } else {
                    next.push(item);
                }
            }
            queue = next;
            debug!(
                "Pass {} for {}: {} of {} queued records still unresolved",
                summary.passes,
                object_type,
                queue.len(),
                before
            );
            if queue.len() == before {
                break;
            }
        }

        if self.ctx.config.allow_partial_acceptance {
            let mut rest = Vec::with_capacity(queue.len());
            for item in queue {
                self.ctx.cancel.check()?;
                if item.partially_acceptable(&info) {
                    self.commit(&info, item, true, &mut summary)?;
                } else {
                    rest.push(item);
                }
            }
            queue = rest;
        }

        for item in &queue {
            self.report_unresolved(&info, item, &mut summary);
        }

        info!(
            "Upserted {}: {} created, {} updated, {} partial, {} failed, {} skipped in {} passes",
            object_type,
            summary.created,
            summary.updated,
            summary.partially_accepted,
            summary.failed,
            summary.skipped,
            summary.passes
        );
        Ok(summary)
    }

    fn changed_collections(
        &mut self,
        info: &TypeInfo,
        summary: &mut UpsertSummary,
    ) -> SyncResult<Vec<(RepositoryLocationsCollection, FragmentHashes)>> {
        let collections = self.ctx.repository.collections(info)?;
        let mut changed = Vec::new();
        for collection in collections {
            self.ctx.cancel.check()?;
            let current = match current_hashes(self.ctx.repository, &collection) {
                Ok(current) => current,
                Err(e) => {
                    self.fail(info, &collection.code_name, ProgressAction::Create, &e, summary);
                    continue;
                }
            };
            if has_changed(&*self.ctx.hashes, &current) {
                changed.push((collection, current));
            } else {
                debug!("Skipping unchanged {} '{}'", info.object_type, collection.code_name);
                for location in collection.locations() {
                    self.ctx.repository.evict(location);
                }
                summary.skipped += 1;
            }
        }
        Ok(changed)
    }

    fn resolve_parent(&mut self, info: &TypeInfo, item: &mut Pending) -> SyncResult<()> {
        if !info.is_binding || item.parent_id.is_some() {
            return Ok(());
        }
        let Some(parent) = &info.parent else {
            return Err(SchemaError::BindingWithoutParent(info.object_type.clone()).into());
        };
        let parent_info = self.ctx.registry.require(&parent.object_type)?;
        item.parent_id =
            self.ctx
                .resolver
                .resolve(&*self.ctx.store, parent_info, &item.collection.code_name)?;
        Ok(())
    }

    fn refresh(&mut self, info: &TypeInfo, item: &mut Pending) -> SyncResult<()> {
        for result in &mut item.results {
            self.ctx
                .resolver
                .retry(&*self.ctx.store, self.ctx.registry, result)?;
        }
        self.resolve_parent(info, item)
    }

    fn commit(
        &mut self,
        info: &Arc<TypeInfo>,
        item: Pending,
        partial: bool,
        summary: &mut UpsertSummary,
    ) -> SyncResult<()> {
        if info.is_binding {
            return self.commit_binding_group(info, item, partial, summary);
        }

        let Pending {
            collection,
            hashes,
            results,
            ..
        } = item;
        for result in results {
            let identity = result.record.identity();
            match self.write_record(info, &result.record) {
                Ok(action) => {
                    self.record_hashes(&hashes);
                    if partial {
                        let message = format!("committed without {}", result.failure_summary());
                        warn!("Partially accepted {} '{}': {}", info.object_type, identity, message);
                        self.ctx.report(Severity::Warning, action, &info.object_type, &identity, message);
                        summary.partially_accepted += 1;
                    } else {
                        info!("{:?} {} '{}'", action, info.object_type, identity);
                        self.ctx.report(Severity::Info, action, &info.object_type, &identity, past_tense(action));
                        count(summary, action);
                    }
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    let wrapped = SyncError::commit(&info.object_type, &identity, e);
                    let action = self.intended_action(info, &collection.code_name);
                    self.fail(info, &identity, action, &wrapped, summary);
                }
            }
        }
        Ok(())
    }

    fn commit_binding_group(
        &mut self,
        info: &Arc<TypeInfo>,
        item: Pending,
        partial: bool,
        summary: &mut UpsertSummary,
    ) -> SyncResult<()> {
        let identity = item.collection.code_name.clone();
        let Some(parent_id) = item.parent_id else {
            self.report_unresolved(info, &item, summary);
            return Ok(());
        };

        let mut rows = Vec::with_capacity(item.results.len());
        let mut dropped = Vec::new();
        for result in &item.results {
            if result.is_valid() || (partial && result.only_optional_mappings_failed()) {
                rows.push(result.record.clone());
            } else {
                dropped.push(format!("{} ({})", result.record.identity(), result.failure_summary()));
            }
        }

        match self.write_binding_group(info, parent_id, rows) {
            Ok(action) => {
                if dropped.is_empty() {
                    self.record_hashes(&item.hashes);
                }
                if partial && dropped.is_empty() {
                    let message = "committed with optional references unset";
                    warn!("Partially accepted {} for '{}'", info.object_type, identity);
                    self.ctx.report(Severity::Warning, action, &info.object_type, &identity, message);
                    summary.partially_accepted += 1;
                } else if partial {
                    let message = format!("binding rows not restored: {}", dropped.join("; "));
                    error!("Partially restored {} for '{}': {}", info.object_type, identity, message);
                    self.ctx.report(Severity::Error, action, &info.object_type, &identity, message);
                    summary.partially_accepted += 1;
                } else {
                    info!("{:?} {} group '{}'", action, info.object_type, identity);
                    self.ctx.report(Severity::Info, action, &info.object_type, &identity, past_tense(action));
                    count(summary, action);
                }
            }
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                let wrapped = SyncError::commit(&info.object_type, &identity, e);
                self.fail(info, &identity, ProgressAction::Update, &wrapped, summary);
            }
        }
        Ok(())
    }

    /// Inserts or updates one record and records its translation.
    fn write_record(&mut self, info: &TypeInfo, record: &TypedRecord) -> SyncResult<ProgressAction> {
        let Some(code_name) = record.code_name().map(str::to_string) else {
            return Err(SchemaError::MissingCodeName(info.object_type.clone()).into());
        };
        let mut row = record.fields().clone();
        row.remove(&info.id_column);

        if let Some(id) = self
            .ctx
            .resolver
            .resolve(&*self.ctx.store, info, &code_name)?
        {
            let update = WriteOp::Update {
                object_type: info.object_type.clone(),
                id,
                row: row.clone(),
            };
            match self.ctx.store.apply(vec![update]) {
                Ok(_) => {
                    self.ctx.resolver.register(&info.object_type, &code_name, id);
                    return Ok(ProgressAction::Update);
                }
                Err(StoreError::NotFound { .. }) => {
                    debug!("Stale translation for {} '{}'", info.object_type, code_name);
                    self.ctx.resolver.forget(&info.object_type, id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(column) = &info.guid_column {
            if row.get(column).map_or(true, Value::is_null) {
                row.insert(column.clone(), Value::Text(Uuid::new_v4().to_string()));
            }
        }
        let outcome = self.ctx.store.apply(vec![WriteOp::Insert {
            object_type: info.object_type.clone(),
            row,
        }])?;
        let id = outcome
            .ids
            .first()
            .copied()
            .ok_or_else(|| StoreError::Backend("insert reported no id".to_string()))?;
        self.ctx.resolver.register(&info.object_type, &code_name, id);
        Ok(ProgressAction::Create)
    }

    /// Replaces every binding row of one parent in a single batch.
    fn write_binding_group(
        &mut self,
        info: &TypeInfo,
        parent_id: ObjectId,
        records: Vec<TypedRecord>,
    ) -> SyncResult<ProgressAction> {
        let Some(parent) = &info.parent else {
            return Err(SchemaError::BindingWithoutParent(info.object_type.clone()).into());
        };
        let mut batch = Vec::with_capacity(records.len() + 1);
        batch.push(WriteOp::DeleteWhere {
            object_type: info.object_type.clone(),
            condition: WhereCondition::eq(parent.column.clone(), parent_id),
        });
        for record in records {
            let mut row: Row = record.into_row();
            row.remove(&info.id_column);
            row.insert(parent.column.clone(), Value::Integer(parent_id));
            batch.push(WriteOp::Insert {
                object_type: info.object_type.clone(),
                row,
            });
        }
        let outcome = self.ctx.store.apply(batch)?;
        Ok(if outcome.affected > 0 {
            ProgressAction::Update
        } else {
            ProgressAction::Create
        })
    }

    fn record_hashes(&mut self, hashes: &FragmentHashes) {
        for (location, hash) in hashes {
            self.ctx.hashes.set(location, *hash);
        }
    }

    fn report_unresolved(&self, info: &TypeInfo, item: &Pending, summary: &mut UpsertSummary) {
        let mut problems = Vec::new();
        if info.is_binding && item.parent_id.is_none() {
            if let Some(parent) = &info.parent {
                problems.push(format!(
                    "parent {} '{}' not found",
                    parent.object_type, item.collection.code_name
                ));
            }
        }
        for result in item.results.iter().filter(|r| !r.is_valid()) {
            problems.push(result.failure_summary());
            for mapping in &result.failed_mappings {
                if !self.ctx.config.scope.includes(&mapping.referenced_type) {
                    problems.push(format!(
                        "{} is excluded from synchronization scope",
                        mapping.referenced_type
                    ));
                }
            }
        }
        problems.dedup();

        let identity = &item.collection.code_name;
        let message = format!("not restored: {}", problems.join("; "));
        error!("{} '{}' {}", info.object_type, identity, message);
        let action = self.intended_action(info, identity);
        self.ctx.report(Severity::Error, action, &info.object_type, identity, message);
        summary.failed += 1;
    }

    fn fail(
        &self,
        info: &TypeInfo,
        identity: &str,
        action: ProgressAction,
        error: &SyncError,
        summary: &mut UpsertSummary,
    ) {
        error!("{}", error);
        self.ctx.report(Severity::Error, action, &info.object_type, identity, error.to_string());
        summary.failed += 1;
    }

    fn intended_action(&self, info: &TypeInfo, code_name: &str) -> ProgressAction {
        match self.ctx.resolver.cached(&info.object_type, code_name) {
            Some(_) => ProgressAction::Update,
            None => ProgressAction::Create,
        }
    }
}

fn count(summary: &mut UpsertSummary, action: ProgressAction) {
    match action {
        ProgressAction::Create => summary.created += 1,
        ProgressAction::Update => summary.updated += 1,
        ProgressAction::Delete => {}
    }
}

fn past_tense(action: ProgressAction) -> &'static str {
    match action {
        ProgressAction::Create => "created",
        ProgressAction::Update => "updated",
        ProgressAction::Delete => "deleted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::SyncConfig;
    use crate::hash_store::MemoryHashStore;
    use crate::progress::CollectingProgress;
    use crate::repository::MemoryRepository;
    use crate::resolver::ReferenceResolver;
    use crate::store::MemoryStore;
    use objsync_model::{Integrity, SchemaRegistry};

    struct Fixture {
        registry: Arc<SchemaRegistry>,
        repo: MemoryRepository,
        store: MemoryStore,
        hashes: MemoryHashStore,
        resolver: ReferenceResolver,
        progress: CollectingProgress,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(types: Vec<TypeInfo>) -> Self {
            let registry = Arc::new(SchemaRegistry::new(types).unwrap());
            Self {
                store: MemoryStore::new(registry.clone()),
                registry,
                repo: MemoryRepository::new(),
                hashes: MemoryHashStore::new(),
                resolver: ReferenceResolver::new(),
                progress: CollectingProgress::new(),
                cancel: CancellationToken::new(),
            }
        }

        fn run(&mut self, object_type: &str, config: &SyncConfig) -> UpsertSummary {
            let deserializer = Deserializer::new(self.registry.clone());
            let ctx = SyncContext {
                registry: &self.registry,
                repository: &self.repo,
                store: &mut self.store,
                hashes: &mut self.hashes,
                resolver: &mut self.resolver,
                config,
                progress: &self.progress,
                cancel: &self.cancel,
            };
            UpsertEngine::new(ctx, &deserializer).run(object_type).unwrap()
        }
    }

    fn folders() -> Vec<TypeInfo> {
        vec![TypeInfo::new("fs.folder")
            .with_reference("next_id", "fs.folder", Integrity::Required)
            .with_guid_column("guid")]
    }

    #[test]
    fn forward_references_within_one_type_converge() {
        let mut fx = Fixture::new(folders());
        fx.repo.put_record("fs.folder", "a", r#"{"fs.folder": {"next_id": "b"}}"#);
        fx.repo.put_record("fs.folder", "b", r#"{"fs.folder": {"next_id": "c"}}"#);
        fx.repo.put_record("fs.folder", "c", r#"{"fs.folder": {"next_id": null}}"#);

        let summary = fx.run("fs.folder", &SyncConfig::default());
        assert_eq!(summary.created, 3);
        assert_eq!(summary.passes, 3);
        assert_eq!(summary.failed, 0);

        let a = fx.store.find_by_code_name("fs.folder", "a").unwrap();
        let b = fx.store.find_by_code_name("fs.folder", "b").unwrap();
        assert_eq!(a["next_id"], b["id"]);
        assert!(matches!(a["guid"], Value::Text(_)));
        assert_eq!(fx.hashes.len(), 3);
    }

    #[test]
    fn pass_limit_stops_early() {
        let mut fx = Fixture::new(folders());
        fx.repo.put_record("fs.folder", "a", r#"{"fs.folder": {"next_id": "b"}}"#);
        fx.repo.put_record("fs.folder", "b", r#"{"fs.folder": {"next_id": "c"}}"#);
        fx.repo.put_record("fs.folder", "c", r#"{"fs.folder": {}}"#);

        let summary = fx.run("fs.folder", &SyncConfig::default().with_max_passes(2));
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 1);
        assert!(fx.store.find_by_code_name("fs.folder", "a").is_none());
    }

    #[test]
    fn partial_acceptance_can_be_disabled() {
        let types = vec![
            TypeInfo::new("blog.tag"),
            TypeInfo::new("blog.article")
                .with_reference("tag_id", "blog.tag", Integrity::NotRequired),
        ];
        let mut fx = Fixture::new(types.clone());
        fx.repo.put_record("blog.article", "hello", r#"{"blog.article": {"tag_id": "missing"}}"#);
        let summary = fx.run(
            "blog.article",
            &SyncConfig::default().with_partial_acceptance(false),
        );
        assert_eq!(summary.failed, 1);
        assert_eq!(fx.store.count("blog.article"), 0);

        let mut fx = Fixture::new(types);
        fx.repo.put_record("blog.article", "hello", r#"{"blog.article": {"tag_id": "missing"}}"#);
        let summary = fx.run("blog.article", &SyncConfig::default());
        assert_eq!(summary.partially_accepted, 1);
        assert!(fx.store.find_by_code_name("blog.article", "hello").unwrap()["tag_id"].is_null());
        assert_eq!(fx.hashes.len(), 1);
        assert_eq!(fx.progress.with_severity(Severity::Warning).len(), 1);

        let summary = fx.run("blog.article", &SyncConfig::default());
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.partially_accepted, 0);
    }

    #[test]
    fn excluded_reference_types_are_explained() {
        let mut fx = Fixture::new(vec![
            TypeInfo::new("cms.user"),
            TypeInfo::new("cms.page").with_reference("owner_id", "cms.user", Integrity::Required),
        ]);
        fx.repo.put_record("cms.page", "home", r#"{"cms.page": {"owner_id": "root"}}"#);
        let config = SyncConfig::default().with_scope(crate::config::SyncScope::all().exclude("cms.user"));
        let summary = fx.run("cms.page", &config);
        assert_eq!(summary.failed, 1);
        let errors = fx.progress.with_severity(Severity::Error);
        assert!(errors[0].message.contains("cms.user is excluded from synchronization scope"));
    }

    #[test]
    fn stale_translation_falls_back_to_insert() {
        let mut fx = Fixture::new(vec![TypeInfo::new("blog.tag")]);
        fx.resolver.register("blog.tag", "rust", 42);
        fx.repo.put_record("blog.tag", "rust", r#"{"blog.tag": {"title": "Rust"}}"#);
        let summary = fx.run("blog.tag", &SyncConfig::default());
        assert_eq!(summary.created, 1);
        assert_ne!(fx.resolver.cached("blog.tag", "rust"), Some(42));
    }
}
