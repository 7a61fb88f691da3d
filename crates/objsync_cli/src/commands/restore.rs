//! Restore command implementation.

use super::{load_schema, load_store, save_store};
use objsync_engine::{
    CachingRepository, FileHashStore, FsRepository, HashStore, MemoryHashStore, MemoryStore,
    RestoreJob, RestoreReport, SyncConfig, SyncScope,
};
use objsync_model::SchemaRegistry;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Restore options taken from the command line.
#[derive(Debug, Default)]
pub struct RestoreOptions {
    /// Restore only these types (all when empty).
    pub types: Vec<String>,
    /// Never synchronize these types.
    pub exclude: Vec<String>,
    /// Delete store objects that are absent from the repository.
    pub delete_missing: bool,
    /// Commit records whose only failures are optional references.
    pub allow_partial_acceptance: bool,
    /// Upper bound on retry passes.
    pub max_passes: Option<usize>,
    /// Leave the store and hash table untouched.
    pub dry_run: bool,
}

impl RestoreOptions {
    fn config(&self) -> SyncConfig {
        let mut scope = if self.types.is_empty() {
            SyncScope::all()
        } else {
            SyncScope::only(self.types.iter().cloned())
        };
        for object_type in &self.exclude {
            scope = scope.exclude(object_type.clone());
        }
        let mut config = SyncConfig::new()
            .with_delete_missing(self.delete_missing)
            .with_partial_acceptance(self.allow_partial_acceptance)
            .with_scope(scope);
        if let Some(passes) = self.max_passes {
            config = config.with_max_passes(passes);
        }
        config
    }
}

/// One line of the restore summary.
#[derive(Debug, Serialize)]
pub struct TypeSummary {
    /// Object type.
    pub object_type: String,
    /// Unchanged records.
    pub skipped: usize,
    /// Inserted records.
    pub created: usize,
    /// Updated records.
    pub updated: usize,
    /// Records committed with optional references unset.
    pub partially_accepted: usize,
    /// Records that could not be restored.
    pub failed: usize,
    /// Retry passes used.
    pub passes: usize,
    /// Objects removed by the delete phase.
    pub deleted: usize,
    /// Objects the delete phase could not remove.
    pub delete_failed: usize,
}

impl From<&RestoreReport> for TypeSummary {
    fn from(report: &RestoreReport) -> Self {
        let delete = report.delete.clone().unwrap_or_default();
        Self {
            object_type: report.object_type.clone(),
            skipped: report.upsert.skipped,
            created: report.upsert.created,
            updated: report.upsert.updated,
            partially_accepted: report.upsert.partially_accepted,
            failed: report.upsert.failed,
            passes: report.upsert.passes,
            deleted: delete.deleted,
            delete_failed: delete.failed,
        }
    }
}

/// Runs the restore command.
pub fn run(
    repo: &Path,
    schema: &Path,
    store_path: &Path,
    hashes_path: &Path,
    options: &RestoreOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !repo.is_dir() {
        return Err(format!("Repository directory not found: {:?}", repo).into());
    }
    let registry = load_schema(schema)?;
    for object_type in options.types.iter().chain(options.exclude.iter()) {
        registry.require(object_type)?;
    }
    let store = load_store(registry.clone(), store_path)?;
    let config = options.config();
    let hashes = FileHashStore::open(hashes_path)?;

    let (summaries, store) = if options.dry_run {
        println!("(dry run - no changes will be saved)");
        let detached = detach(&hashes, &registry);
        drop(hashes);
        restore(registry, repo, store, detached, config, &options.types)?
    } else {
        restore(registry, repo, store, hashes, config, &options.types)?
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summaries)?),
        _ => print_text(&summaries),
    }

    if !options.dry_run {
        save_store(&store, store_path)?;
    }

    let failed: usize = summaries.iter().map(|s| s.failed + s.delete_failed).sum();
    if failed > 0 {
        return Err(format!("{} records could not be synchronized", failed).into());
    }
    Ok(())
}

fn restore<H: HashStore>(
    registry: Arc<SchemaRegistry>,
    repo: &Path,
    store: MemoryStore,
    hashes: H,
    config: SyncConfig,
    types: &[String],
) -> Result<(Vec<TypeSummary>, MemoryStore), Box<dyn std::error::Error>> {
    let repository = CachingRepository::new(FsRepository::new(repo), config.fragment_cache_capacity);
    let mut job = RestoreJob::new(registry, repository, store, hashes, config);

    let reports = if types.is_empty() {
        job.run_all()?
    } else {
        let order: Vec<String> = job
            .registry()
            .restore_order()
            .into_iter()
            .filter(|t| types.contains(t))
            .collect();
        let mut reports = Vec::with_capacity(order.len());
        for object_type in &order {
            reports.push(job.run_type(object_type)?);
        }
        reports
    };

    let summaries = reports.iter().map(TypeSummary::from).collect();
    let (store, _) = job.into_parts();
    Ok((summaries, store))
}

/// Copies recorded hashes into memory so a dry run never writes them back.
fn detach(hashes: &FileHashStore, registry: &SchemaRegistry) -> MemoryHashStore {
    let mut memory = MemoryHashStore::new();
    for info in registry.types() {
        for location in hashes.locations(&info.object_type) {
            if let Some(hash) = hashes.get(&location) {
                memory.set(&location, hash);
            }
        }
    }
    memory
}

fn print_text(summaries: &[TypeSummary]) {
    println!(
        "{:<32} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7}",
        "Type", "Skipped", "Created", "Updated", "Partial", "Failed", "Deleted", "Passes"
    );
    for s in summaries {
        println!(
            "{:<32} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7}",
            s.object_type,
            s.skipped,
            s.created,
            s.updated,
            s.partially_accepted,
            s.failed + s.delete_failed,
            s.deleted,
            s.passes
        );
    }
}
