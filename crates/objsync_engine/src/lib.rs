//! # objsync engine
//!
//! Keeps a file snapshot of typed records consistent with a relational
//! store.
//!
//! This crate provides:
//! - Repository readers (filesystem, memory, bounded content cache)
//! - Hash stores for change detection (memory, locked JSON file)
//! - Reference resolver translating code names to identifiers
//! - Deserializer for single records, structured fields and bindings
//! - Upsert engine with a retry loop that runs to a fixed point
//! - Dependency resolver computing removal instructions
//! - Removal executor with bulk batches and per-object delete hooks
//! - Restore jobs sequencing upsert and delete phases
//!
//! ## Architecture
//!
//! A restore of one type runs in two phases:
//! 1. Upsert changed records, queueing those with forward references and
//!    retrying them until a pass makes no progress
//! 2. Delete store objects whose code name has no fragment any more
//!
//! ## Key Invariants
//!
//! - Unchanged records are never read or written
//! - A record with an unresolved required reference is never committed
//! - One bad record never aborts the batch; only cancellation does
//! - Hashes are recorded only after a complete commit
//! - Dependency traversal never expands a type already on its path

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod context;
mod dependencies;
mod deserializer;
mod error;
mod hash_store;
mod job;
mod progress;
mod removal;
mod repository;
mod resolver;
mod store;
mod upsert;

pub use cancel::CancellationToken;
pub use config::{SyncConfig, SyncScope};
pub use context::SyncContext;
pub use dependencies::DependencyResolver;
pub use deserializer::{
    ConcatenatedFieldPreprocessor, Deserializer, FieldTree, FragmentSource, RecordPreprocessor,
};
pub use error::{SyncError, SyncResult};
pub use hash_store::{current_hashes, has_changed, FileHashStore, FragmentHashes, HashStore, MemoryHashStore};
pub use job::{DeleteSummary, RestoreJob, RestoreReport};
pub use progress::{
    CollectingProgress, ProgressAction, ProgressEvent, ProgressSink, Severity, TracingProgress,
};
pub use removal::{DeleteHook, HookRegistry, RemovalExecutor, RemovalStats};
pub use repository::{
    auxiliary_key, main_key, CachingRepository, ContentHash, FsRepository, MemoryRepository,
    RepositoryReader,
};
pub use resolver::ReferenceResolver;
pub use store::{BatchOutcome, MemoryStore, StoreError, StoreResult, StoreSnapshot, TargetStore, WriteOp};
pub use upsert::{UpsertEngine, UpsertSummary};
