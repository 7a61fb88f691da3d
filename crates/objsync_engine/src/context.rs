//! Shared state borrowed by the restore phases.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::progress::{ProgressAction, ProgressEvent, ProgressSink, Severity};
use crate::resolver::ReferenceResolver;
use objsync_model::SchemaRegistry;

/// Everything one phase of a restore job works with.
///
/// The resolver and hash store are mutated in place, so a later pass or
/// phase always sees earlier commits.
pub struct SyncContext<'a, R, S, H> {
    /// Type metadata.
    pub registry: &'a SchemaRegistry,
    /// Fragment source.
    pub repository: &'a R,
    /// Target store.
    pub store: &'a mut S,
    /// Recorded fragment hashes.
    pub hashes: &'a mut H,
    /// Code name translations.
    pub resolver: &'a mut ReferenceResolver,
    /// Job configuration.
    pub config: &'a SyncConfig,
    /// Progress receiver.
    pub progress: &'a dyn ProgressSink,
    /// Cancellation flag.
    pub cancel: &'a CancellationToken,
}

impl<R, S, H> SyncContext<'_, R, S, H> {
    pub(crate) fn report(
        &self,
        severity: Severity,
        action: ProgressAction,
        object_type: &str,
        identity: &str,
        message: impl Into<String>,
    ) {
        self.progress.report(ProgressEvent::new(
            severity,
            action,
            object_type,
            identity,
            message,
        ));
    }
}
