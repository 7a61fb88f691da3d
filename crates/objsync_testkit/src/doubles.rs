//! Store and progress doubles for failure injection.

use objsync_engine::{
    BatchOutcome, CancellationToken, CollectingProgress, MemoryStore, ProgressEvent,
    ProgressSink, StoreError, StoreResult, TargetStore, WriteOp,
};
use objsync_model::{Row, Value, WhereCondition};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A memory store that rejects writes of selected code names.
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: BTreeSet<String>,
    rejected: usize,
}

impl FlakyStore {
    /// Wraps a store.
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: BTreeSet::new(),
            rejected: 0,
        }
    }

    /// Rejects every batch that writes a row with this code name.
    pub fn fail_code_name(mut self, code_name: impl Into<String>) -> Self {
        self.failing.insert(code_name.into());
        self
    }

    /// Stops rejecting writes.
    pub fn heal(&mut self) {
        self.failing.clear();
    }

    /// Number of rejected batches.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// The wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn rejects(&self, row: &Row) -> Option<String> {
        row.get("code_name")
            .and_then(Value::as_text)
            .filter(|code| self.failing.contains(*code))
            .map(str::to_string)
    }
}

impl TargetStore for FlakyStore {
    fn apply(&mut self, batch: Vec<WriteOp>) -> StoreResult<BatchOutcome> {
        let rejected = batch.iter().find_map(|op| match op {
            WriteOp::Insert { row, .. } | WriteOp::Update { row, .. } => self.rejects(row),
            _ => None,
        });
        if let Some(code) = rejected {
            self.rejected += 1;
            return Err(StoreError::Backend(format!("injected failure for '{code}'")));
        }
        self.inner.apply(batch)
    }

    fn query(&self, object_type: &str, condition: &WhereCondition) -> StoreResult<Vec<Row>> {
        self.inner.query(object_type, condition)
    }
}

/// A progress sink that cancels a token after a number of events.
#[derive(Debug)]
pub struct CancelAfter {
    token: CancellationToken,
    after: usize,
    seen: AtomicUsize,
    events: CollectingProgress,
}

impl CancelAfter {
    /// Cancels `token` once `after` events were reported.
    pub fn new(token: CancellationToken, after: usize) -> Self {
        Self {
            token,
            after,
            seen: AtomicUsize::new(0),
            events: CollectingProgress::new(),
        }
    }

    /// Events reported so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.events()
    }
}

impl ProgressSink for CancelAfter {
    fn report(&self, event: ProgressEvent) {
        self.events.report(event);
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
    }
}
