//! Progress reporting.

use parking_lot::Mutex;
use std::fmt;

/// Severity of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Normal progress.
    Info,
    /// Record committed with caveats.
    Warning,
    /// Record or instruction failed.
    Error,
}

/// Action a progress event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressAction {
    /// Object created.
    Create,
    /// Object updated.
    Update,
    /// Object deleted.
    Delete,
}

/// A single progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Human readable message.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Action.
    pub action: ProgressAction,
    /// Object type.
    pub object_type: String,
    /// Object identity (code name or binding columns).
    pub identity: String,
}

impl ProgressEvent {
    /// Creates an event.
    pub fn new(
        severity: Severity,
        action: ProgressAction,
        object_type: impl Into<String>,
        identity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            severity,
            action,
            object_type: object_type.into(),
            identity: identity.into(),
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} {} '{}': {}",
            self.severity, self.action, self.object_type, self.identity, self.message
        )
    }
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    /// Reports one event.
    fn report(&self, event: ProgressEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match event.severity {
            Severity::Info => tracing::info!(
                object_type = %event.object_type,
                identity = %event.identity,
                action = ?event.action,
                "{}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                object_type = %event.object_type,
                identity = %event.identity,
                action = ?event.action,
                "{}",
                event.message
            ),
            Severity::Error => tracing::error!(
                object_type = %event.object_type,
                identity = %event.identity,
                action = ?event.action,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Events with the given severity.
    pub fn with_severity(&self, severity: Severity) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity == severity)
            .cloned()
            .collect()
    }

    /// Number of events with the given severity and action.
    pub fn count(&self, severity: Severity, action: ProgressAction) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity == severity && e.action == action)
            .count()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ProgressSink for CollectingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

impl<P: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<P> {
    fn report(&self, event: ProgressEvent) {
        (**self).report(event);
    }
}
