//! Configuration for restore jobs.

use std::collections::BTreeSet;

/// Which object types take part in synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncScope {
    /// When set, only these types are synchronized.
    pub included_types: Option<BTreeSet<String>>,
    /// Types that are never synchronized.
    pub excluded_types: BTreeSet<String>,
}

impl SyncScope {
    /// A scope that includes every type.
    pub fn all() -> Self {
        Self::default()
    }

    /// A scope limited to the given types.
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            included_types: Some(types.into_iter().map(Into::into).collect()),
            excluded_types: BTreeSet::new(),
        }
    }

    /// Excludes one more type.
    pub fn exclude(mut self, object_type: impl Into<String>) -> Self {
        self.excluded_types.insert(object_type.into());
        self
    }

    /// Whether `object_type` is synchronized.
    pub fn includes(&self, object_type: &str) -> bool {
        if self.excluded_types.contains(object_type) {
            return false;
        }
        match &self.included_types {
            Some(included) => included.contains(object_type),
            None => true,
        }
    }
}

/// Configuration for restore operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether to delete store objects that are absent from the file set.
    pub delete_missing: bool,
    /// Whether records with only optional references unresolved may be
    /// committed with those columns unset.
    pub allow_partial_acceptance: bool,
    /// Upper bound on retry passes, on top of the fixed-point rule.
    pub max_passes: Option<usize>,
    /// Synchronization scope.
    pub scope: SyncScope,
    /// Maximum number of fragments kept by the content cache.
    pub fragment_cache_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            delete_missing: true,
            allow_partial_acceptance: true,
            max_passes: None,
            scope: SyncScope::all(),
            fragment_cache_capacity: 1024,
        }
    }

    /// Sets whether missing objects are deleted.
    pub fn with_delete_missing(mut self, value: bool) -> Self {
        self.delete_missing = value;
        self
    }

    /// Sets whether partial acceptance is enabled.
    pub fn with_partial_acceptance(mut self, value: bool) -> Self {
        self.allow_partial_acceptance = value;
        self
    }

    /// Caps the number of retry passes.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = Some(passes);
        self
    }

    /// Sets the synchronization scope.
    pub fn with_scope(mut self, scope: SyncScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the fragment cache capacity.
    pub fn with_fragment_cache_capacity(mut self, capacity: usize) -> Self {
        self.fragment_cache_capacity = capacity;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = SyncConfig::new()
            .with_delete_missing(false)
            .with_partial_acceptance(false)
            .with_max_passes(4)
            .with_fragment_cache_capacity(8);

        assert!(!config.delete_missing);
        assert!(!config.allow_partial_acceptance);
        assert_eq!(config.max_passes, Some(4));
        assert_eq!(config.fragment_cache_capacity, 8);
    }

    #[test]
    fn scope_rules() {
        let scope = SyncScope::all().exclude("cms.user");
        assert!(scope.includes("cms.role"));
        assert!(!scope.includes("cms.user"));

        let scope = SyncScope::only(["cms.role"]);
        assert!(scope.includes("cms.role"));
        assert!(!scope.includes("cms.user"));
    }
}
