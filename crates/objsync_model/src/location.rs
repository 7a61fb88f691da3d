//! Handles to stored fragments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to one stored fragment.
///
/// The key is interpreted only by the repository that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryLocation {
    /// Type the fragment belongs to.
    pub object_type: String,
    /// Repository-specific key.
    pub key: String,
}

impl RepositoryLocation {
    /// Creates a location.
    pub fn new(object_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for RepositoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// An auxiliary fragment holding one large field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuxiliaryLocation {
    /// Field stored in the fragment.
    pub field: String,
    /// Fragment handle.
    pub location: RepositoryLocation,
}

/// All fragments that make up one logical record.
///
/// For binding types the collection holds every binding row of one parent
/// and `code_name` is the parent's code name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryLocationsCollection {
    /// Object type.
    pub object_type: String,
    /// Code name of the record (or binding parent).
    pub code_name: String,
    /// Main fragment.
    pub main: RepositoryLocation,
    /// Auxiliary fragments.
    pub auxiliary: Vec<AuxiliaryLocation>,
}

impl RepositoryLocationsCollection {
    /// Creates a collection with only a main fragment.
    pub fn new(code_name: impl Into<String>, main: RepositoryLocation) -> Self {
        Self {
            object_type: main.object_type.clone(),
            code_name: code_name.into(),
            main,
            auxiliary: Vec::new(),
        }
    }

    /// Adds an auxiliary fragment.
    pub fn with_auxiliary(mut self, field: impl Into<String>, location: RepositoryLocation) -> Self {
        self.auxiliary.push(AuxiliaryLocation {
            field: field.into(),
            location,
        });
        self
    }

    /// Auxiliary fragment for `field`.
    pub fn auxiliary_for(&self, field: &str) -> Option<&RepositoryLocation> {
        self.auxiliary
            .iter()
            .find(|a| a.field == field)
            .map(|a| &a.location)
    }

    /// Main fragment followed by every auxiliary fragment.
    pub fn locations(&self) -> impl Iterator<Item = &RepositoryLocation> {
        std::iter::once(&self.main).chain(self.auxiliary.iter().map(|a| &a.location))
    }
}
