//! Error types for schema construction.

use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while building a [`crate::SchemaRegistry`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The same type was registered twice.
    #[error("duplicate object type: {0}")]
    DuplicateType(String),

    /// A type name was not registered.
    #[error("unknown object type: {0}")]
    UnknownType(String),

    /// A foreign key points at a type that is not registered.
    #[error("{object_type}.{column} references unknown type {target}")]
    UnknownReference {
        /// Type declaring the reference.
        object_type: String,
        /// Foreign-key column.
        column: String,
        /// Referenced type name.
        target: String,
    },

    /// A reference is declared on a type other than its dependent type.
    #[error("reference on {column} is declared by {declared_by} but names {dependent_type} as dependent")]
    ReferenceOwnerMismatch {
        /// Type the reference is attached to.
        declared_by: String,
        /// Dependent type named in the reference.
        dependent_type: String,
        /// Foreign-key column.
        column: String,
    },

    /// A binding type has no parent column.
    #[error("binding type {0} has no parent reference")]
    BindingWithoutParent(String),

    /// A non-binding type has no code name column.
    #[error("object type {0} has no code name column")]
    MissingCodeName(String),
}
