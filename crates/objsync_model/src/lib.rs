//! # objsync model
//!
//! Data model shared by the objsync engine, testkit and CLI.
//!
//! This crate provides:
//! - `TypeInfo` and dependency references (static, dynamic, parent/site)
//! - `SchemaRegistry` with a reverse dependency index and restore ordering
//! - `TypedRecord` and `DeserializationResult`
//! - `RepositoryLocation` handles for stored fragments
//! - `WhereCondition` and `RemoveDependencyInfo` removal instructions
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod condition;
mod error;
mod location;
mod record;
mod registry;
mod removal;
mod schema;
mod value;

pub use condition::{is_strict_descendant, WhereCondition};
pub use error::{SchemaError, SchemaResult};
pub use location::{AuxiliaryLocation, RepositoryLocation, RepositoryLocationsCollection};
pub use record::{DeserializationResult, FailedMapping, TypedRecord};
pub use registry::SchemaRegistry;
pub use removal::{ExecutionStrategy, RemoveAction, RemoveDependencyInfo};
pub use schema::{
    ApiRequirements, ColumnReference, DependencyReference, DynamicDependencyReference, Integrity,
    TypeInfo,
};
pub use value::{ObjectId, Row, Value};
