//! # objsync testkit
//!
//! Test utilities for objsync.
//!
//! This crate provides:
//! - Sample schemas (blog, hierarchy, templates, chains)
//! - Fragment builders and a temporary filesystem repository
//! - Job helpers over in-memory repository, store and hash store
//! - Store and progress doubles for failure and cancellation tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objsync_testkit::prelude::*;
//!
//! #[test]
//! fn restores_blog() {
//!     let mut job = memory_job(blog_schema());
//!     job.repository().put_record("blog.tag", "rust", record_json("blog.tag", &[]));
//!     job.run_type("blog.tag").unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod doubles;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::doubles::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use doubles::*;
pub use fixtures::*;
pub use generators::*;
