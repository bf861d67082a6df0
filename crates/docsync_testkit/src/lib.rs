//! # docsync Testkit
//!
//! Test utilities for docsync.
//!
//! This crate provides:
//! - A fixture object model and datastore helpers
//! - Property-based test generators using proptest
//! - In-process replication and convergence assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_datastore() {
//!     with_temp_datastore(|ds| {
//!         let mut entry = sample_entry("hello");
//!         ds.save_object(&mut entry, None).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
