//! # GenSync Testkit
//!
//! Test utilities for GenSync.
//!
//! This crate provides:
//! - Sample A-side (`Person`) and B-side (`Contact`) entities with a mapper
//!   and matching rules
//! - Repository pairs wired to an in-memory or file-backed relation store
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gensync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn creates_missing_contacts() {
//!     let fx = SyncFixture::memory();
//!     fx.people.insert(Person::new("Homer", 49));
//!     fx.synchronizer(SyncConfig::new("test")).synchronize().await.unwrap();
//!     assert_eq!(fx.contacts.len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod entities;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::entities::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use gensync_engine::{
        ConflictPolicy, Direction, InjectedFailure, Operation, SyncConfig, SyncMode,
    };
}

pub use entities::*;
pub use fixtures::*;
pub use generators::*;
