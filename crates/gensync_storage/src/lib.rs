//! # GenSync Storage
//!
//! State store trait and implementations for GenSync.
//!
//! This crate provides the lowest-level persistence abstraction for GenSync.
//! State stores are **opaque blob stores** - they do not interpret the data
//! they hold. The sync engine owns the encoding of relation data.
//!
//! ## Design Principles
//!
//! - A store holds exactly one blob, replaced as a whole on every save
//! - A failed save never destroys the previously saved blob
//! - Must be `Send + Sync` so a synchronizer can be shared across tasks
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral profiles
//! - [`FileStore`] - For persistent storage using write-then-rename
//!
//! ## Example
//!
//! ```rust
//! use gensync_storage::{InMemoryStore, StateStore};
//!
//! let store = InMemoryStore::new();
//! assert!(store.load().unwrap().is_none());
//! store.save(b"relations").unwrap();
//! assert_eq!(store.load().unwrap().as_deref(), Some(&b"relations"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StateStore;
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
