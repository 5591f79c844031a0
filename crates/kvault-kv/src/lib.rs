//! Namespaced key-value storage for kvault.
//!
//! Each namespace is one JSON document at `<base>/<namespace>.json`, mapping
//! keys to tagged [`Value`](kvault_types::Value) envelopes. Every mutation
//! rewrites the whole document through a temp file and an atomic rename, so
//! readers (in this process or on another node sharing the directory) never
//! see a partial document.
//!
//! # Modules
//!
//! - [`document`]: [`Document`] and the [`AtomicDocumentStore`] that loads
//!   and replaces document files
//! - [`cache`]: [`DocumentCache`] of parsed documents keyed by path and
//!   modification time, and the [`TimestampTable`] the change watcher
//!   consults
//! - [`traits`]: the [`KeyValueStore`] interface
//! - [`engine`]: [`KeyValueEngine`], the filesystem implementation
//!
//! # Concurrency
//!
//! Operations on one namespace are serialized by that namespace's stripe
//! lock; operations on namespaces that hash to different stripes run in
//! parallel. Across processes the only coordination is the modification
//! time comparison on every read plus watcher-driven cache eviction.

pub mod cache;
pub mod document;
pub mod engine;
pub mod traits;

pub use cache::{DocumentCache, TimestampTable};
pub use document::{AtomicDocumentStore, Document};
pub use engine::KeyValueEngine;
pub use traits::{EntryStream, IdStream, KeyValueStore};
