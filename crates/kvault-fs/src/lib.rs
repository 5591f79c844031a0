//! Filesystem plumbing shared by the kvault key-value and blob engines.
//!
//! # Modules
//!
//! - [`error`]: [`StorageError`] and its three caller-facing categories
//! - [`resolver`]: [`PathResolver`]: namespace/digest to path, with
//!   containment checks against the storage root
//! - [`locks`]: [`StripedLockRegistry`]: one mutex per namespace, drawn from
//!   a fixed pool
//! - [`atomic`]: temp-file + rename writes that readers never observe
//!   half-done
//! - [`config`]: [`StoreConfig`] for one logical store
//!
//! # Design Rules
//!
//! 1. Every path handed to the filesystem has passed the resolver's
//!    containment check.
//! 2. Files are replaced whole, never appended to or edited in place.
//! 3. All I/O errors carry the path they occurred on and are propagated.

pub mod atomic;
pub mod config;
pub mod error;
pub mod locks;
pub mod resolver;

pub use config::StoreConfig;
pub use error::{ErrorKind, IoResultExt, StorageError, StorageResult};
pub use locks::{StripeGuard, StripedLockRegistry};
pub use resolver::PathResolver;
