//! Foundation types for kvault.
//!
//! Every other kvault crate depends on `kvault-types`. Nothing here touches
//! the filesystem except [`Digest::of_file`].
//!
//! # Key Types
//!
//! - [`NamespaceId`]: validated name of one key-value document or blob collection
//! - [`Digest`]: content hash used as a blob's primary key
//! - [`Value`]: tagged envelope that persists heterogeneous values and
//!   reconstructs their shape on read

pub mod digest;
pub mod error;
pub mod namespace;
pub mod value;

pub use digest::Digest;
pub use error::TypeError;
pub use namespace::NamespaceId;
pub use value::Value;
