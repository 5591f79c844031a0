//! Content-addressed blob storage for kvault.
//!
//! Blobs are opaque files keyed by `(namespace, digest)` and laid out as
//! `<base>/<namespace>/<digest[0:2]>/<digest[2:]>`. The two-character fan-out
//! keeps directory sizes bounded for large collections.
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written. Equal digests mean equal content, so
//!    a write for a digest already present is a no-op.
//! 2. Uploads land in `<namespace>/.tmp` first and are renamed into place;
//!    the temp file is removed whether the upload succeeds or fails.
//! 3. Deleting a namespace first proves its directory lies inside the
//!    storage root.
//! 4. All I/O errors are propagated with the path they occurred on.

pub mod engine;
pub mod traits;

pub use engine::BlobEngine;
pub use traits::BlobStore;
