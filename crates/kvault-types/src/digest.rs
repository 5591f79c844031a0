use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Minimum digest length. The first two characters select the fan-out
/// directory and the remainder names the file, which must be non-empty.
pub const MIN_DIGEST_LEN: usize = 3;

/// Content hash used as a blob's primary key.
///
/// The blob store never recomputes digests; callers supply them and the store
/// trusts that equal digests mean equal content. Digests are restricted to
/// ASCII alphanumerics, `-` and `_` so that both halves of the fan-out path
/// are plain file names (hex, base32 and base64url all qualify).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Validate and wrap a caller-supplied digest string.
    pub fn new(digest: impl Into<String>) -> Result<Self, TypeError> {
        let digest = digest.into();
        if digest.len() < MIN_DIGEST_LEN {
            return Err(TypeError::InvalidDigest {
                reason: format!("must be at least {MIN_DIGEST_LEN} characters"),
                digest,
            });
        }
        if let Some(c) = digest
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TypeError::InvalidDigest {
                reason: format!("unsupported character {c:?}"),
                digest,
            });
        }
        Ok(Self(digest))
    }

    /// BLAKE3 hex digest of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    /// BLAKE3 hex digest of a file's content, streamed.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// The fan-out directory name (first two characters).
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// The file name inside the fan-out directory.
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    /// The full digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a digest from its on-disk fan-out path components.
    pub fn from_parts(prefix: &str, remainder: &str) -> Result<Self, TypeError> {
        Self::new(format!("{prefix}{remainder}"))
    }

    /// Raw 32-byte value when the digest is a 64-character hex string.
    pub fn to_bytes(&self) -> Option<[u8; 32]> {
        let bytes = hex::decode(&self.0).ok()?;
        bytes.try_into().ok()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.0[..self.0.len().min(8)];
        write!(f, "Digest({short})")
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}
