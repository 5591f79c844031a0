use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Name of one logical key-value document or one blob collection.
///
/// A namespace is created implicitly by its first write and removed by an
/// explicit delete-storage call. Validation here is syntactic only: the id
/// must be non-empty, free of NUL bytes and surrounding whitespace. Whether
/// the id resolves inside the storage root is decided by the path resolver,
/// which normalizes `.` and `..` segments before checking containment.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Validate and wrap a namespace id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(invalid(&id, "must not be empty"));
        }
        if id.contains('\0') {
            return Err(invalid(&id, "must not contain NUL bytes"));
        }
        if id.trim() != id {
            return Err(invalid(&id, "must not start or end with whitespace"));
        }
        Ok(Self(id))
    }

    /// Returns `true` if the id names a single path component.
    ///
    /// Both stores only accept flat ids. Documents live directly under the
    /// base directory, and a nested blob id would alias another namespace's
    /// fan-out directory.
    pub fn is_flat(&self) -> bool {
        !self.0.contains(['/', '\\']) && self.0 != "." && self.0 != ".."
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn invalid(id: &str, reason: &str) -> TypeError {
    TypeError::InvalidNamespace {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Debug for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespaceId({})", self.0)
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NamespaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NamespaceId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NamespaceId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NamespaceId {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NamespaceId> for String {
    fn from(id: NamespaceId) -> Self {
        id.0
    }
}
