use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, TryLockError};

use kvault_types::NamespaceId;

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// Guard held for the duration of one namespace operation.
pub type StripeGuard<'a> = MutexGuard<'a, ()>;

/// Per-namespace mutual exclusion from a fixed pool of mutexes.
///
/// A namespace maps to stripe `hash(id) % stripes`. Two unrelated namespaces
/// that land on the same stripe contend with each other; in exchange the
/// registry never grows, however many namespaces come and go. Size the pool
/// well above the expected number of concurrently active namespaces.
#[derive(Debug)]
pub struct StripedLockRegistry {
    stripes: Box<[Mutex<()>]>,
}

impl StripedLockRegistry {
    /// Create a registry with `stripes` mutexes (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    /// Number of stripes in the pool.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Index of the stripe guarding `id`.
    pub fn stripe_index(&self, id: &NamespaceId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.as_str().hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Block until the stripe for `id` is free.
    ///
    /// The mutex protects no data of its own, so a stripe poisoned by a
    /// panicking holder is simply taken over.
    pub fn lock(&self, id: &NamespaceId) -> StripeGuard<'_> {
        self.stripes[self.stripe_index(id)]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the stripe for `id` only if it is free right now.
    pub fn try_lock(&self, id: &NamespaceId) -> Option<StripeGuard<'_>> {
        match self.stripes[self.stripe_index(id)].try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl Default for StripedLockRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
