//! Thread-safe bundle catalog with change detection.
//!
//! The catalog is the only mutable state shared between the supervisor and
//! the workers. Replacement is atomic: readers observe either the previous or
//! the new map, never a mixture.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol::Bundle;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// FNV-1a over the sorted bundle names, with a zero separator between keys so
/// adjacent names cannot collide by concatenation.
fn catalog_hash(bundles: &HashMap<String, Arc<Bundle>>) -> u64 {
    let mut names: Vec<&str> = bundles.keys().map(String::as_str).collect();
    names.sort_unstable();
    let mut hash = FNV_OFFSET;
    for name in names {
        hash = fnv1a(hash, name.as_bytes());
        hash = fnv1a(hash, &[0]);
    }
    hash
}

#[derive(Debug)]
struct Inner {
    bundles: HashMap<String, Arc<Bundle>>,
    hash: u64,
    announce: bool,
}

/// Map of bundle name to bundle spec, replaced wholesale on refresh.
#[derive(Debug)]
pub struct BundleCatalog {
    inner: RwLock<Inner>,
}

impl Default for BundleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleCatalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                bundles: HashMap::new(),
                hash: catalog_hash(&HashMap::new()),
                announce: false,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Bundle>> {
        self.inner.read().bundles.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().bundles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().bundles.is_empty()
    }

    /// Atomically replace the catalog. A replacement whose content hash
    /// matches the current one is a no-op; otherwise the map is swapped and
    /// the pending-announcement flag is raised.
    pub fn replace(&self, bundles: HashMap<String, Bundle>) {
        let bundles: HashMap<String, Arc<Bundle>> = bundles
            .into_iter()
            .map(|(name, bundle)| (name, Arc::new(bundle)))
            .collect();
        let new_hash = catalog_hash(&bundles);
        let mut inner = self.inner.write();
        if inner.hash != new_hash {
            inner.bundles = bundles;
            inner.hash = new_hash;
            inner.announce = true;
        }
    }

    /// Read and clear the pending-announcement flag in one critical section.
    pub fn take_announce(&self) -> bool {
        let mut inner = self.inner.write();
        std::mem::take(&mut inner.announce)
    }

    #[cfg(test)]
    pub(crate) fn hash(&self) -> u64 {
        self.inner.read().hash
    }
}
