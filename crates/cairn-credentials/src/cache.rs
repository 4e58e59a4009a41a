//! Caller-owned cache of parsed credentials
//!
//! Entries are keyed by the secret's namespace, name, and data key plus the
//! location config the parse read (see [`crate::config_scope`]), and are
//! only served while the secret's `resourceVersion` matches the one they were
//! parsed from and their TTL has not elapsed. Rotating a secret therefore
//! invalidates its entries on the next lookup.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::NormalizedCredential;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    namespace: String,
    name: String,
    key: String,
    scope: String,
}

impl CacheKey {
    fn new(namespace: &str, name: &str, key: &str, scope: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
            scope: scope.to_string(),
        }
    }
}

struct CacheEntry {
    resource_version: Option<String>,
    inserted_at: Instant,
    credential: NormalizedCredential,
}

/// Cache of parsed credentials, owned by a controller context
pub struct CredentialCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CredentialCache {
    /// Create a cache whose entries expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a credential parsed from the given secret version under `scope`.
    ///
    /// Stale entries (other resource version, or past TTL) are evicted.
    pub fn get(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        scope: &str,
        resource_version: Option<&str>,
    ) -> Option<NormalizedCredential> {
        let cache_key = CacheKey::new(namespace, name, key, scope);
        let mut entries = self.lock();
        let entry = entries.get(&cache_key)?;
        let fresh = entry.resource_version.as_deref() == resource_version
            && resource_version.is_some()
            && entry.inserted_at.elapsed() < self.ttl;
        if fresh {
            return Some(entry.credential.clone());
        }
        debug!(namespace, name, key, "Evicting stale cached credential");
        entries.remove(&cache_key);
        None
    }

    /// Store a credential parsed from the given secret version under `scope`
    pub fn insert(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        scope: &str,
        resource_version: Option<&str>,
        credential: NormalizedCredential,
    ) {
        self.lock().insert(
            CacheKey::new(namespace, name, key, scope),
            CacheEntry {
                resource_version: resource_version.map(str::to_string),
                inserted_at: Instant::now(),
                credential,
            },
        );
    }

    /// Drop every entry for a secret
    pub fn invalidate(&self, namespace: &str, name: &str) {
        self.lock()
            .retain(|k, _| !(k.namespace == namespace && k.name == name));
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached entries, including ones not yet found stale
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
