//! Credential caching.
//!
//! Credentials are keyed by a fingerprint of the identity token, so the
//! token itself is never held as a map key. The cache sits behind
//! [`CredentialCache`] so a shared store can replace the in-process map.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Fingerprint of a raw identity token: the first 16 bytes of its SHA-256,
/// hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn for_token(raw_token: &str) -> Self {
        let digest = Sha256::digest(raw_token.as_bytes());
        Self(hex::encode(&digest[..16]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credentials as returned by the federation service.
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Temporary credentials held in the cache.
///
/// Serializes to the JSON shape handed to browser clients.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCredential {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
    #[serde(skip)]
    cache_key: CacheKey,
}

impl CachedCredential {
    #[must_use]
    pub fn new(credentials: TemporaryCredentials, cache_key: CacheKey) -> Self {
        Self {
            access_key_id: credentials.access_key_id,
            secret_access_key: credentials.secret_access_key,
            session_token: credentials.session_token,
            expiration: credentials.expiration,
            cache_key,
        }
    }

    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    #[must_use]
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    #[must_use]
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    #[must_use]
    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    #[must_use]
    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    /// Returns true if more than `buffer` remains before expiry.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expiration - now > buffer
    }
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .field("cache_key", &self.cache_key)
            .finish()
    }
}

/// Storage for brokered credentials.
///
/// Implementations must tolerate concurrent readers and writers. Freshness
/// is decided by the broker, not the cache.
pub trait CredentialCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CachedCredential>;

    /// Stores `credential` under its own key. Last write wins.
    fn set(&self, credential: CachedCredential);

    fn remove(&self, key: &CacheKey);

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry that expires at or before `now`. Returns how many
    /// were dropped.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

/// A process-local [`CredentialCache`].
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialCache {
    entries: Arc<RwLock<HashMap<CacheKey, CachedCredential>>>,
}

impl InMemoryCredentialCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialCache for InMemoryCredentialCache {
    fn get(&self, key: &CacheKey) -> Option<CachedCredential> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, credential: CachedCredential) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(credential.cache_key.clone(), credential);
    }

    fn remove(&self, key: &CacheKey) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, credential| credential.expiration > now);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn credential(token: &str, expiration: DateTime<Utc>) -> CachedCredential {
        CachedCredential::new(
            TemporaryCredentials {
                access_key_id: format!("AKIA-{token}"),
                secret_access_key: "secret".to_string(),
                session_token: "session".to_string(),
                expiration,
            },
            CacheKey::for_token(token),
        )
    }

    #[test]
    fn cache_key_is_32_hex_chars() {
        let key = CacheKey::for_token("test-token-123");
        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_key_is_deterministic_and_distinct() {
        assert_eq!(CacheKey::for_token("a"), CacheKey::for_token("a"));
        assert_ne!(CacheKey::for_token("a"), CacheKey::for_token("b"));
        assert_eq!(
            CacheKey::for_token("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb924"
        );
    }

    #[test]
    fn freshness_respects_buffer() {
        let now = Utc::now();
        let buffer = Duration::minutes(5);

        assert!(credential("t", now + Duration::hours(1)).is_fresh(now, buffer));
        assert!(credential("t", now + Duration::seconds(301)).is_fresh(now, buffer));
        assert!(!credential("t", now + Duration::seconds(300)).is_fresh(now, buffer));
        assert!(!credential("t", now + Duration::minutes(3)).is_fresh(now, buffer));
        assert!(!credential("t", now - Duration::minutes(1)).is_fresh(now, buffer));
    }

    #[test]
    fn miss_then_hit() {
        let cache = InMemoryCredentialCache::new();
        let key = CacheKey::for_token("t");
        assert!(cache.get(&key).is_none());

        cache.set(credential("t", Utc::now() + Duration::hours(1)));
        let hit = cache.get(&key).expect("hit");
        assert_eq!(hit.access_key_id(), "AKIA-t");
        assert_eq!(hit.cache_key(), &key);
    }

    #[test]
    fn last_write_wins() {
        let cache = InMemoryCredentialCache::new();
        let later = Utc::now() + Duration::hours(2);
        cache.set(credential("t", Utc::now() + Duration::hours(1)));
        cache.set(credential("t", later));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache
                .get(&CacheKey::for_token("t"))
                .expect("hit")
                .expiration(),
            later
        );
    }

    #[test]
    fn remove_clear_and_purge() {
        let cache = InMemoryCredentialCache::new();
        let now = Utc::now();
        cache.set(credential("a", now + Duration::hours(1)));
        cache.set(credential("b", now - Duration::seconds(1)));
        cache.set(credential("c", now + Duration::hours(1)));

        assert_eq!(cache.purge_expired(now), 1);
        assert_eq!(cache.len(), 2);

        cache.remove(&CacheKey::for_token("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn clones_share_entries() {
        let cache = InMemoryCredentialCache::new();
        let clone = cache.clone();
        clone.set(credential("t", Utc::now() + Duration::hours(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_access() {
        let cache = InMemoryCredentialCache::new();
        let expiration = Utc::now() + Duration::hours(1);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        let token = format!("token-{i}-{j}");
                        cache.set(credential(&token, expiration));
                        assert!(cache.get(&CacheKey::for_token(&token)).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert_eq!(cache.len(), 400);
    }

    #[test]
    fn debug_redacts_secrets() {
        let debug = format!("{:?}", credential("t", Utc::now()));
        assert!(debug.contains("AKIA-t"));
        assert!(!debug.contains("\"secret\""));
        assert!(!debug.contains("\"session\""));
    }

    #[test]
    fn serializes_for_clients() {
        let expiration = DateTime::from_timestamp(1_700_003_600, 0).expect("timestamp");
        let json = serde_json::to_value(credential("t", expiration)).expect("serialize");

        assert_eq!(json["accessKeyId"], "AKIA-t");
        assert_eq!(json["secretAccessKey"], "secret");
        assert_eq!(json["sessionToken"], "session");
        assert_eq!(json["expiration"], "2023-11-14T23:13:20Z");
        assert!(json.get("cacheKey").is_none());
    }
}
