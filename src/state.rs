//! Expiring key/value state: session tokens and upload tickets.

use crate::error::DbResult;
use dashmap::DashMap;
use std::time::{Duration, Instant};

pub trait StateStore: Send + Sync {
    /// Binds a session token to a username for `ttl`.
    fn token_set(&self, token: &str, username: &str, ttl: Duration) -> DbResult<()>;
    /// Username bound to a live token.
    fn token_get(&self, token: &str) -> DbResult<Option<String>>;
    fn cache_set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()>;
    fn cache_get(&self, key: &str) -> DbResult<Option<String>>;
}

struct Entry {
    value: String,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Expiry is checked on read; expired entries are removed lazily.
#[derive(Default)]
pub struct MemoryStateStore {
    tokens: DashMap<String, Entry>,
    cache: DashMap<String, Entry>,
}

impl std::fmt::Debug for MemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStateStore")
            .field("tokens", &self.tokens.len())
            .field("cache", &self.cache.len())
            .finish()
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(map: &DashMap<String, Entry>, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        map.retain(|_, entry| entry.is_live(now));
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now.checked_add(ttl),
            },
        );
    }

    fn get(map: &DashMap<String, Entry>, key: &str) -> Option<String> {
        let live = map
            .get(key)
            .map(|entry| (entry.is_live(Instant::now()), entry.value.clone()))?;
        match live {
            (true, value) => Some(value),
            (false, _) => {
                map.remove(key);
                None
            }
        }
    }
}

impl StateStore for MemoryStateStore {
    fn token_set(&self, token: &str, username: &str, ttl: Duration) -> DbResult<()> {
        Self::put(&self.tokens, token, username, ttl);
        Ok(())
    }

    fn token_get(&self, token: &str) -> DbResult<Option<String>> {
        Ok(Self::get(&self.tokens, token))
    }

    fn cache_set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        Self::put(&self.cache, key, value, ttl);
        Ok(())
    }

    fn cache_get(&self, key: &str) -> DbResult<Option<String>> {
        Ok(Self::get(&self.cache, key))
    }
}
