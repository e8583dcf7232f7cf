//! TTL result cache for skill invocations.
//!
//! Keys are a SHA-256 digest of (skill name, skill version, canonical input),
//! where the canonical form sorts object keys at every level so equivalent
//! inputs hash identically. Entries expire after their TTL and the cache is
//! bounded: inserting into a full cache first sweeps expired entries, then
//! evicts the least recently used one.
//!
//! Backed by `DashMap`; values are cloned on read so no guard outlives a call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use weft_types::config::DEFAULT_CACHE_MAX_ENTRIES;

/// Longest TTL honoured; larger values are clamped.
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// Hex SHA-256 of a skill identity and its canonicalized input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(skill: &str, version: &str, input: &Value) -> Self {
        let mut material = String::new();
        material.push_str(skill);
        material.push('\0');
        material.push_str(version);
        material.push('\0');
        write_canonical(input, &mut material);
        Self(format!("{:x}", Sha256::digest(material.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    last_access: u64,
}

/// Bounded, concurrent TTL cache of skill outputs.
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    max_entries: usize,
    clock: AtomicU64,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
        }
    }

    /// Live value for `key`, refreshing its recency. Expired entries are
    /// removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        {
            let mut entry = self.entries.get_mut(key)?;
            if entry.expires_at > now {
                entry.last_access = self.tick();
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }

    /// Store a value for `ttl`. Last write wins.
    pub fn insert(&self, key: CacheKey, value: Value, ttl: Duration) {
        let now = Instant::now();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            let swept = self.purge_expired();
            if swept == 0 {
                self.evict_lru();
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl.min(MAX_TTL),
                last_access: self.tick(),
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().last_access)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            tracing::debug!(key = %key, "evicting least recently used cache entry");
            self.entries.remove(&key);
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_ENTRIES)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
