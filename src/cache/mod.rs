//! # Pull Cache
//!
//! TTL cache for ERP pull results. Every key begins with the organization id
//! (`pull:{org}:{connector}:{resourceType}:{resourceId}`), so a lookup under
//! one organization can never observe another organization's entries.
//!
//! Values are stored as a `{data, cachedAt}` JSON envelope in a pluggable
//! [`CacheStore`]: [`MemoryCacheStore`] for single-process deployments and
//! tests, [`RedisCacheStore`] for shared deployments.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::HubError;
use crate::telemetry::{PULL_CACHE_HITS_TOTAL, PULL_CACHE_MISSES_TOTAL};

pub mod memory;
pub mod redis_store;

pub use memory::MemoryCacheStore;
pub use redis_store::RedisCacheStore;

const KEY_PREFIX: &str = "pull";

/// Default lifetime of a pull entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unsupported cache backend: {0}")]
    UnsupportedBackend(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<CacheError> for HubError {
    fn from(err: CacheError) -> Self {
        HubError::Internal(err.to_string())
    }
}

/// Raw key/value operations backing the pull cache.
///
/// `scan` follows Redis cursor semantics: start at `0`, stop when the returned
/// cursor is `0` again. A round may return fewer keys than `count`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
    -> Result<(), CacheError>;

    /// Removes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Re-stamps the expiry of a live key. `false` when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), CacheError>;
}

/// Builds the store selected by `HUB_CACHE_BACKEND`.
pub async fn connect_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCacheStore::new())),
        "redis" => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| CacheError::Backend("redis url is not configured".to_string()))?;
            Ok(Arc::new(RedisCacheStore::connect(url).await?))
        }
        other => Err(CacheError::UnsupportedBackend(other.to_string())),
    }
}

/// Identity of one pull result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullCacheKey {
    pub organization_id: Uuid,
    pub connector_id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
}

impl PullCacheKey {
    pub fn new(
        organization_id: Uuid,
        connector_id: Uuid,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id,
            connector_id,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Scan pattern matching every entry of an organization.
    pub fn org_pattern(organization_id: Uuid) -> String {
        format!("{KEY_PREFIX}:{organization_id}:*")
    }

    /// Inverse of `Display`; `None` for keys outside the pull namespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(5, ':');
        if parts.next()? != KEY_PREFIX {
            return None;
        }
        let organization_id = parts.next()?.parse().ok()?;
        let connector_id = parts.next()?.parse().ok()?;
        let resource_type = parts.next()?;
        let resource_id = parts.next()?;
        Some(Self::new(
            organization_id,
            connector_id,
            resource_type,
            resource_id,
        ))
    }
}

impl fmt::Display for PullCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{KEY_PREFIX}:{}:{}:{}:{}",
            self.organization_id, self.connector_id, self.resource_type, self.resource_id
        )
    }
}

/// A cached pull result and when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry {
    pub data: Value,
    pub cached_at: DateTime<Utc>,
}

/// Per-organization key counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_keys: u64,
    pub by_connector: BTreeMap<String, u64>,
    pub by_resource_type: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct PullCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    batch_size: usize,
}

impl fmt::Debug for PullCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullCache")
            .field("default_ttl", &self.default_ttl)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl PullCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            default_ttl: DEFAULT_TTL,
            batch_size: 1000,
        }
    }

    pub fn from_config(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            batch_size: config.scan_batch_size.max(1),
        }
    }

    /// `None` on a miss. An undecodable entry is reported as a miss.
    pub async fn get_cached_data(
        &self,
        key: &PullCacheKey,
    ) -> Result<Option<CachedEntry>, CacheError> {
        let raw = self.store.get(&key.to_string()).await?;
        let entry = raw.and_then(|raw| match serde_json::from_str::<CachedEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(
                    organization_id = %key.organization_id,
                    connector_id = %key.connector_id,
                    error = %err,
                    "Discarding undecodable pull cache entry"
                );
                None
            }
        });

        if entry.is_some() {
            counter!(PULL_CACHE_HITS_TOTAL).increment(1);
        } else {
            counter!(PULL_CACHE_MISSES_TOTAL).increment(1);
        }
        Ok(entry)
    }

    /// Stores `data`, replacing any existing entry. `ttl` defaults to the
    /// configured lifetime.
    pub async fn set_cached_data(
        &self,
        key: &PullCacheKey,
        data: &Value,
        ttl: Option<Duration>,
    ) -> Result<CachedEntry, CacheError> {
        let entry = CachedEntry {
            data: data.clone(),
            cached_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&entry)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.store
            .set_with_ttl(&key.to_string(), &encoded, ttl)
            .await?;

        debug!(
            organization_id = %key.organization_id,
            connector_id = %key.connector_id,
            resource_type = %key.resource_type,
            ttl_seconds = ttl.as_secs(),
            "Cached pull result"
        );
        Ok(entry)
    }

    pub async fn delete_cached_data(&self, key: &PullCacheKey) -> Result<bool, CacheError> {
        Ok(self.store.delete(&[key.to_string()]).await? > 0)
    }

    pub async fn exists_cached_data(&self, key: &PullCacheKey) -> Result<bool, CacheError> {
        self.store.exists(&key.to_string()).await
    }

    /// Extends the lifetime of a live entry without refetching it.
    ///
    /// Returns `None` when the entry already expired.
    pub async fn refresh_cached_data(
        &self,
        key: &PullCacheKey,
        ttl: Option<Duration>,
    ) -> Result<Option<CachedEntry>, CacheError> {
        let raw_key = key.to_string();
        let Some(raw) = self.store.get(&raw_key).await? else {
            return Ok(None);
        };
        let Ok(entry) = serde_json::from_str::<CachedEntry>(&raw) else {
            return Ok(None);
        };
        if !self
            .store
            .expire(&raw_key, ttl.unwrap_or(self.default_ttl))
            .await?
        {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Removes every entry of an organization, scanning and deleting in
    /// batches. Returns the number of keys removed.
    pub async fn clear_org_cache(&self, organization_id: Uuid) -> Result<u64, CacheError> {
        let pattern = PullCacheKey::org_pattern(organization_id);
        let mut cursor = 0;
        let mut pending: Vec<String> = Vec::with_capacity(self.batch_size);
        let mut removed = 0;

        loop {
            let (next, keys) = self.store.scan(cursor, &pattern, self.batch_size).await?;
            pending.extend(keys);
            while pending.len() >= self.batch_size {
                let batch: Vec<String> = pending.drain(..self.batch_size).collect();
                removed += self.store.delete(&batch).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        if !pending.is_empty() {
            removed += self.store.delete(&pending).await?;
        }

        debug!(organization_id = %organization_id, removed, "Cleared organization pull cache");
        Ok(removed)
    }

    pub async fn get_cache_stats(&self, organization_id: Uuid) -> Result<CacheStats, CacheError> {
        let pattern = PullCacheKey::org_pattern(organization_id);
        let mut stats = CacheStats::default();
        let mut cursor = 0;

        loop {
            let (next, keys) = self.store.scan(cursor, &pattern, self.batch_size).await?;
            for key in keys.iter().filter_map(|raw| PullCacheKey::parse(raw)) {
                if key.organization_id != organization_id {
                    continue;
                }
                stats.total_keys += 1;
                *stats
                    .by_connector
                    .entry(key.connector_id.to_string())
                    .or_default() += 1;
                *stats.by_resource_type.entry(key.resource_type).or_default() += 1;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(stats)
    }
}

/// Redis-style glob match supporting `*` and `?`.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    let (mut p, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some('?') => {
                p += 1;
                c += 1;
            }
            Some(ch) if *ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    c = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|ch| *ch == '*')
}
