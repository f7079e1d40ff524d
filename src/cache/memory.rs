//! In-process cache store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheError, CacheStore, glob_match};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Open scans kept before the oldest are dropped.
const MAX_OPEN_CURSORS: usize = 1024;

/// Ordered in-memory keyspace with lazy expiry.
///
/// A scan cursor resumes after the last key it walked, so deleting keys
/// between rounds never skips a live key.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<BTreeMap<String, Entry>>,
    cursors: Mutex<HashMap<u64, String>>,
    next_cursor: AtomicU64,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live key count.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key)
                && entry.is_live(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), CacheError> {
        let resume_after = if cursor == 0 {
            None
        } else {
            let key = self.cursors.lock().await.remove(&cursor);
            Some(key.ok_or_else(|| CacheError::Backend(format!("unknown scan cursor {cursor}")))?)
        };

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));

        let lower = match &resume_after {
            Some(after) => Bound::Excluded(after.as_str()),
            None => Bound::Unbounded,
        };
        let walked: Vec<String> = entries
            .range::<str, _>((lower, Bound::Unbounded))
            .take(count.max(1))
            .map(|(key, _)| key.clone())
            .collect();
        let has_more = walked.last().is_some_and(|last| {
            entries
                .range::<str, _>((Bound::Excluded(last.as_str()), Bound::Unbounded))
                .next()
                .is_some()
        });
        drop(entries);

        let next = match (has_more, walked.last()) {
            (true, Some(last)) => {
                let id = self.next_cursor.fetch_add(1, Ordering::Relaxed) + 1;
                let mut cursors = self.cursors.lock().await;
                if cursors.len() >= MAX_OPEN_CURSORS
                    && let Some(oldest) = cursors.keys().min().copied()
                {
                    cursors.remove(&oldest);
                }
                cursors.insert(id, last.clone());
                id
            }
            _ => 0,
        };
        let keys = walked
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect();
        Ok((next, keys))
    }
}
