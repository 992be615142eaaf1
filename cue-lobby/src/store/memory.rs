//! In-process store backend.
//!
//! Suitable for tests and single-process deployments; all clients sharing one
//! `Arc<MemoryStore>` see the same data.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{member_order, select_ranks, RangeOptions, ScoredMember, Store};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    /// Members kept sorted by (score, member).
    zsets: HashMap<String, Vec<(f64, String)>>,
    scalars: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(hash) = inner.hashes.get_mut(key) else {
            return Ok(0);
        };
        let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
        if hash.is_empty() {
            inner.hashes.remove(key);
        }
        Ok(removed)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let set = inner.zsets.entry(key.to_string()).or_default();
        let before = set.len();
        set.retain(|(_, m)| m != member);
        let is_new = set.len() == before;
        set.push((score, member.to_string()));
        set.sort_by(member_order);
        Ok(is_new)
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        options: RangeOptions,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .zsets
            .get(key)
            .map(|set| select_ranks(set, start, stop, options))
            .unwrap_or_default())
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let Some((from, to)) = super::rank_bounds(set.len(), start, stop) else {
            return Ok(0);
        };
        set.drain(from..=to);
        if set.is_empty() {
            inner.zsets.remove(key);
        }
        Ok(to - from + 1)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(false);
        };
        let before = set.len();
        set.retain(|(_, m)| m != member);
        Ok(set.len() != before)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .zsets
            .get(key)
            .and_then(|set| set.iter().find(|(_, m)| m == member))
            .map(|(score, _)| *score))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.scalars.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.scalars.get(key).cloned())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(keys.iter().filter(|k| inner.scalars.remove(*k).is_some()).count())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        let current = match inner.scalars.get(key) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger(key.to_string()))?,
            None => 0,
        };
        let next = current + 1;
        inner.scalars.insert(key.to_string(), next.to_string());
        Ok(next)
    }
}
