//! Typed facade over the shared key-value store.
//!
//! ```text
//! ┌──────────────────┐   hset/hget/hgetall/hdel     ┌──────────────┐
//! │ TableCoordinator │ ───────────────────────────► │              │
//! └──────────────────┘                              │  dyn Store   │
//! ┌──────────────────┐   zadd/zrange/zrem…          │              │
//! │ MatchHistory     │ ───────────────────────────► │ MemoryStore  │
//! └──────────────────┘   set/get/del/incr           │ RocksStore   │
//!                                                   └──────────────┘
//! ```
//!
//! Values are serialized records (JSON text). The store offers no
//! multi-step transactions; every read-decide-write done by callers is a
//! check-then-act sequence.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StoreError;

/// Options for [`Store::zrange`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Rank from the highest score down.
    pub rev: bool,
    /// Populate [`ScoredMember::score`].
    pub with_scores: bool,
}

impl RangeOptions {
    pub fn rev() -> Self {
        Self {
            rev: true,
            with_scores: false,
        }
    }

    pub fn with_scores(mut self) -> Self {
        self.with_scores = true;
        self
    }
}

/// A sorted-set member returned by a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: Option<f64>,
}

/// Operations the lobby needs from the shared store.
///
/// Rank arguments follow Redis semantics: zero-based, inclusive `stop`,
/// negative values count back from the end (`-1` is the last member).
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Hashes ───────────────────────────────────────────────────────

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// All fields of a hash. Iteration order is unspecified.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Remove fields, returning how many existed.
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, StoreError>;

    // ─── Sorted sets ──────────────────────────────────────────────────

    /// Insert or re-score a member. Returns `true` if it was new.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError>;

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        options: RangeOptions,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// Remove members by ascending rank, returning how many were removed.
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<usize, StoreError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;

    // ─── Scalars ──────────────────────────────────────────────────────

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete scalar keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<usize, StoreError>;

    /// Atomically increment an integer scalar (missing keys start at 0).
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;
}

/// Resolve Redis-style rank bounds against a set of `len` members.
///
/// Returns the inclusive `(start, stop)` index pair, or `None` when the
/// range selects nothing.
pub(crate) fn rank_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Select ranks out of members sorted ascending by (score, member).
pub(crate) fn select_ranks(
    sorted: &[(f64, String)],
    start: i64,
    stop: i64,
    options: RangeOptions,
) -> Vec<ScoredMember> {
    let Some((from, to)) = rank_bounds(sorted.len(), start, stop) else {
        return Vec::new();
    };
    let pick = |(score, member): &(f64, String)| ScoredMember {
        member: member.clone(),
        score: options.with_scores.then_some(*score),
    };
    if options.rev {
        sorted.iter().rev().skip(from).take(to - from + 1).map(pick).collect()
    } else {
        sorted[from..=to].iter().map(pick).collect()
    }
}

/// Ordering used by sorted sets: score first, then member bytes.
pub(crate) fn member_order(a: &(f64, String), b: &(f64, String)) -> std::cmp::Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
}
