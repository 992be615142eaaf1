//! Rolling match history.
//!
//! Results live as JSON members of one sorted set scored by their
//! timestamp. Each insert trims the set back to `limit` entries, deleting
//! the replay blobs of whatever falls off the end. A separate counter keeps
//! the all-time number of recorded matches.

use std::sync::Arc;

use crate::config::HistoryConfig;
use crate::error::LobbyError;
use crate::model::{MatchResult, RuleType};
use crate::store::{RangeOptions, Store};

pub const HISTORY_KEY: &str = "match_history";
pub const HISTORY_TOTAL_KEY: &str = "match_history:total";
/// Default page size for [`MatchHistory::get_match_results`].
pub const DEFAULT_RESULTS_LIMIT: usize = 50;

pub fn replay_key(match_id: &str) -> String {
    format!("replay:{match_id}")
}

/// A count as a rank offset, saturating rather than wrapping.
fn rank_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct MatchHistory {
    store: Arc<dyn Store>,
    limit: usize,
}

impl MatchHistory {
    pub fn new(store: Arc<dyn Store>, config: &HistoryConfig) -> Self {
        Self {
            store,
            limit: config.limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record a finished match, optionally with its replay payload.
    ///
    /// Returns the stored record (with `hasReplay` set when a replay was
    /// given).
    pub async fn add_match_result(
        &self,
        mut result: MatchResult,
        replay: Option<&str>,
    ) -> Result<MatchResult, LobbyError> {
        if let Some(replay) = replay {
            self.store.set(&replay_key(&result.id), replay).await?;
            result.has_replay = Some(true);
        }

        let member = serde_json::to_string(&result)?;
        self.store
            .zadd(HISTORY_KEY, result.timestamp as f64, &member)
            .await?;

        // Everything ranked below the newest `limit` goes.
        let evict_stop = -rank_count(self.limit) - 1;
        let evicted = self
            .store
            .zrange(HISTORY_KEY, 0, evict_stop, RangeOptions::default())
            .await?;
        if !evicted.is_empty() {
            let replays: Vec<String> = evicted
                .iter()
                .filter_map(|m| match serde_json::from_str::<MatchResult>(&m.member) {
                    Ok(old) => old.has_replay().then(|| replay_key(&old.id)),
                    Err(e) => {
                        log::warn!("Evicting unreadable history entry: {e}");
                        None
                    }
                })
                .collect();
            if !replays.is_empty() {
                let removed = self.store.del(&replays).await?;
                log::debug!("Deleted {removed} evicted replays");
            }
            self.store.zremrangebyrank(HISTORY_KEY, 0, evict_stop).await?;
            log::debug!("Trimmed {} results from history", evicted.len());
        }

        let total = self.store.incr(HISTORY_TOTAL_KEY).await?;
        log::info!(
            "Recorded match {} ({}), {total} recorded so far",
            result.id,
            result.rule_type
        );
        Ok(result)
    }

    /// Newest results first, optionally limited to one rule type.
    pub async fn get_match_results(
        &self,
        limit: usize,
        rule_type: Option<RuleType>,
    ) -> Result<Vec<MatchResult>, LobbyError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let members = match rule_type {
            None => {
                self.store
                    .zrange(HISTORY_KEY, 0, rank_count(limit) - 1, RangeOptions::rev())
                    .await?
            }
            Some(_) => self.store.zrange(HISTORY_KEY, 0, -1, RangeOptions::rev()).await?,
        };

        let results = members
            .into_iter()
            .filter_map(|m| match serde_json::from_str::<MatchResult>(&m.member) {
                Ok(result) => Some(result),
                Err(e) => {
                    log::warn!("Skipping unreadable history entry: {e}");
                    None
                }
            })
            .filter(|result| rule_type.map_or(true, |rule| result.rule_type == rule))
            .take(limit)
            .collect();
        Ok(results)
    }

    pub async fn get_replay(&self, match_id: &str) -> Result<Option<String>, LobbyError> {
        Ok(self.store.get(&replay_key(match_id)).await?)
    }

    /// All matches ever recorded, including those already evicted.
    pub async fn total_recorded(&self) -> Result<u64, LobbyError> {
        let raw = self.store.get(HISTORY_TOTAL_KEY).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}
