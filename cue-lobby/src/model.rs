//! Records persisted in the shared store: tables, players, match results.
//!
//! All records serialize as camelCase JSON so that every client reading the
//! store sees the same shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name given to players who join without one.
pub const ANONYMOUS: &str = "Anonymous";

/// Maximum number of seated players on a table.
pub const MAX_PLAYERS: usize = 2;

/// Idle multiplier applied to tables with a full seat count.
pub const OCCUPIED_TIMEOUT_FACTOR: u64 = 10;

/// Game variant played at a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    NineBall,
    EightBall,
    Snooker,
    ThreeCushion,
}

impl RuleType {
    pub const ALL: [RuleType; 4] = [
        RuleType::NineBall,
        RuleType::EightBall,
        RuleType::Snooker,
        RuleType::ThreeCushion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::NineBall => "nineball",
            RuleType::EightBall => "eightball",
            RuleType::Snooker => "snooker",
            RuleType::ThreeCushion => "threecushion",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleType::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown rule type '{s}'"))
    }
}

/// A participant attached to a table. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
}

impl Player {
    /// Blank names fall back to [`ANONYMOUS`].
    pub fn new(id: impl Into<String>, name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim();
        Self {
            id: id.into(),
            name: if name.is_empty() {
                ANONYMOUS.to_string()
            } else {
                name.to_string()
            },
        }
    }
}

/// One playable session.
///
/// `players` holds one or two entries while the table exists and always
/// contains `creator`. Once `completed` is set the table only leaves the
/// store through deletion or expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub rule_type: RuleType,
    pub creator: Player,
    pub players: Vec<Player>,
    #[serde(default)]
    pub spectators: Vec<Player>,
    pub created_at: u64,
    pub last_used_at: u64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub is_active: bool,
}

impl Table {
    /// A fresh table seating only its creator.
    pub fn new(id: impl Into<String>, creator: Player, rule_type: RuleType, now: u64) -> Self {
        Self {
            id: id.into(),
            rule_type,
            players: vec![creator.clone()],
            creator,
            spectators: Vec::new(),
            created_at: now,
            last_used_at: now,
            completed: false,
            is_active: true,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Waiting for an opponent: one player seated, still in play.
    pub fn is_pending(&self) -> bool {
        self.players.len() == 1 && !self.completed
    }

    pub fn is_creator(&self, user_id: &str) -> bool {
        self.creator.id == user_id
    }

    /// Idle allowance before the table expires. Solo tables get the base
    /// timeout, occupied tables ten times that.
    pub fn idle_timeout_ms(&self, base_timeout_ms: u64) -> u64 {
        if self.players.len() <= 1 {
            base_timeout_ms
        } else {
            base_timeout_ms.saturating_mul(OCCUPIED_TIMEOUT_FACTOR)
        }
    }

    pub fn is_expired(&self, now: u64, base_timeout_ms: u64) -> bool {
        now.saturating_sub(self.last_used_at) > self.idle_timeout_ms(base_timeout_ms)
    }

    /// Record activity. `last_used_at` never moves backwards.
    pub fn touch(&mut self, now: u64) {
        self.last_used_at = self.last_used_at.max(now);
    }
}

/// A finished match as kept in the rolling history.
///
/// A result without `loser` is a solo/practice run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub id: String,
    pub winner: String,
    pub winner_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loser_score: Option<u32>,
    pub rule_type: RuleType,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_replay: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_region: Option<String>,
}

impl MatchResult {
    pub fn new(
        id: impl Into<String>,
        winner: impl Into<String>,
        winner_score: u32,
        rule_type: RuleType,
        timestamp: u64,
    ) -> Self {
        Self {
            id: id.into(),
            winner: winner.into(),
            winner_score,
            loser: None,
            loser_score: None,
            rule_type,
            timestamp,
            has_replay: None,
            location_city: None,
            location_country: None,
            location_region: None,
        }
    }

    pub fn with_loser(mut self, loser: impl Into<String>, score: u32) -> Self {
        self.loser = Some(loser.into());
        self.loser_score = Some(score);
        self
    }

    pub fn with_location(
        mut self,
        city: Option<String>,
        region: Option<String>,
        country: Option<String>,
    ) -> Self {
        self.location_city = city;
        self.location_region = region;
        self.location_country = country;
        self
    }

    pub fn is_solo(&self) -> bool {
        self.loser.is_none()
    }

    pub fn has_replay(&self) -> bool {
        self.has_replay.unwrap_or(false)
    }
}
