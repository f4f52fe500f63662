//! Persistence gateway: scheduled matches, live snapshots, archived sets and
//! the roster directory

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sim::events::MatchEvent;
use crate::sim::roster::{MatchCategory, Roster, RosterMember, Side, Tactics};
use crate::sim::state::DecidedBy;

pub use memory::{MemoryRosterDirectory, MemoryStore};
pub use supabase::{SupabaseClient, SupabaseError, SupabaseRosterDirectory, SupabaseStore};

/// Lifecycle of a persisted match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Running,
    Finished,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Running => "running",
            MatchStatus::Finished => "finished",
            MatchStatus::Rejected => "rejected",
        }
    }
}

/// How a match reached its final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Played out to `sets_to_win`
    Completed,
    /// A side could not field five starters
    Forfeit,
    /// Terminated on request
    Cancelled,
    /// Live state was lost and could not be rebuilt
    Void,
}

/// One persisted match row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: MatchStatus,
    pub category: MatchCategory,
    pub side_a_team: Uuid,
    pub side_b_team: Uuid,
    #[serde(default)]
    pub tactics_a: Tactics,
    #[serde(default)]
    pub tactics_b: Tactics,
    /// Rosters captured at promotion
    #[serde(default)]
    pub rosters: Option<[Roster; 2]>,
    #[serde(default)]
    pub snapshot: Option<serde_json::Value>,
    #[serde(default)]
    pub score: Option<[u8; 2]>,
    #[serde(default)]
    pub winner_team: Option<Uuid>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    pub fn scheduled(
        side_a_team: Uuid,
        side_b_team: Uuid,
        category: MatchCategory,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scheduled_at,
            status: MatchStatus::Scheduled,
            category,
            side_a_team,
            side_b_team,
            tactics_a: Tactics::default(),
            tactics_b: Tactics::default(),
            rosters: None,
            snapshot: None,
            score: None,
            winner_team: None,
            finish_reason: None,
            finished_at: None,
        }
    }

    pub fn with_tactics(mut self, tactics_a: Tactics, tactics_b: Tactics) -> Self {
        self.tactics_a = tactics_a;
        self.tactics_b = tactics_b;
        self
    }
}

/// Final scoreline written when a match leaves the running pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub score: [u8; 2],
    pub winner_team: Option<Uuid>,
    pub reason: FinishReason,
    pub finished_at: DateTime<Utc>,
}

/// Event log of a finished set, kept apart from the live snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedSet {
    pub match_id: Uuid,
    pub set_number: u8,
    pub winner_side: Side,
    pub winner_team: Uuid,
    pub decided_by: DecidedBy,
    pub duration: u32,
    pub events: Vec<MatchEvent>,
}

/// Match persistence used by the scheduler and tick driver
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn insert_scheduled(&self, record: MatchRecord) -> Result<MatchRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<MatchRecord>, StoreError>;

    /// Scheduled matches whose start time has passed
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<MatchRecord>, StoreError>;

    async fn list_running(&self) -> Result<Vec<MatchRecord>, StoreError>;

    /// Atomically move `id` from `from` to `to`. Returns false when the row
    /// was not in `from`.
    async fn try_transition(
        &self,
        id: Uuid,
        from: MatchStatus,
        to: MatchStatus,
    ) -> Result<bool, StoreError>;

    async fn capture_rosters(&self, id: Uuid, rosters: &[Roster; 2]) -> Result<(), StoreError>;

    /// Replace the live snapshot wholesale
    async fn save_snapshot(&self, id: Uuid, snapshot: &serde_json::Value)
        -> Result<(), StoreError>;

    async fn archive_set(&self, set: &ArchivedSet) -> Result<(), StoreError>;

    /// Mark the match finished with its final score
    async fn record_result(&self, id: Uuid, result: &FinalResult) -> Result<(), StoreError>;
}

/// Source of each team's eligible starters, in lineup order
#[async_trait]
pub trait RosterDirectory: Send + Sync {
    async fn starters(&self, team_id: Uuid) -> Result<Vec<RosterMember>, StoreError>;

    async fn put_starters(
        &self,
        team_id: Uuid,
        starters: Vec<RosterMember>,
    ) -> Result<(), StoreError>;
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Match {0} not found")]
    NotFound(Uuid),

    #[error("{0} starters do not fit the slot range")]
    TooManyStarters(usize),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
