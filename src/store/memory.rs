//! In-memory store used when no Supabase project is configured, and by tests

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    ArchivedSet, FinalResult, MatchRecord, MatchStatus, MatchStore, RosterDirectory, StoreError,
};
use crate::sim::roster::{Roster, RosterMember};

/// DashMap-backed match store
#[derive(Default)]
pub struct MemoryStore {
    matches: DashMap<Uuid, MatchRecord>,
    archive: Mutex<Vec<ArchivedSet>>,
    snapshot_writes: DashMap<Uuid, usize>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every snapshot write fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn archived_sets(&self, match_id: Uuid) -> Vec<ArchivedSet> {
        self.archive
            .lock()
            .iter()
            .filter(|s| s.match_id == match_id)
            .cloned()
            .collect()
    }

    pub fn snapshot_writes(&self, match_id: Uuid) -> usize {
        self.snapshot_writes.get(&match_id).map(|c| *c).unwrap_or(0)
    }

    /// Overwrite a stored snapshot, e.g. to simulate corruption
    pub fn put_snapshot(&self, match_id: Uuid, snapshot: Option<serde_json::Value>) {
        if let Some(mut record) = self.matches.get_mut(&match_id) {
            record.snapshot = snapshot;
        }
    }

    fn with_record<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut MatchRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut record = self.matches.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        Ok(f(&mut record))
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn insert_scheduled(&self, record: MatchRecord) -> Result<MatchRecord, StoreError> {
        self.matches.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.matches.get(&id).map(|r| r.value().clone()))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<MatchRecord>, StoreError> {
        let mut due: Vec<MatchRecord> = self
            .matches
            .iter()
            .filter(|r| r.status == MatchStatus::Scheduled && r.scheduled_at <= now)
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        Ok(due)
    }

    async fn list_running(&self) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(self
            .matches
            .iter()
            .filter(|r| r.status == MatchStatus::Running)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn try_transition(
        &self,
        id: Uuid,
        from: MatchStatus,
        to: MatchStatus,
    ) -> Result<bool, StoreError> {
        // get_mut holds the shard lock, so check-and-set is atomic
        self.with_record(id, |record| {
            if record.status != from {
                return false;
            }
            record.status = to;
            true
        })
    }

    async fn capture_rosters(&self, id: Uuid, rosters: &[Roster; 2]) -> Result<(), StoreError> {
        self.with_record(id, |record| record.rosters = Some(rosters.clone()))
    }

    async fn save_snapshot(
        &self,
        id: Uuid,
        snapshot: &serde_json::Value,
    ) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("snapshot writes disabled".to_string()));
        }
        self.with_record(id, |record| record.snapshot = Some(snapshot.clone()))?;
        *self.snapshot_writes.entry(id).or_insert(0) += 1;
        Ok(())
    }

    async fn archive_set(&self, set: &ArchivedSet) -> Result<(), StoreError> {
        let mut archive = self.archive.lock();
        archive.retain(|s| !(s.match_id == set.match_id && s.set_number == set.set_number));
        archive.push(set.clone());
        Ok(())
    }

    async fn record_result(&self, id: Uuid, result: &FinalResult) -> Result<(), StoreError> {
        self.with_record(id, |record| {
            record.status = MatchStatus::Finished;
            record.score = Some(result.score);
            record.winner_team = result.winner_team;
            record.finish_reason = Some(result.reason);
            record.finished_at = Some(result.finished_at);
        })
    }
}

/// Starters keyed by team id
#[derive(Default)]
pub struct MemoryRosterDirectory {
    teams: DashMap<Uuid, Vec<RosterMember>>,
}

impl MemoryRosterDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RosterDirectory for MemoryRosterDirectory {
    async fn starters(&self, team_id: Uuid) -> Result<Vec<RosterMember>, StoreError> {
        Ok(self
            .teams
            .get(&team_id)
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }

    async fn put_starters(
        &self,
        team_id: Uuid,
        starters: Vec<RosterMember>,
    ) -> Result<(), StoreError> {
        self.teams.insert(team_id, starters);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::roster::fixtures::starters;
    use crate::sim::roster::MatchCategory;
    use crate::store::FinishReason;
    use chrono::Duration;

    fn record(offset_secs: i64) -> MatchRecord {
        MatchRecord::scheduled(
            Uuid::new_v4(),
            Uuid::new_v4(),
            MatchCategory::Regular,
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[tokio::test]
    async fn only_due_scheduled_matches_are_listed() {
        let store = MemoryStore::new();
        let due = store.insert_scheduled(record(-60)).await.unwrap();
        store.insert_scheduled(record(3600)).await.unwrap();
        let running = store.insert_scheduled(record(-30)).await.unwrap();
        store
            .try_transition(running.id, MatchStatus::Scheduled, MatchStatus::Running)
            .await
            .unwrap();

        let listed = store.list_due(Utc::now()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
        assert_eq!(store.list_running().await.unwrap()[0].id, running.id);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let r = store.insert_scheduled(record(0)).await.unwrap();
        assert!(store
            .try_transition(r.id, MatchStatus::Scheduled, MatchStatus::Running)
            .await
            .unwrap());
        assert!(!store
            .try_transition(r.id, MatchStatus::Scheduled, MatchStatus::Running)
            .await
            .unwrap());
        assert!(matches!(
            store
                .try_transition(Uuid::new_v4(), MatchStatus::Scheduled, MatchStatus::Running)
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failing_snapshot_writes_leave_the_old_snapshot() {
        let store = MemoryStore::new();
        let r = store.insert_scheduled(record(0)).await.unwrap();
        store
            .save_snapshot(r.id, &serde_json::json!({"v": 1}))
            .await
            .unwrap();
        store.set_failing(true);
        assert!(store
            .save_snapshot(r.id, &serde_json::json!({"v": 2}))
            .await
            .is_err());
        let stored = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.snapshot, Some(serde_json::json!({"v": 1})));
        assert_eq!(store.snapshot_writes(r.id), 1);
    }

    #[tokio::test]
    async fn result_marks_the_match_finished() {
        let store = MemoryStore::new();
        let r = store.insert_scheduled(record(0)).await.unwrap();
        store
            .record_result(
                r.id,
                &FinalResult {
                    score: [2, 1],
                    winner_team: Some(r.side_a_team),
                    reason: FinishReason::Completed,
                    finished_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let stored = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Finished);
        assert_eq!(stored.score, Some([2, 1]));
    }

    #[tokio::test]
    async fn unknown_team_has_no_starters() {
        let directory = MemoryRosterDirectory::new();
        let team = Uuid::new_v4();
        assert!(directory.starters(team).await.unwrap().is_empty());
        directory.put_starters(team, starters("t", 10.0)).await.unwrap();
        assert_eq!(directory.starters(team).await.unwrap().len(), 5);
    }
}
