//! End-to-end engine flows against the in-memory store: scheduling, ticking,
//! forfeits, termination and restart recovery

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use match_sim_server::engine::pool::LiveMatch;
use match_sim_server::engine::{Engine, EngineSettings, Promotion, Recovery};
use match_sim_server::settlement::{MatchFinished, Settlement};
use match_sim_server::sim::roster::{MatchCategory, Role, RosterError, RosterMember};
use match_sim_server::sim::state::DecidedBy;
use match_sim_server::sim::EventKind;
use match_sim_server::store::{
    FinishReason, MatchRecord, MatchStatus, MatchStore, MemoryRosterDirectory, MemoryStore,
    RosterDirectory,
};
use match_sim_server::util::time::{manual_ticker, FixedClock};
use match_sim_server::ws::{Broadcaster, ServerMsg};

#[derive(Default)]
struct RecordingBroadcaster {
    messages: Mutex<Vec<(Uuid, ServerMsg)>>,
    closed: Mutex<Vec<Uuid>>,
}

impl RecordingBroadcaster {
    fn for_match(&self, id: Uuid) -> Vec<ServerMsg> {
        self.messages
            .lock()
            .iter()
            .filter(|(m, _)| *m == id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish(&self, match_id: Uuid, msg: ServerMsg) {
        self.messages.lock().push((match_id, msg));
    }

    fn close(&self, match_id: Uuid) {
        self.closed.lock().push(match_id);
    }
}

#[derive(Default)]
struct RecordingSettlement {
    finished: Mutex<Vec<MatchFinished>>,
}

impl Settlement for RecordingSettlement {
    fn match_finished(&self, notification: MatchFinished) {
        self.finished.lock().push(notification);
    }
}

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    rosters: Arc<MemoryRosterDirectory>,
    broadcaster: Arc<RecordingBroadcaster>,
    settlement: Arc<RecordingSettlement>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), Arc::new(MemoryRosterDirectory::new()))
    }

    /// A second engine over the same persistence, as after a restart
    fn with_store(store: Arc<MemoryStore>, rosters: Arc<MemoryRosterDirectory>) -> Self {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let settlement = Arc::new(RecordingSettlement::default());
        let settings = EngineSettings {
            tick_workers: 4,
            ..EngineSettings::default()
        };
        let engine = Engine::new(
            store.clone(),
            rosters.clone(),
            broadcaster.clone(),
            settlement.clone(),
            Arc::new(FixedClock::new(Utc::now())),
            settings,
        );
        Self {
            engine,
            store,
            rosters,
            broadcaster,
            settlement,
        }
    }

    async fn team(&self, prefix: &str, count: usize, power: f64) -> Uuid {
        let team_id = Uuid::new_v4();
        self.rosters
            .put_starters(team_id, starters(prefix, count, power))
            .await
            .unwrap();
        team_id
    }

    async fn schedule(&self, a: Uuid, b: Uuid, category: MatchCategory) -> MatchRecord {
        self.store
            .insert_scheduled(MatchRecord::scheduled(
                a,
                b,
                category,
                Utc::now() - Duration::minutes(1),
            ))
            .await
            .unwrap()
    }

    async fn started_match(&self) -> Uuid {
        let a = self.team("a", 5, 50.0).await;
        let b = self.team("b", 5, 48.0).await;
        let record = self.schedule(a, b, MatchCategory::Regular).await;
        let promotion = self.engine.scheduler().promote(record.clone()).await.unwrap();
        assert_eq!(promotion, Promotion::Started);
        record.id
    }

    async fn run_to_completion(&self) -> usize {
        let mut ticks = 0;
        while self.engine.running() > 0 {
            self.engine.driver().tick_once().await;
            ticks += 1;
            assert!(ticks < 20_000, "match never finished");
        }
        self.engine.driver().flush().await;
        ticks
    }

    /// Take a match out of the pool and flush its newest snapshot
    async fn stop(&self, id: Uuid) {
        let entry = self.engine.context().pool.remove(&id).unwrap();
        entry.writer().close().await;
    }

    async fn record(&self, id: Uuid) -> MatchRecord {
        self.store.get(id).await.unwrap().unwrap()
    }
}

const ROLES: [Role; 5] = [Role::Top, Role::Jungle, Role::Mid, Role::Adc, Role::Support];

fn starters(prefix: &str, count: usize, power: f64) -> Vec<RosterMember> {
    (0..count)
        .map(|i| RosterMember {
            id: Uuid::new_v4(),
            name: format!("{}-{}", prefix, i),
            role: ROLES[i % ROLES.len()],
            power,
        })
        .collect()
}

#[tokio::test]
async fn short_handed_side_forfeits_without_simulating() {
    let h = Harness::new();
    let a = h.team("a", 4, 50.0).await;
    let b = h.team("b", 5, 50.0).await;
    let record = h.schedule(a, b, MatchCategory::Regular).await;

    let promoted = h.engine.scheduler().scan_once().await.unwrap();
    assert_eq!(
        promoted,
        vec![(record.id, Promotion::Forfeit { score: [0, 2] })]
    );

    let stored = h.record(record.id).await;
    assert_eq!(stored.status, MatchStatus::Finished);
    assert_eq!(stored.score, Some([0, 2]));
    assert_eq!(stored.winner_team, Some(b));
    assert_eq!(stored.finish_reason, Some(FinishReason::Forfeit));
    assert!(stored.snapshot.is_none());

    let summary = h.engine.driver().tick_once().await;
    assert_eq!(summary.processed, 0);
    assert!(h.broadcaster.for_match(record.id).is_empty());
    assert!(h.store.archived_sets(record.id).is_empty());

    let finished = h.settlement.finished.lock().clone();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].winner_team, Some(b));
    assert_eq!(finished[0].loser_team, Some(a));
}

#[tokio::test]
async fn both_sides_short_is_a_scoreless_forfeit() {
    let h = Harness::new();
    let a = h.team("a", 3, 50.0).await;
    let b = h.team("b", 0, 50.0).await;
    let record = h.schedule(a, b, MatchCategory::Playoff).await;

    let promotion = h.engine.scheduler().promote(record.clone()).await.unwrap();
    assert_eq!(promotion, Promotion::Forfeit { score: [0, 0] });

    let finished = h.settlement.finished.lock().clone();
    assert_eq!(finished[0].winner_team, None);
    assert_eq!(finished[0].loser_team, None);
}

#[tokio::test]
async fn invalid_lineups_are_rejected() {
    let h = Harness::new();
    let a = h.team("a", 5, 50.0).await;
    let b = Uuid::new_v4();
    let mut bad = starters("b", 5, 50.0);
    bad[2].power = -1.0;
    let bad_id = bad[2].id;
    h.rosters.put_starters(b, bad).await.unwrap();

    let record = h.schedule(a, b, MatchCategory::Regular).await;
    let promotion = h.engine.scheduler().promote(record.clone()).await.unwrap();
    assert_eq!(promotion, Promotion::Rejected(RosterError::InvalidPower(bad_id)));
    assert_eq!(h.record(record.id).await.status, MatchStatus::Rejected);
    assert_eq!(h.engine.running(), 0);
    assert!(h.settlement.finished.lock().is_empty());

    let same = h.schedule(a, a, MatchCategory::Regular).await;
    let promotion = h.engine.scheduler().promote(same).await.unwrap();
    assert_eq!(promotion, Promotion::Rejected(RosterError::SameTeam));
}

#[tokio::test]
async fn promotion_is_idempotent() {
    let h = Harness::new();
    let a = h.team("a", 5, 50.0).await;
    let b = h.team("b", 6, 50.0).await;
    let record = h.schedule(a, b, MatchCategory::Regular).await;

    let scheduler = h.engine.scheduler();
    let (first, second) = tokio::join!(
        scheduler.promote(record.clone()),
        scheduler.promote(record.clone())
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|p| matches!(p, Promotion::Started));
    assert_eq!(outcomes, vec![Promotion::Skipped, Promotion::Started]);

    assert_eq!(h.engine.running(), 1);
    assert!(h.engine.scheduler().scan_once().await.unwrap().is_empty());

    let stored = h.record(record.id).await;
    assert_eq!(stored.status, MatchStatus::Running);
    let rosters = stored.rosters.unwrap();
    assert_eq!(rosters[1].members.len(), 5);

    let started = h.broadcaster.for_match(record.id);
    assert!(matches!(started.as_slice(), [ServerMsg::MatchStarted { .. }]));
}

#[tokio::test]
async fn a_full_match_is_archived_and_settled() {
    let h = Harness::new();
    let id = h.started_match().await;
    let ticks = h.run_to_completion().await;

    let stored = h.record(id).await;
    assert_eq!(stored.status, MatchStatus::Finished);
    assert_eq!(stored.finish_reason, Some(FinishReason::Completed));
    let score = stored.score.unwrap();
    assert_eq!(score.iter().max(), Some(&2));
    assert!(score.iter().min().unwrap() < &2);

    let archived = h.store.archived_sets(id);
    assert_eq!(archived.len(), (score[0] + score[1]) as usize);
    assert!(archived.iter().all(|set| !set.events.is_empty()));

    let snapshot = LiveMatch::restore(stored.snapshot.as_ref().unwrap()).unwrap();
    assert!(snapshot.state.is_match_over());

    let finished = h.settlement.finished.lock().clone();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].score, score);
    assert_eq!(finished[0].winner_team, stored.winner_team);

    let messages = h.broadcaster.for_match(id);
    let updates = messages
        .iter()
        .filter(|m| matches!(m, ServerMsg::MatchUpdate(_)))
        .count();
    assert_eq!(updates, ticks);
    assert!(matches!(messages.first(), Some(ServerMsg::MatchStarted { .. })));
    assert!(matches!(
        messages.last(),
        Some(ServerMsg::MatchFinished {
            reason: FinishReason::Completed,
            ..
        })
    ));
    for pair in messages.windows(2) {
        if let ServerMsg::SetFinished { .. } = pair[0] {
            assert!(matches!(
                pair[1],
                ServerMsg::SetStarted { .. } | ServerMsg::MatchFinished { .. }
            ));
        }
    }
    assert_eq!(*h.broadcaster.closed.lock(), vec![id]);

    for set in archived.iter().filter(|set| set.decided_by == DecidedBy::Nexus) {
        let nexus_events = set
            .events
            .iter()
            .filter(|e| e.kind == EventKind::NexusDestroyed)
            .count();
        assert_eq!(nexus_events, 1, "set {}", set.set_number);
        assert_eq!(
            set.events.last().map(|e| e.kind),
            Some(EventKind::NexusDestroyed)
        );

        let finished_at = messages
            .iter()
            .position(|m| {
                matches!(m, ServerMsg::SetFinished { set_number, .. } if *set_number == set.set_number)
            })
            .unwrap();
        let ServerMsg::SetFinished { set_wins, .. } = &messages[finished_at] else {
            unreachable!();
        };
        match set_wins[set.winner_side.index()] {
            1 => assert!(matches!(
                messages[finished_at + 1],
                ServerMsg::SetStarted { set_number, .. } if set_number == set.set_number + 1
            )),
            2 => assert!(matches!(
                messages[finished_at + 1],
                ServerMsg::MatchFinished { .. }
            )),
            wins => panic!("unexpected set wins {wins}"),
        }
    }
    let first = &archived[0];
    if first.decided_by == DecidedBy::Nexus {
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMsg::SetStarted { set_number: 2, set_wins, .. } if set_wins[first.winner_side.index()] == 1
        )));
    }
}

#[tokio::test]
async fn terminate_ends_the_match_on_the_next_tick() {
    let h = Harness::new();
    let id = h.started_match().await;
    for _ in 0..3 {
        h.engine.driver().tick_once().await;
    }
    let clock = h.engine.live_state(id).unwrap().clock();

    assert!(h.engine.terminate(id));
    assert!(!h.engine.terminate(Uuid::new_v4()));

    let summary = h.engine.driver().tick_once().await;
    assert_eq!(summary.finished, 1);
    assert_eq!(h.engine.running(), 0);
    h.engine.driver().flush().await;

    let stored = h.record(id).await;
    assert_eq!(stored.finish_reason, Some(FinishReason::Cancelled));
    assert_eq!(stored.score, Some([0, 0]));
    assert_eq!(stored.winner_team, None);

    let snapshot = LiveMatch::restore(stored.snapshot.as_ref().unwrap()).unwrap();
    assert_eq!(snapshot.state.clock(), clock);

    let finished = h.settlement.finished.lock().clone();
    assert_eq!(finished[0].reason, FinishReason::Cancelled);
}

#[tokio::test]
async fn manual_ticker_drives_the_loop() {
    let h = Harness::new();
    let id = h.started_match().await;

    let (trigger, ticker) = manual_ticker();
    for _ in 0..3 {
        assert!(trigger.fire());
    }
    drop(trigger);
    h.engine.driver().run(ticker).await;

    assert_eq!(h.engine.live_state(id).unwrap().clock(), 30);
}

#[tokio::test]
async fn snapshot_write_failures_do_not_stall_ticking() {
    let h = Harness::new();
    let id = h.started_match().await;

    h.store.set_failing(true);
    for _ in 0..10 {
        let summary = h.engine.driver().tick_once().await;
        assert_eq!(summary.processed, 1);
    }
    assert_eq!(h.engine.live_state(id).unwrap().clock(), 100);

    h.store.set_failing(false);
    h.engine.driver().tick_once().await;
    h.stop(id).await;

    let stored = h.record(id).await;
    let snapshot = LiveMatch::restore(stored.snapshot.as_ref().unwrap()).unwrap();
    assert_eq!(snapshot.state.clock(), 110);
}

#[tokio::test]
async fn restart_resumes_from_the_last_snapshot() {
    let before = Harness::new();
    let id = before.started_match().await;
    for _ in 0..6 {
        before.engine.driver().tick_once().await;
    }
    let state = before.engine.live_state(id).unwrap();
    before.stop(id).await;

    let after = Harness::with_store(before.store.clone(), before.rosters.clone());
    let recovered = after.engine.scheduler().recover().await.unwrap();
    assert_eq!(recovered, vec![(id, Recovery::Resumed)]);
    assert_eq!(after.engine.live_state(id).unwrap(), state);

    after.engine.driver().tick_once().await;
    assert_eq!(after.engine.live_state(id).unwrap().clock(), state.clock() + 10);
}

#[tokio::test]
async fn corrupt_snapshot_restarts_from_captured_rosters() {
    let before = Harness::new();
    let id = before.started_match().await;
    before.engine.driver().tick_once().await;
    before.stop(id).await;
    before
        .store
        .put_snapshot(id, Some(serde_json::json!({ "garbage": true })));

    let after = Harness::with_store(before.store.clone(), before.rosters.clone());
    let recovered = after.engine.scheduler().recover().await.unwrap();
    assert_eq!(recovered, vec![(id, Recovery::Restarted)]);

    let state = after.engine.live_state(id).unwrap();
    assert_eq!(state.clock(), 0);
    assert_eq!(state.set_number(), 1);
    assert_eq!(state.set_wins(), [0, 0]);
}

#[tokio::test]
async fn unrecoverable_matches_are_voided_or_rescheduled() {
    let h = Harness::new();
    let a = h.team("a", 5, 50.0).await;
    let b = h.team("b", 5, 50.0).await;

    // Snapshot garbled and no rosters captured
    let lost = h.schedule(a, b, MatchCategory::Regular).await;
    h.store
        .try_transition(lost.id, MatchStatus::Scheduled, MatchStatus::Running)
        .await
        .unwrap();
    h.store.put_snapshot(lost.id, Some(serde_json::json!("???")));

    // Claimed but crashed before anything was persisted
    let claimed = h.schedule(a, b, MatchCategory::Friendly).await;
    h.store
        .try_transition(claimed.id, MatchStatus::Scheduled, MatchStatus::Running)
        .await
        .unwrap();

    let mut recovered = h.engine.scheduler().recover().await.unwrap();
    recovered.sort_by_key(|(id, _)| *id != lost.id);
    assert_eq!(
        recovered,
        vec![(lost.id, Recovery::Voided), (claimed.id, Recovery::Rescheduled)]
    );

    let voided = h.record(lost.id).await;
    assert_eq!(voided.status, MatchStatus::Finished);
    assert_eq!(voided.finish_reason, Some(FinishReason::Void));
    assert_eq!(voided.score, Some([0, 0]));
    assert_eq!(h.record(claimed.id).await.status, MatchStatus::Scheduled);
    assert_eq!(h.engine.running(), 0);
}
