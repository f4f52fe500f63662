//! Match scheduler: promotes due matches into the running pool and resumes
//! running matches after a restart

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pool::{LiveMatch, SnapshotError};
use super::EngineContext;
use crate::settlement::MatchFinished;
use crate::sim::outcome::draw_set_budget;
use crate::sim::roster::{Roster, RosterError, Side};
use crate::sim::state::MatchState;
use crate::sim::tuning::ROSTER_SIZE;
use crate::store::{FinishReason, MatchRecord, MatchStatus, StoreError};
use crate::util::time::Ticker;
use crate::ws::protocol::ServerMsg;

/// What promoting one due match did
#[derive(Debug, Clone, PartialEq)]
pub enum Promotion {
    /// Somebody else claimed it, or it is already running
    Skipped,
    /// A side could not field five starters; settled without simulation
    Forfeit { score: [u8; 2] },
    /// Input failed validation; the match is marked rejected
    Rejected(RosterError),
    /// Live in the running pool
    Started,
}

/// What recovery did with one persisted running match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Already in the pool
    Skipped,
    /// Picked up from its snapshot
    Resumed,
    /// Snapshot unusable; simulated again from the captured rosters
    Restarted,
    /// Snapshot shows the match over but it was never recorded
    Settled,
    /// Neither snapshot nor rosters survive; finished 0-0
    Voided,
    /// Crashed before rosters were captured; scheduled again
    Rescheduled,
}

#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Forfeit scoreline and winner when either side is short-handed
pub fn forfeit_result(count_a: usize, count_b: usize) -> Option<([u8; 2], Option<Side>)> {
    match (count_a < ROSTER_SIZE, count_b < ROSTER_SIZE) {
        (false, false) => None,
        (true, true) => Some(([0, 0], None)),
        (true, false) => Some(([0, 2], Some(Side::B))),
        (false, true) => Some(([2, 0], Some(Side::A))),
    }
}

#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<EngineContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Scan for due matches on every tick of `ticker`
    pub async fn run<T: Ticker>(&self, mut ticker: T) {
        info!("Scheduler started");
        while ticker.tick().await {
            if let Err(e) = self.scan_once().await {
                warn!(error = %e, "Scheduler scan failed");
            }
        }
        info!("Scheduler stopped");
    }

    /// Promote every scheduled match whose start time has passed
    pub async fn scan_once(&self) -> Result<Vec<(Uuid, Promotion)>, StoreError> {
        let due = self.ctx.store.list_due(self.ctx.clock.now()).await?;
        let mut promoted = Vec::with_capacity(due.len());

        for record in due {
            let id = record.id;
            match self.promote(record).await {
                Ok(promotion) => promoted.push((id, promotion)),
                Err(e) => warn!(match_id = %id, error = %e, "Promotion failed, will retry"),
            }
        }

        Ok(promoted)
    }

    /// Claim a scheduled match and start it. Any failure after the claim
    /// returns the match to `scheduled` so a later scan retries it.
    pub async fn promote(&self, record: MatchRecord) -> Result<Promotion, PromotionError> {
        let id = record.id;
        if self.ctx.pool.contains(&id) {
            return Ok(Promotion::Skipped);
        }

        let claimed = self
            .ctx
            .store
            .try_transition(id, MatchStatus::Scheduled, MatchStatus::Running)
            .await?;
        if !claimed {
            debug!(match_id = %id, "Match already claimed");
            return Ok(Promotion::Skipped);
        }

        match self.start(&record).await {
            Ok(promotion) => Ok(promotion),
            Err(e) => {
                if let Err(revert) = self
                    .ctx
                    .store
                    .try_transition(id, MatchStatus::Running, MatchStatus::Scheduled)
                    .await
                {
                    warn!(match_id = %id, error = %revert, "Could not release claim");
                }
                Err(e)
            }
        }
    }

    async fn start(&self, record: &MatchRecord) -> Result<Promotion, PromotionError> {
        let id = record.id;
        if record.side_a_team == record.side_b_team {
            return self.reject(id, RosterError::SameTeam).await;
        }

        let starters_a = self.ctx.rosters.starters(record.side_a_team).await?;
        let starters_b = self.ctx.rosters.starters(record.side_b_team).await?;

        if let Some((score, winner)) = forfeit_result(starters_a.len(), starters_b.len()) {
            info!(
                match_id = %id,
                side_a = starters_a.len(),
                side_b = starters_b.len(),
                "Short-handed lineup, match forfeited"
            );
            let notification = MatchFinished::new(
                id,
                record.category,
                [record.side_a_team, record.side_b_team],
                winner,
                score,
                FinishReason::Forfeit,
                self.ctx.clock.now(),
            );
            self.ctx.settle(notification).await;
            return Ok(Promotion::Forfeit { score });
        }

        let side_a = Roster::from_starters(record.side_a_team, starters_a, record.tactics_a);
        let side_b = Roster::from_starters(record.side_b_team, starters_b, record.tactics_b);
        let (side_a, side_b) = match (side_a, side_b) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return self.reject(id, e).await,
        };

        self.ctx
            .store
            .capture_rosters(id, &[side_a.clone(), side_b.clone()])
            .await?;

        let live = fresh_match(id, record, side_a, side_b);
        self.ctx.store.save_snapshot(id, &live.snapshot()?).await?;

        let started = ServerMsg::match_started(&live.state);
        if !self.ctx.admit(live) {
            return Ok(Promotion::Skipped);
        }
        self.ctx.broadcaster.publish(id, started);

        info!(match_id = %id, category = ?record.category, "Match started");
        Ok(Promotion::Started)
    }

    async fn reject(&self, id: Uuid, reason: RosterError) -> Result<Promotion, PromotionError> {
        warn!(match_id = %id, error = %reason, "Match input rejected");
        self.ctx
            .store
            .try_transition(id, MatchStatus::Running, MatchStatus::Rejected)
            .await?;
        Ok(Promotion::Rejected(reason))
    }

    /// Bring every match the store still lists as running back into the pool
    pub async fn recover(&self) -> Result<Vec<(Uuid, Recovery)>, StoreError> {
        let running = self.ctx.store.list_running().await?;
        let mut recovered = Vec::with_capacity(running.len());

        for record in running {
            let id = record.id;
            match self.recover_one(record).await {
                Ok(outcome) => {
                    info!(match_id = %id, outcome = ?outcome, "Recovered running match");
                    recovered.push((id, outcome));
                }
                Err(e) => warn!(match_id = %id, error = %e, "Recovery failed"),
            }
        }

        Ok(recovered)
    }

    async fn recover_one(&self, record: MatchRecord) -> Result<Recovery, PromotionError> {
        let id = record.id;
        if self.ctx.pool.contains(&id) {
            return Ok(Recovery::Skipped);
        }

        let restored = record.snapshot.as_ref().map(LiveMatch::restore);
        match restored {
            Some(Ok(live)) if live.state.is_match_over() => {
                let state = &live.state;
                let winner = state.winning_side();
                let reason = match winner {
                    Some(side) if state.set_wins()[side.index()] == state.sets_to_win() => {
                        FinishReason::Completed
                    }
                    _ => FinishReason::Cancelled,
                };
                let notification = MatchFinished::new(
                    id,
                    record.category,
                    [record.side_a_team, record.side_b_team],
                    winner,
                    state.set_wins(),
                    reason,
                    self.ctx.clock.now(),
                );
                self.ctx.settle(notification).await;
                Ok(Recovery::Settled)
            }
            Some(Ok(live)) => {
                if self.ctx.admit(live) {
                    Ok(Recovery::Resumed)
                } else {
                    Ok(Recovery::Skipped)
                }
            }
            Some(Err(e)) => {
                warn!(match_id = %id, error = %e, "Snapshot unusable");
                self.restart_or_void(record, e).await
            }
            None if record.rosters.is_some() => {
                self.restart_or_void(record, SnapshotError::Missing).await
            }
            None => {
                self.ctx
                    .store
                    .try_transition(id, MatchStatus::Running, MatchStatus::Scheduled)
                    .await?;
                Ok(Recovery::Rescheduled)
            }
        }
    }

    async fn restart_or_void(
        &self,
        record: MatchRecord,
        cause: SnapshotError,
    ) -> Result<Recovery, PromotionError> {
        let id = record.id;
        match record.rosters.clone() {
            Some([side_a, side_b]) => {
                debug!(match_id = %id, cause = %cause, "Restarting from captured rosters");
                let live = fresh_match(id, &record, side_a, side_b);
                self.ctx.store.save_snapshot(id, &live.snapshot()?).await?;
                let started = ServerMsg::match_started(&live.state);
                if !self.ctx.admit(live) {
                    return Ok(Recovery::Skipped);
                }
                self.ctx.broadcaster.publish(id, started);
                Ok(Recovery::Restarted)
            }
            None => {
                let notification = MatchFinished::new(
                    id,
                    record.category,
                    [record.side_a_team, record.side_b_team],
                    None,
                    [0, 0],
                    FinishReason::Void,
                    self.ctx.clock.now(),
                );
                self.ctx.settle(notification).await;
                Ok(Recovery::Voided)
            }
        }
    }
}

fn fresh_match(id: Uuid, record: &MatchRecord, side_a: Roster, side_b: Roster) -> LiveMatch {
    let mut rng = ChaCha8Rng::from_entropy();
    let budget = draw_set_budget(&mut rng);
    let state = MatchState::new(id, record.category, side_a, side_b, budget);
    LiveMatch::new(state, rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forfeit_scores_follow_who_is_short() {
        assert_eq!(forfeit_result(5, 5), None);
        assert_eq!(forfeit_result(7, 5), None);
        assert_eq!(forfeit_result(4, 5), Some(([0, 2], Some(Side::B))));
        assert_eq!(forfeit_result(5, 0), Some(([2, 0], Some(Side::A))));
        assert_eq!(forfeit_result(3, 4), Some(([0, 0], None)));
    }
}
