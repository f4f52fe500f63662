//! Live match engine: running pool, tick driver and scheduler
//!
//! `Engine` owns the shared `EngineContext` every loop works against. The
//! driver and the scheduler are independent and only meet in the pool and the
//! store.

pub mod driver;
pub mod pool;
pub mod scheduler;
pub mod tick;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::settlement::{MatchFinished, Settlement};
use crate::sim::state::MatchState;
use crate::store::{FinalResult, MatchStore, RosterDirectory};
use crate::util::time::Clock;
use crate::ws::hub::Broadcaster;
use crate::ws::protocol::ServerMsg;

pub use driver::{TickDriver, TickSummary};
pub use pool::{LiveMatch, MatchEntry, MatchPool, SnapshotWriter};
pub use scheduler::{Promotion, PromotionError, Recovery, Scheduler};

const RECORD_ATTEMPTS: u32 = 3;
const RECORD_BACKOFF: Duration = Duration::from_millis(250);

/// Cadence and fan-out of the engine loops
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub sim_seconds_per_tick: u32,
    pub scheduler_interval: Duration,
    /// Matches stepped concurrently within one tick
    pub tick_workers: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            sim_seconds_per_tick: 10,
            scheduler_interval: Duration::from_millis(5000),
            tick_workers: 8,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval,
            sim_seconds_per_tick: config.sim_seconds_per_tick,
            scheduler_interval: config.scheduler_interval,
            tick_workers: config.tick_workers,
        }
    }
}

/// Everything the driver and scheduler share
pub struct EngineContext {
    pub pool: MatchPool,
    pub store: Arc<dyn MatchStore>,
    pub rosters: Arc<dyn RosterDirectory>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub settlement: Arc<dyn Settlement>,
    pub clock: Arc<dyn Clock>,
    pub settings: EngineSettings,
}

impl EngineContext {
    /// Put a live match into the running pool with its own snapshot writer.
    /// Returns false when the id is already running.
    pub fn admit(&self, live: LiveMatch) -> bool {
        let id = live.state.match_id();
        if self.pool.contains(&id) {
            return false;
        }
        let writer = SnapshotWriter::spawn(id, self.store.clone());
        self.pool.admit(MatchEntry::new(live, writer))
    }

    /// Record the final result, then hand the notification to settlement.
    /// Settlement is notified even if the result could not be written.
    pub async fn settle(&self, notification: MatchFinished) {
        let id = notification.match_id;
        let result = FinalResult {
            score: notification.score,
            winner_team: notification.winner_team,
            reason: notification.reason,
            finished_at: notification.finished_at,
        };

        for attempt in 1..=RECORD_ATTEMPTS {
            match self.store.record_result(id, &result).await {
                Ok(()) => break,
                Err(e) if attempt < RECORD_ATTEMPTS => {
                    warn!(match_id = %id, attempt, error = %e, "Recording result failed, retrying");
                    tokio::time::sleep(RECORD_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(match_id = %id, error = %e, "Final result could not be recorded");
                }
            }
        }

        info!(
            match_id = %id,
            score = ?notification.score,
            reason = ?notification.reason,
            "Match finished"
        );
        self.settlement.match_finished(notification);
    }
}

pub struct Engine {
    ctx: Arc<EngineContext>,
    driver: TickDriver,
    scheduler: Scheduler,
}

impl Engine {
    pub fn new(
        store: Arc<dyn MatchStore>,
        rosters: Arc<dyn RosterDirectory>,
        broadcaster: Arc<dyn Broadcaster>,
        settlement: Arc<dyn Settlement>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let ctx = Arc::new(EngineContext {
            pool: MatchPool::new(),
            store,
            rosters,
            broadcaster,
            settlement,
            clock,
            settings,
        });

        Self {
            driver: TickDriver::new(ctx.clone()),
            scheduler: Scheduler::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn driver(&self) -> &TickDriver {
        &self.driver
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Flag a running match for cancellation. The next tick concludes it.
    pub fn terminate(&self, id: Uuid) -> bool {
        match self.ctx.pool.get(&id) {
            Some(entry) => {
                entry.request_cancel();
                info!(match_id = %id, "Termination requested");
                true
            }
            None => false,
        }
    }

    pub fn live_state(&self, id: Uuid) -> Option<MatchState> {
        let entry = self.ctx.pool.get(&id)?;
        let live = entry.lock();
        Some(live.state.clone())
    }

    /// Current `match_update` for a running match, sent to new spectators
    pub fn live_update(&self, id: Uuid) -> Option<ServerMsg> {
        let entry = self.ctx.pool.get(&id)?;
        let live = entry.lock();
        Some(ServerMsg::match_update(&live.state))
    }

    pub fn running(&self) -> usize {
        self.ctx.pool.len()
    }
}
