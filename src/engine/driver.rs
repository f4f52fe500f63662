//! Tick driver: steps every running match once per tick
//!
//! Matches are fanned out over tokio tasks, at most `tick_workers` at a time.
//! Each step runs under the match's own lock; snapshots, archives, broadcasts
//! and settlement happen after the lock is released and never hold up the
//! next tick.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::pool::MatchEntry;
use super::tick::{step, Ending, TickOutput};
use super::EngineContext;
use crate::settlement::MatchFinished;
use crate::sim::state::StateError;
use crate::store::ArchivedSet;
use crate::util::time::Ticker;

/// What one tick did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: usize,
    pub finished: usize,
}

#[derive(Clone)]
pub struct TickDriver {
    ctx: Arc<EngineContext>,
    workers: Arc<Semaphore>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TickDriver {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let workers = ctx.settings.tick_workers.max(1);
        Self {
            ctx,
            workers: Arc::new(Semaphore::new(workers)),
            background: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tick until the ticker stops
    pub async fn run<T: Ticker>(&self, mut ticker: T) {
        info!(
            sim_seconds = self.ctx.settings.sim_seconds_per_tick,
            workers = self.ctx.settings.tick_workers,
            "Tick driver started"
        );

        while ticker.tick().await {
            let summary = self.tick_once().await;
            if summary.finished > 0 {
                debug!(
                    processed = summary.processed,
                    finished = summary.finished,
                    "Tick complete"
                );
            }
        }

        info!("Tick driver stopped");
    }

    /// Step every match currently in the pool once
    pub async fn tick_once(&self) -> TickSummary {
        let sim_seconds = self.ctx.settings.sim_seconds_per_tick;
        let mut tasks = JoinSet::new();

        for entry in self.ctx.pool.entries() {
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            tasks.spawn(async move {
                let _permit = permit;
                let cancel = entry.cancel_requested();
                let result = {
                    let mut live = entry.lock();
                    step(&mut live, sim_seconds, cancel)
                };
                (entry, result)
            });
        }

        let mut summary = TickSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let (entry, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "Match step panicked");
                    continue;
                }
            };
            summary.processed += 1;

            match result {
                Ok(output) => {
                    if self.apply(entry, output) {
                        summary.finished += 1;
                    }
                }
                Err(StateError::MatchOver) => {
                    // Already concluded by an earlier tick; finalization owns it
                    self.ctx.pool.remove(&entry.id());
                }
                Err(e) => {
                    warn!(match_id = %entry.id(), error = %e, "Match step failed");
                }
            }
        }

        summary
    }

    /// Apply a step's side effects. Returns true when the match ended.
    fn apply(&self, entry: Arc<MatchEntry>, output: TickOutput) -> bool {
        let id = entry.id();
        let TickOutput {
            messages,
            snapshot,
            archived,
            ending,
        } = output;

        if let Some(snapshot) = snapshot {
            entry.writer().publish(snapshot);
        }

        for msg in messages {
            self.ctx.broadcaster.publish(id, msg);
        }

        match ending {
            None => {
                for set in archived {
                    let ctx = self.ctx.clone();
                    self.track(tokio::spawn(async move {
                        archive(&ctx, &set).await;
                    }));
                }
                false
            }
            Some(ending) => {
                self.ctx.pool.remove(&id);
                let ctx = self.ctx.clone();
                self.track(tokio::spawn(async move {
                    finalize(ctx, entry, ending, archived).await;
                }));
                true
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = self.background.lock();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Wait for every archive and finalization started so far
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background match task failed");
            }
        }
    }
}

async fn archive(ctx: &EngineContext, set: &ArchivedSet) {
    if let Err(e) = ctx.store.archive_set(set).await {
        warn!(
            match_id = %set.match_id,
            set = set.set_number,
            error = %e,
            "Archiving set failed"
        );
    }
}

/// Final flush of a match that left the pool: last snapshot, archived sets,
/// result and settlement, in that order
async fn finalize(
    ctx: Arc<EngineContext>,
    entry: Arc<MatchEntry>,
    ending: Ending,
    archived: Vec<ArchivedSet>,
) {
    let id = entry.id();
    entry.writer().close().await;

    for set in &archived {
        archive(&ctx, set).await;
    }

    let notification = MatchFinished::new(
        id,
        entry.category(),
        entry.teams(),
        ending.winner,
        ending.score,
        ending.reason,
        ctx.clock.now(),
    );
    ctx.settle(notification).await;
    ctx.broadcaster.close(id);
}
