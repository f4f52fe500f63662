//! Settlement boundary: "match finished" notifications for rewards and
//! standings, delivered off the tick path

pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::sim::roster::{MatchCategory, Side};
use crate::store::FinishReason;

pub use webhook::WebhookSink;

/// Delivery attempts per notification
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Final result handed to the settlement collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFinished {
    pub match_id: Uuid,
    pub category: MatchCategory,
    pub side_a_team: Uuid,
    pub side_b_team: Uuid,
    /// Absent when nobody won (0-0 forfeit, void, or a tied termination)
    pub winner_team: Option<Uuid>,
    pub loser_team: Option<Uuid>,
    pub score: [u8; 2],
    pub reason: FinishReason,
    pub finished_at: DateTime<Utc>,
}

impl MatchFinished {
    pub fn new(
        match_id: Uuid,
        category: MatchCategory,
        teams: [Uuid; 2],
        winner: Option<Side>,
        score: [u8; 2],
        reason: FinishReason,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            category,
            side_a_team: teams[0],
            side_b_team: teams[1],
            winner_team: winner.map(|side| teams[side.index()]),
            loser_team: winner.map(|side| teams[side.opponent().index()]),
            score,
            reason,
            finished_at,
        }
    }
}

/// Engine-facing side of settlement. Must return immediately.
pub trait Settlement: Send + Sync {
    fn match_finished(&self, notification: MatchFinished);
}

/// Where queued notifications end up
#[async_trait]
pub trait SettlementSink: Send + Sync {
    async fn deliver(&self, notification: &MatchFinished) -> Result<(), SettlementError>;
}

/// Sink that only logs, used when no webhook is configured
pub struct LogSink;

#[async_trait]
impl SettlementSink for LogSink {
    async fn deliver(&self, n: &MatchFinished) -> Result<(), SettlementError> {
        info!(
            match_id = %n.match_id,
            winner = ?n.winner_team,
            score = ?n.score,
            reason = ?n.reason,
            "Match settled"
        );
        Ok(())
    }
}

/// Unbounded queue drained by a background worker
#[derive(Clone)]
pub struct SettlementQueue {
    tx: mpsc::UnboundedSender<MatchFinished>,
}

impl SettlementQueue {
    /// Start the worker. It runs until every queue handle is dropped.
    pub fn spawn(sink: Arc<dyn SettlementSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<MatchFinished>();

        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                deliver_with_retry(sink.as_ref(), &notification).await;
            }
        });

        (Self { tx }, worker)
    }
}

impl Settlement for SettlementQueue {
    fn match_finished(&self, notification: MatchFinished) {
        let match_id = notification.match_id;
        if self.tx.send(notification).is_err() {
            error!(match_id = %match_id, "Settlement worker is gone, notification lost");
        }
    }
}

async fn deliver_with_retry(sink: &dyn SettlementSink, notification: &MatchFinished) {
    for attempt in 1..=MAX_ATTEMPTS {
        match sink.deliver(notification).await {
            Ok(()) => return,
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    match_id = %notification.match_id,
                    attempt,
                    error = %e,
                    "Settlement delivery failed, retrying"
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(e) => {
                error!(
                    match_id = %notification.match_id,
                    error = %e,
                    "Settlement delivery failed, giving up"
                );
            }
        }
    }
}

/// Settlement delivery errors
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Settlement endpoint answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid signing secret")]
    InvalidSecret,
}
