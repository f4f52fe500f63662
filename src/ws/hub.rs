//! Per-match pub/sub fan-out to spectator sockets

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::protocol::ServerMsg;

/// Messages buffered per match before slow spectators start lagging
const CHANNEL_CAPACITY: usize = 256;

/// Outbound side of the broadcast gateway. Publishing never blocks and never
/// fails the caller.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, match_id: Uuid, msg: ServerMsg);

    /// Drop the match's channel once its final message went out
    fn close(&self, match_id: Uuid);
}

/// tokio broadcast channel per match, created on first use
#[derive(Default)]
pub struct Hub {
    channels: DashMap<Uuid, broadcast::Sender<ServerMsg>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, match_id: Uuid) -> broadcast::Receiver<ServerMsg> {
        self.channels
            .entry(match_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the channel once nobody listens any more
    pub fn release(&self, match_id: Uuid) {
        self.channels
            .remove_if(&match_id, |_, tx| tx.receiver_count() == 0);
    }

    pub fn spectators(&self, match_id: Uuid) -> usize {
        self.channels
            .get(&match_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Broadcaster for Hub {
    fn publish(&self, match_id: Uuid, msg: ServerMsg) {
        let Some(tx) = self.channels.get(&match_id) else {
            return;
        };
        let kind = msg.kind();
        if tx.send(msg).is_err() {
            debug!(match_id = %match_id, kind, "No spectators, message dropped");
        }
    }

    fn close(&self, match_id: Uuid) {
        self.channels.remove(&match_id);
    }
}
