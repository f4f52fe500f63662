//! Running pool: one entry per live match, keyed by match id

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sim::roster::{MatchCategory, Side};
use crate::sim::state::MatchState;
use crate::store::MatchStore;

/// Bumped whenever the persisted snapshot layout changes
pub const SNAPSHOT_VERSION: u32 = 1;

/// Live state plus the RNG that drives it. The RNG is persisted with the
/// state so a resumed match keeps its random stream.
#[derive(Debug, Clone)]
pub struct LiveMatch {
    pub state: MatchState,
    pub rng: ChaCha8Rng,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    state: &'a MatchState,
    rng: &'a ChaCha8Rng,
}

#[derive(Deserialize)]
struct SnapshotOwned {
    version: u32,
    state: MatchState,
    rng: ChaCha8Rng,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot does not decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    Version(u32),

    #[error("No snapshot was persisted")]
    Missing,
}

impl LiveMatch {
    pub fn new(state: MatchState, rng: ChaCha8Rng) -> Self {
        Self { state, rng }
    }

    pub fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(SnapshotRef {
            version: SNAPSHOT_VERSION,
            state: &self.state,
            rng: &self.rng,
        })
    }

    pub fn restore(value: &serde_json::Value) -> Result<Self, SnapshotError> {
        let snapshot = SnapshotOwned::deserialize(value)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(snapshot.version));
        }
        Ok(Self {
            state: snapshot.state,
            rng: snapshot.rng,
        })
    }
}

/// Coalescing background writer. Only the newest published snapshot is
/// written; a write in flight is never interrupted.
pub struct SnapshotWriter {
    tx: Mutex<Option<watch::Sender<Option<serde_json::Value>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    pub fn spawn(match_id: Uuid, store: Arc<dyn MatchStore>) -> Self {
        let (tx, mut rx) = watch::channel::<Option<serde_json::Value>>(None);

        let task = tokio::spawn(async move {
            loop {
                let closed = rx.changed().await.is_err();
                let latest = rx.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    if let Err(e) = store.save_snapshot(match_id, &snapshot).await {
                        warn!(match_id = %match_id, error = %e, "Snapshot write failed");
                    }
                }
                if closed {
                    break;
                }
            }
            debug!(match_id = %match_id, "Snapshot writer stopped");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Replace the pending snapshot, never waits
    pub fn publish(&self, snapshot: serde_json::Value) {
        if let Some(tx) = self.tx.lock().as_ref() {
            tx.send_replace(Some(snapshot));
        }
    }

    /// Flush the last published snapshot and stop the writer
    pub async fn close(&self) {
        drop(self.tx.lock().take());
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Snapshot writer task failed");
            }
        }
    }
}

/// A match in the running pool
pub struct MatchEntry {
    id: Uuid,
    category: MatchCategory,
    teams: [Uuid; 2],
    live: Mutex<LiveMatch>,
    cancel: AtomicBool,
    writer: SnapshotWriter,
}

impl MatchEntry {
    pub fn new(live: LiveMatch, writer: SnapshotWriter) -> Self {
        let state = &live.state;
        Self {
            id: state.match_id(),
            category: state.category(),
            teams: [
                state.roster(Side::A).team_id,
                state.roster(Side::B).team_id,
            ],
            live: Mutex::new(live),
            cancel: AtomicBool::new(false),
            writer,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn category(&self) -> MatchCategory {
        self.category
    }

    pub fn teams(&self) -> [Uuid; 2] {
        self.teams
    }

    /// Serializes this match's read-modify-persist cycle
    pub fn lock(&self) -> MutexGuard<'_, LiveMatch> {
        self.live.lock()
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }
}

/// Matches currently being ticked
#[derive(Default)]
pub struct MatchPool {
    matches: DashMap<Uuid, Arc<MatchEntry>>,
}

impl MatchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the id is already present. Returns whether it was added.
    pub fn admit(&self, entry: MatchEntry) -> bool {
        match self.matches.entry(entry.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
                true
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<MatchEntry>> {
        self.matches.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.matches.contains_key(id)
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<MatchEntry>> {
        self.matches.remove(id).map(|(_, e)| e)
    }

    /// Snapshot of the current members, so ticking never holds a shard lock
    pub fn entries(&self) -> Vec<Arc<MatchEntry>> {
        self.matches.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::roster::fixtures::roster;
    use crate::sim::roster::MatchCategory;
    use crate::store::{MatchRecord, MemoryStore};
    use rand::SeedableRng;

    fn live(id: Uuid) -> LiveMatch {
        let state = MatchState::new(
            id,
            MatchCategory::Regular,
            roster("a", 50.0),
            roster("b", 50.0),
            3000,
        );
        LiveMatch::new(state, ChaCha8Rng::seed_from_u64(5))
    }

    #[test]
    fn snapshot_restores_state_and_rng_stream() {
        use rand::Rng;

        let mut original = live(Uuid::new_v4());
        original.state.advance_clock(120).unwrap();
        let value = original.snapshot().unwrap();
        let mut restored = LiveMatch::restore(&value).unwrap();

        assert_eq!(restored.state, original.state);
        let a: u64 = original.rng.gen();
        let b: u64 = restored.rng.gen();
        assert_eq!(a, b);
    }

    #[test]
    fn foreign_or_garbled_snapshots_are_refused() {
        let mut value = live(Uuid::new_v4()).snapshot().unwrap();
        value["version"] = serde_json::json!(99);
        assert!(matches!(
            LiveMatch::restore(&value),
            Err(SnapshotError::Version(99))
        ));
        assert!(matches!(
            LiveMatch::restore(&serde_json::json!({"state": 1})),
            Err(SnapshotError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn admission_is_idempotent() {
        let store: Arc<dyn MatchStore> = Arc::new(MemoryStore::new());
        let pool = MatchPool::new();
        let id = Uuid::new_v4();

        let first = MatchEntry::new(live(id), SnapshotWriter::spawn(id, store.clone()));
        let second = MatchEntry::new(live(id), SnapshotWriter::spawn(id, store.clone()));
        assert!(pool.admit(first));
        assert!(!pool.admit(second));
        assert_eq!(pool.len(), 1);

        let entry = pool.get(&id).unwrap();
        assert!(!entry.cancel_requested());
        entry.request_cancel();
        assert!(pool.get(&id).unwrap().cancel_requested());
    }

    #[tokio::test]
    async fn writer_flushes_the_newest_snapshot_on_close() {
        let store = Arc::new(MemoryStore::new());
        let record = store
            .insert_scheduled(MatchRecord::scheduled(
                Uuid::new_v4(),
                Uuid::new_v4(),
                MatchCategory::Regular,
                chrono::Utc::now(),
            ))
            .await
            .unwrap();

        let writer = SnapshotWriter::spawn(record.id, store.clone());
        for v in 0..50 {
            writer.publish(serde_json::json!({ "v": v }));
        }
        writer.close().await;

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.snapshot, Some(serde_json::json!({ "v": 49 })));
        assert!(store.snapshot_writes(record.id) <= 50);
    }
}
