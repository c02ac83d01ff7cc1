//! # JSON File Persistence
//!
//! `request_persistence` only queues a signal. A writer task collects the
//! signals, waits out the debounce period and writes one snapshot of all
//! trades to `<data_dir>/trades.json` (temp file, then rename).

use serde::{Deserialize, Serialize};
use shared_types::ports::PersistenceRequester;
use shared_types::Trade;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SNAPSHOT_FILE: &str = "trades.json";

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Provides the trades to persist.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> Vec<Trade>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    trades: Vec<Trade>,
}

/// Fire-and-forget persistence requester backed by a JSON file.
pub struct JsonFilePersistence {
    path: PathBuf,
    requests: mpsc::UnboundedSender<()>,
}

/// Receiving half of `JsonFilePersistence`; writes the snapshots.
pub struct PersistenceWriter {
    path: PathBuf,
    debounce: Duration,
    requests: mpsc::UnboundedReceiver<()>,
}

impl JsonFilePersistence {
    pub fn new(data_dir: &Path, debounce: Duration) -> (Arc<Self>, PersistenceWriter) {
        let path = data_dir.join(SNAPSHOT_FILE);
        let (tx, rx) = mpsc::unbounded_channel();
        let persistence = Arc::new(Self {
            path: path.clone(),
            requests: tx,
        });
        let writer = PersistenceWriter {
            path,
            debounce,
            requests: rx,
        };
        (persistence, writer)
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceRequester for JsonFilePersistence {
    fn request_persistence(&self) {
        // Closed channel: the writer stopped with the node.
        let _ = self.requests.send(());
    }
}

impl PersistenceWriter {
    /// Run the writer until the source or every requester is gone.
    pub fn spawn(self, source: Weak<dyn SnapshotSource>) -> JoinHandle<()> {
        tokio::spawn(self.run(source))
    }

    async fn run(mut self, source: Weak<dyn SnapshotSource>) {
        while self.requests.recv().await.is_some() {
            tokio::time::sleep(self.debounce).await;
            let mut coalesced = 1usize;
            while self.requests.try_recv().is_ok() {
                coalesced += 1;
            }

            let Some(source) = source.upgrade() else {
                break;
            };
            let trades = source.snapshot();
            drop(source);

            match write_snapshot(&self.path, trades).await {
                Ok(count) => debug!(
                    path = %self.path.display(),
                    trades = count,
                    requests = coalesced,
                    "Trades persisted"
                ),
                Err(e) => warn!(path = %self.path.display(), error = %e, "Persisting trades failed"),
            }
        }
        debug!(path = %self.path.display(), "Persistence writer stopped");
    }
}

/// Write `trades` to `path`, replacing the previous snapshot.
pub async fn write_snapshot(path: &Path, trades: Vec<Trade>) -> Result<usize, PersistenceError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let count = trades.len();
    let bytes = serde_json::to_vec_pretty(&Snapshot { trades })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(count)
}

/// Read the trades of a snapshot file. A missing file holds no trades.
pub async fn load_snapshot(path: &Path) -> Result<Vec<Trade>, PersistenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    Ok(snapshot.trades)
}

/// Requester for nodes running without persistence.
#[derive(Debug, Default)]
pub struct NoPersistence;

impl PersistenceRequester for NoPersistence {
    fn request_persistence(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shared_types::fixtures::offer;
    use shared_types::{NodeAddress, OfferDirection, ProtocolKind, TradeRole, COIN};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Trades {
        trades: Mutex<Vec<Trade>>,
        reads: AtomicUsize,
    }

    impl SnapshotSource for Trades {
        fn snapshot(&self) -> Vec<Trade> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.trades.lock().clone()
        }
    }

    fn trade() -> Trade {
        Trade::new(
            offer(OfferDirection::Sell, ProtocolKind::Escrow),
            TradeRole::BuyerAsTaker,
            COIN / 2,
            2_000_000,
            NodeAddress::new("maker.onion", 9999),
        )
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("px-persistence-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = scratch_dir("round-trip");
        let path = dir.join(SNAPSHOT_FILE);
        let trades = vec![trade()];

        assert_eq!(write_snapshot(&path, trades.clone()).await.unwrap(), 1);
        assert_eq!(load_snapshot(&path).await.unwrap(), trades);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty() {
        let path = scratch_dir("missing").join(SNAPSHOT_FILE);
        assert!(load_snapshot(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requests_are_debounced() {
        let dir = scratch_dir("debounce");
        let (persistence, writer) = JsonFilePersistence::new(&dir, Duration::from_millis(50));
        let source = Arc::new(Trades::default());
        source.trades.lock().push(trade());
        let weak: Weak<Trades> = Arc::downgrade(&source);
        let handle = writer.spawn(weak);

        for _ in 0..5 {
            persistence.request_persistence();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(load_snapshot(persistence.path()).await.unwrap().len(), 1);

        handle.abort();
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_writer_stops_with_source() {
        let dir = scratch_dir("stops");
        let (persistence, writer) = JsonFilePersistence::new(&dir, Duration::from_millis(10));
        let source: Arc<dyn SnapshotSource> = Arc::new(Trades::default());
        let handle = writer.spawn(Arc::downgrade(&source));
        drop(source);

        persistence.request_persistence();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
