//! # In-Memory Adapters
//!
//! Port implementations for local nodes: a loopback peer network, a wallet
//! on a simulated chain, JSON file persistence and the metrics recorder.

pub mod ledger;
pub mod loopback;
pub mod metrics;
pub mod persistence;
pub mod wallet;

pub use ledger::SimulatedLedger;
pub use loopback::{LoopbackBus, LoopbackNetwork};
pub use metrics::spawn_metrics_recorder;
pub use persistence::{
    load_snapshot, write_snapshot, JsonFilePersistence, NoPersistence, PersistenceError,
    PersistenceWriter, SnapshotSource,
};
pub use wallet::SimulatedWallet;
