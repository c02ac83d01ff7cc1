//! # Node Container
//!
//! Configuration and the wiring of one exchange node.

pub mod config;
pub mod node;

pub use config::{ConfigError, NodeConfig};
pub use node::{Environment, ExchangeNode};
