//! # Shared Bus - In-Process Event Bus
//!
//! Protocol subsystems report observable effects (state transitions,
//! failures, dispute escalation) as `ExchangeEvent`s. Consumers subscribe
//! with a filter and never call back into the protocol.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Trade actor  │                    │ Metrics / UI │
//! │              │    publish()       │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! The crate also holds the `MessageUidCache` that de-duplicates inbound
//! peer messages before they reach a protocol.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;
pub mod uid_cache;

pub use events::{source, EventFilter, EventTopic, ExchangeEvent};
pub use publisher::{EventPublisher, InMemoryEventBus, RecordingPublisher};
pub use subscriber::{Subscription, SubscriptionError};
pub use uid_cache::{MessageUidCache, UidError};

/// Maximum events to buffer per subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
