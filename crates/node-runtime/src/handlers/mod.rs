//! # Inbound Handlers
//!
//! Routing of peer messages to the managers that own them.

pub mod router;

pub use router::MessageRouter;
