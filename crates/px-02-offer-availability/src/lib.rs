//! # px-02-offer-availability
//!
//! Offer Availability Handshake, run before a trade begins.
//!
//! ## Taker side
//!
//! ```text
//! IDLE ──→ AWAITING_PEER_ADDRESS ──→ AWAITING_RESPONSE ──→ FINISHED(result)
//!                                           │
//!                                           └── 10 s ──→ FINISHED(TIMEOUT)
//! ```
//!
//! - Responses for any other offer id are ignored.
//! - The listener and the timeout timer are owned by the check and released
//!   on every exit path: response, timeout, failure, cancellation.
//! - Cancelling does not notify the maker.
//!
//! ## Maker side
//!
//! `AvailabilityResponder` judges the request against the open offer
//! (state, ignore list, capabilities, price tolerance, dispute agents),
//! answers with the verdict and acks the request.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod domain;
pub mod error;
pub mod ports;
pub mod service;
pub mod tasks;

pub use domain::{
    default_capabilities, evaluate_request, AvailabilityOutcome, AvailabilityState, OpenOffer,
    OpenOfferState, RequestContext,
};
pub use error::AvailabilityError;
pub use service::{
    AvailabilityCheck, AvailabilityConfig, AvailabilityResponder, OfferAvailabilityService,
};
