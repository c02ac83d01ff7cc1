//! Error types for the availability handshake

use shared_types::{NetworkError, OfferId};
use thiserror::Error;

/// Why a check did not produce a maker verdict.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    /// The maker did not answer in time.
    #[error("A timeout occurred at offer {offer_id} after {timeout_secs} sec: peer has not responded")]
    Timeout { offer_id: OfferId, timeout_secs: u64 },

    /// The maker's address could not be resolved.
    #[error("Peer address of offer {offer_id} is unknown")]
    PeerAddressUnknown { offer_id: OfferId },

    /// The request could not be sent.
    #[error("Sending availability request failed: {0}")]
    Network(#[from] NetworkError),

    /// The check was cancelled by the caller.
    #[error("Availability check cancelled")]
    Cancelled,

    /// A step failed for another reason.
    #[error("{0}")]
    Failed(String),
}
