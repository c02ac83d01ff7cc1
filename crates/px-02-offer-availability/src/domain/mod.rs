//! Domain types for the availability handshake
//!
//! The maker-side decision is a pure function of the open offer, the
//! request and what the maker knows about the taker; it lives here so it
//! can be tested without a network.

use shared_types::{
    AvailabilityResult, NodeAddress, Offer, OfferAvailabilityRequest, PriceCheckError,
    ProtocolKind,
};

/// Capability a taker must announce to take BSQ swap offers.
pub const CAPABILITY_BSQ_SWAP_OFFER: &str = "BSQ_SWAP_OFFER";
/// Capability a taker must announce to take escrow offers.
pub const CAPABILITY_REFUND_AGENT: &str = "REFUND_AGENT";

/// Capabilities this node announces by default.
#[must_use]
pub fn default_capabilities() -> Vec<String> {
    vec![
        CAPABILITY_BSQ_SWAP_OFFER.to_string(),
        CAPABILITY_REFUND_AGENT.to_string(),
    ]
}

/// Taker-side handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityState {
    /// Not started.
    Idle,
    /// Resolving the maker's address.
    AwaitingPeerAddress,
    /// Request sent, waiting for the maker.
    AwaitingResponse,
    /// Terminal.
    Finished(AvailabilityResult),
}

impl AvailabilityState {
    /// Whether the handshake reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Successful outcome of a check. Dispute agents are only set when the
/// maker reported the offer available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityOutcome {
    /// Maker's verdict.
    pub result: AvailabilityResult,
    /// Mediator selected by the maker.
    pub mediator: Option<NodeAddress>,
    /// Refund agent selected by the maker.
    pub refund_agent: Option<NodeAddress>,
}

/// Lifecycle of an offer published by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOfferState {
    /// Takeable.
    Available,
    /// A take is in progress.
    Reserved,
    /// Taken or cancelled.
    Closed,
    /// Temporarily withdrawn by the maker.
    Deactivated,
}

/// An offer this node published, with its local lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOffer {
    /// The published offer.
    pub offer: Offer,
    /// Local state.
    pub state: OpenOfferState,
}

impl OpenOffer {
    /// A freshly published offer.
    #[must_use]
    pub fn new(offer: Offer) -> Self {
        Self {
            offer,
            state: OpenOfferState::Available,
        }
    }

    /// Whether a taker may take it now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state == OpenOfferState::Available
    }
}

/// What the maker knows when judging a request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The requesting peer is on the ignore list.
    pub peer_ignored: bool,
    /// Current market price for the offer currency.
    pub market_price: Option<u64>,
    /// Mediator the maker would assign.
    pub mediator: Option<NodeAddress>,
    /// Refund agent the maker would assign.
    pub refund_agent: Option<NodeAddress>,
}

/// Decide the maker's answer to an availability request.
#[must_use]
pub fn evaluate_request(
    open_offer: Option<&OpenOffer>,
    request: &OfferAvailabilityRequest,
    ctx: &RequestContext,
) -> AvailabilityResult {
    let Some(open_offer) = open_offer.filter(|o| o.is_available()) else {
        return AvailabilityResult::OfferTaken;
    };
    if ctx.peer_ignored {
        return AvailabilityResult::UserIgnored;
    }

    let offer = &open_offer.offer;
    let required = match offer.protocol {
        ProtocolKind::BsqSwap => CAPABILITY_BSQ_SWAP_OFFER,
        ProtocolKind::Escrow => CAPABILITY_REFUND_AGENT,
    };
    if !request.supported_capabilities.iter().any(|c| c == required) {
        return AvailabilityResult::MissingMandatoryCapability;
    }

    match offer.check_trade_price_tolerance(request.takers_trade_price, ctx.market_price) {
        Ok(()) => {}
        Err(PriceCheckError::MarketPriceNotAvailable) => {
            return AvailabilityResult::MarketPriceNotAvailable
        }
        Err(PriceCheckError::OutOfTolerance { .. } | PriceCheckError::FixedPriceMismatch { .. }) => {
            return AvailabilityResult::PriceOutOfTolerance
        }
        Err(PriceCheckError::NotPositive) => return AvailabilityResult::UnknownFailure,
    }

    // Swaps settle in one transaction; there is no escrow to adjudicate.
    if offer.protocol == ProtocolKind::Escrow {
        if ctx.mediator.is_none() {
            return AvailabilityResult::NoMediators;
        }
        if ctx.refund_agent.is_none() {
            return AvailabilityResult::NoArbitrators;
        }
    }

    AvailabilityResult::Available
}
