//! Taker-side handshake steps and their shared model.

use crate::domain::AvailabilityState;
use crate::error::AvailabilityError;
use crate::ports::PeerAddressResolver;
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use shared_types::ports::MessageBus;
use shared_types::{
    ExchangeMessage, MessageUid, NetworkEnvelope, NodeAddress, Offer, OfferAvailabilityRequest,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Working state of one availability check.
pub struct AvailabilityModel {
    pub offer: Offer,
    pub takers_trade_price: u64,
    pub taker_pub_key: String,
    pub capabilities: Vec<String>,
    pub peer: Option<NodeAddress>,
    pub request_uid: Option<MessageUid>,
    bus: Arc<dyn MessageBus>,
    resolver: Arc<dyn PeerAddressResolver>,
    state: watch::Sender<AvailabilityState>,
}

impl AvailabilityModel {
    pub(crate) fn new(
        offer: Offer,
        takers_trade_price: u64,
        taker_pub_key: String,
        capabilities: Vec<String>,
        bus: Arc<dyn MessageBus>,
        resolver: Arc<dyn PeerAddressResolver>,
        state: watch::Sender<AvailabilityState>,
    ) -> Self {
        Self {
            offer,
            takers_trade_price,
            taker_pub_key,
            capabilities,
            peer: None,
            request_uid: None,
            bus,
            resolver,
            state,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> AvailabilityState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: AvailabilityState) {
        // Terminal states are final.
        self.state.send_if_modified(|current| {
            if current.is_finished() || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Resolve the maker's address.
pub struct GetPeerAddress;

#[async_trait]
impl Task<AvailabilityModel, AvailabilityError> for GetPeerAddress {
    fn name(&self) -> &'static str {
        "GetPeerAddress"
    }

    async fn run(
        &self,
        step: &mut Step<'_, AvailabilityModel, AvailabilityError>,
    ) -> Result<(), AvailabilityError> {
        let model = step.model();
        model.set_state(AvailabilityState::AwaitingPeerAddress);

        let peer = model
            .resolver
            .resolve(&model.offer)
            .await
            .ok_or(AvailabilityError::PeerAddressUnknown {
                offer_id: model.offer.id,
            })?;
        debug!(offer_id = %model.offer.id, peer = %peer, "Resolved maker address");
        model.peer = Some(peer);
        Ok(())
    }
}

/// Send the availability request to the maker.
pub struct SendOfferAvailabilityRequest;

#[async_trait]
impl Task<AvailabilityModel, AvailabilityError> for SendOfferAvailabilityRequest {
    fn name(&self) -> &'static str {
        "SendOfferAvailabilityRequest"
    }

    async fn run(
        &self,
        step: &mut Step<'_, AvailabilityModel, AvailabilityError>,
    ) -> Result<(), AvailabilityError> {
        let model = step.model();
        let peer = model
            .peer
            .clone()
            .ok_or(AvailabilityError::PeerAddressUnknown {
                offer_id: model.offer.id,
            })?;

        let envelope = NetworkEnvelope::new(
            model.bus.my_address(),
            ExchangeMessage::OfferAvailabilityRequest(OfferAvailabilityRequest {
                offer_id: model.offer.id,
                takers_trade_price: model.takers_trade_price,
                taker_pub_key: model.taker_pub_key.clone(),
                supported_capabilities: model.capabilities.clone(),
            }),
        );
        model.request_uid = Some(envelope.uid);

        // The response may overtake the send confirmation.
        model.set_state(AvailabilityState::AwaitingResponse);
        let outcome = model.bus.send(&peer, envelope).await?;
        debug!(offer_id = %model.offer.id, outcome = ?outcome, "Availability request sent");
        Ok(())
    }
}
