//! Offer Availability Service - taker check and maker responder

use crate::domain::{
    default_capabilities, evaluate_request, AvailabilityOutcome, AvailabilityState,
    RequestContext,
};
use crate::error::AvailabilityError;
use crate::ports::{DisputeAgentSelector, OpenOfferBook, PeerAddressResolver, PeerFilter};
use crate::tasks::{AvailabilityModel, GetPeerAddress, SendOfferAvailabilityRequest};
use px_01_task_runner::{BoxedTask, CancelHandle, RunnerFault, TaskRunner, Timer};
use shared_bus::{EventPublisher, ExchangeEvent};
use shared_types::ports::{ListenerId, MessageBus, MessageListener, PriceFeed};
use shared_types::{
    AvailabilityResult, ExchangeMessage, NetworkEnvelope, Offer, OfferAvailabilityRequest,
    OfferAvailabilityResponse, OfferId, ProtocolKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Availability handshake configuration.
#[derive(Clone, Debug)]
pub struct AvailabilityConfig {
    /// How long to wait for the maker's response.
    pub timeout: Duration,
    /// Capabilities announced in requests.
    pub capabilities: Vec<String>,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            capabilities: default_capabilities(),
        }
    }
}

/// Forwards responses for one offer into the check's channel.
struct ResponseListener {
    offer_id: OfferId,
    tx: mpsc::UnboundedSender<NetworkEnvelope>,
}

impl MessageListener for ResponseListener {
    fn on_message(&self, envelope: &NetworkEnvelope) {
        let ExchangeMessage::OfferAvailabilityResponse(response) = &envelope.message else {
            return;
        };
        if response.offer_id != self.offer_id {
            warn!(
                awaited = %self.offer_id,
                received = %response.offer_id,
                uid = %envelope.uid,
                "Ignoring availability response for another offer"
            );
            return;
        }
        let _ = self.tx.send(envelope.clone());
    }
}

/// Removes the listener when the check ends, whichever way it ends.
struct ListenerRegistration {
    bus: Arc<dyn MessageBus>,
    id: ListenerId,
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.bus.remove_listener(self.id);
    }
}

/// Handle of a running check.
pub struct AvailabilityCheck {
    offer_id: OfferId,
    state: watch::Receiver<AvailabilityState>,
    cancel: CancelHandle,
    wake: Arc<Notify>,
    handle: JoinHandle<Result<AvailabilityOutcome, AvailabilityError>>,
}

impl AvailabilityCheck {
    /// Offer being checked.
    pub fn offer_id(&self) -> OfferId {
        self.offer_id
    }

    /// Current handshake state.
    pub fn state(&self) -> AvailabilityState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<AvailabilityState> {
        self.state.clone()
    }

    /// Stop the check. The maker is not notified; an in-flight send is not
    /// aborted, but its result is ignored.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
    }

    /// Wait for the check to end.
    pub async fn outcome(self) -> Result<AvailabilityOutcome, AvailabilityError> {
        self.handle
            .await
            .map_err(|e| AvailabilityError::Failed(format!("availability check aborted: {e}")))?
    }
}

/// Taker side of the handshake.
pub struct OfferAvailabilityService {
    bus: Arc<dyn MessageBus>,
    resolver: Arc<dyn PeerAddressResolver>,
    events: Arc<dyn EventPublisher>,
    taker_pub_key: String,
    config: AvailabilityConfig,
}

impl OfferAvailabilityService {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        resolver: Arc<dyn PeerAddressResolver>,
        events: Arc<dyn EventPublisher>,
        taker_pub_key: String,
        config: AvailabilityConfig,
    ) -> Self {
        Self {
            bus,
            resolver,
            events,
            taker_pub_key,
            config,
        }
    }

    /// Ask the maker whether `offer` can be taken at `takers_trade_price`.
    pub async fn check(
        &self,
        offer: Offer,
        takers_trade_price: u64,
    ) -> Result<AvailabilityOutcome, AvailabilityError> {
        self.start(offer, takers_trade_price).outcome().await
    }

    /// Start a check in the background.
    pub fn start(&self, offer: Offer, takers_trade_price: u64) -> AvailabilityCheck {
        let offer_id = offer.id;
        let (state_tx, state_rx) = watch::channel(AvailabilityState::Idle);
        let cancel = CancelHandle::new();
        let wake = Arc::new(Notify::new());

        let model = AvailabilityModel::new(
            offer,
            takers_trade_price,
            self.taker_pub_key.clone(),
            self.config.capabilities.clone(),
            self.bus.clone(),
            self.resolver.clone(),
            state_tx,
        );
        let run = CheckRun {
            bus: self.bus.clone(),
            events: self.events.clone(),
            timeout: self.config.timeout,
            cancel: cancel.clone(),
            wake: wake.clone(),
        };
        let handle = tokio::spawn(run.execute(model));

        AvailabilityCheck {
            offer_id,
            state: state_rx,
            cancel,
            wake,
            handle,
        }
    }
}

enum Wake {
    Response(NetworkEnvelope),
    Timeout,
    Cancelled,
}

struct CheckRun {
    bus: Arc<dyn MessageBus>,
    events: Arc<dyn EventPublisher>,
    timeout: Duration,
    cancel: CancelHandle,
    wake: Arc<Notify>,
}

impl CheckRun {
    async fn execute(
        self,
        mut model: AvailabilityModel,
    ) -> Result<AvailabilityOutcome, AvailabilityError> {
        let offer_id = model.offer.id;

        // Listen before sending; the response can arrive before the send returns.
        let (tx, mut responses) = mpsc::unbounded_channel();
        let _registration = ListenerRegistration {
            bus: self.bus.clone(),
            id: self
                .bus
                .add_listener(Arc::new(ResponseListener { offer_id, tx })),
        };

        let tasks: Vec<BoxedTask<AvailabilityModel, AvailabilityError>> =
            vec![Box::new(GetPeerAddress), Box::new(SendOfferAvailabilityRequest)];
        let runner = TaskRunner::new(format!("availability-{offer_id}"), tasks)
            .with_cancel(self.cancel.clone());

        match runner.run(&mut model).await {
            Ok(report) if report.is_completed() => {}
            Ok(_) => {
                debug!(offer_id = %offer_id, "Availability check cancelled before the request was sent");
                return Err(AvailabilityError::Cancelled);
            }
            Err(fault) => {
                let error = match fault {
                    RunnerFault::Task { error, .. } => error,
                    other => AvailabilityError::Failed(other.to_string()),
                };
                if self.cancel.is_cancelled() {
                    return Err(AvailabilityError::Cancelled);
                }
                warn!(offer_id = %offer_id, error = %error, "Availability check failed");
                model.set_state(AvailabilityState::Finished(AvailabilityResult::UnknownFailure));
                return Err(error);
            }
        }

        let maker = model
            .peer
            .clone()
            .ok_or_else(|| AvailabilityError::Failed("maker address not resolved".to_string()))?;
        let from_maker = async {
            while let Some(envelope) = responses.recv().await {
                if envelope.sender == maker {
                    return Some(envelope);
                }
                warn!(
                    offer_id = %offer_id,
                    maker = %maker,
                    sender = %envelope.sender,
                    "Ignoring availability response from a node that does not own the offer"
                );
            }
            None
        };

        let (fired_tx, fired_rx) = oneshot::channel();
        let timer = Timer::run_after(self.timeout, async move {
            let _ = fired_tx.send(());
        });

        let wake = tokio::select! {
            Some(envelope) = from_maker => Wake::Response(envelope),
            _ = fired_rx => Wake::Timeout,
            _ = self.wake.notified() => Wake::Cancelled,
        };
        timer.stop();

        match wake {
            Wake::Response(envelope) => {
                let ExchangeMessage::OfferAvailabilityResponse(response) = &envelope.message else {
                    return Err(AvailabilityError::Failed("unexpected message".to_string()));
                };
                self.ack(&envelope);
                Ok(self.finish(&model, response).await)
            }
            Wake::Timeout => {
                warn!(offer_id = %offer_id, "Availability check timed out: peer has not responded");
                model.set_state(AvailabilityState::Finished(AvailabilityResult::Timeout));
                self.events
                    .publish(ExchangeEvent::OfferAvailabilityChecked {
                        offer_id,
                        result: AvailabilityResult::Timeout,
                    })
                    .await;
                Err(AvailabilityError::Timeout {
                    offer_id,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Wake::Cancelled => {
                debug!(offer_id = %offer_id, "Availability check cancelled");
                Err(AvailabilityError::Cancelled)
            }
        }
    }

    async fn finish(
        &self,
        model: &AvailabilityModel,
        response: &OfferAvailabilityResponse,
    ) -> AvailabilityOutcome {
        info!(
            offer_id = %response.offer_id,
            result = ?response.result,
            "Offer availability checked"
        );
        model.set_state(AvailabilityState::Finished(response.result));
        self.events
            .publish(ExchangeEvent::OfferAvailabilityChecked {
                offer_id: response.offer_id,
                result: response.result,
            })
            .await;

        let available = response.result.is_available();
        AvailabilityOutcome {
            result: response.result,
            mediator: response.mediator.clone().filter(|_| available),
            refund_agent: response.refund_agent.clone().filter(|_| available),
        }
    }

    fn ack(&self, envelope: &NetworkEnvelope) {
        let bus = self.bus.clone();
        let ack = envelope.ack(bus.my_address(), true, None);
        let peer = envelope.sender.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.send(&peer, ack).await {
                debug!(peer = %peer, error = %e, "Ack for availability response not delivered");
            }
        });
    }
}

/// Maker side of the handshake.
pub struct AvailabilityResponder {
    bus: Arc<dyn MessageBus>,
    offers: Arc<dyn OpenOfferBook>,
    agents: Arc<dyn DisputeAgentSelector>,
    peers: Arc<dyn PeerFilter>,
    prices: Arc<dyn PriceFeed>,
}

impl AvailabilityResponder {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        offers: Arc<dyn OpenOfferBook>,
        agents: Arc<dyn DisputeAgentSelector>,
        peers: Arc<dyn PeerFilter>,
        prices: Arc<dyn PriceFeed>,
    ) -> Self {
        Self {
            bus,
            offers,
            agents,
            peers,
            prices,
        }
    }

    /// Answer a taker's request. The request is always acked.
    pub async fn handle_request(
        &self,
        envelope: &NetworkEnvelope,
        request: &OfferAvailabilityRequest,
    ) -> AvailabilityResult {
        let open_offer = self.offers.open_offer(&request.offer_id);
        let ctx = RequestContext {
            peer_ignored: self.peers.is_ignored(&envelope.sender),
            market_price: open_offer
                .as_ref()
                .and_then(|o| self.prices.market_price(&o.offer.currency_code)),
            mediator: self.agents.select_mediator(),
            refund_agent: self.agents.select_refund_agent(),
        };
        let result = evaluate_request(open_offer.as_ref(), request, &ctx);
        info!(
            offer_id = %request.offer_id,
            taker = %envelope.sender,
            result = ?result,
            "Answering availability request"
        );

        let with_agents = result.is_available()
            && open_offer
                .as_ref()
                .is_some_and(|o| o.offer.protocol == ProtocolKind::Escrow);
        let response = NetworkEnvelope::new(
            self.bus.my_address(),
            ExchangeMessage::OfferAvailabilityResponse(OfferAvailabilityResponse {
                offer_id: request.offer_id,
                result,
                mediator: ctx.mediator.filter(|_| with_agents),
                refund_agent: ctx.refund_agent.filter(|_| with_agents),
            }),
        );
        if let Err(e) = self.bus.send(&envelope.sender, response).await {
            warn!(offer_id = %request.offer_id, error = %e, "Sending availability response failed");
        }

        let ack = envelope.ack(self.bus.my_address(), true, None);
        if let Err(e) = self.bus.send(&envelope.sender, ack).await {
            debug!(offer_id = %request.offer_id, error = %e, "Ack for availability request not delivered");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OpenOffer;
    use crate::ports::{IgnoreList, MockOfferBook, OfferOwnerResolver, StaticAgents};
    use shared_bus::RecordingPublisher;
    use shared_types::fixtures::offer;
    use shared_types::ports::{MockMessageBus, StaticPriceFeed};
    use shared_types::{NodeAddress, OfferDirection};

    struct Harness {
        bus: Arc<MockMessageBus>,
        events: Arc<RecordingPublisher>,
        service: OfferAvailabilityService,
    }

    fn harness() -> Harness {
        let bus = Arc::new(MockMessageBus::new(NodeAddress::new("taker", 1)));
        let events = Arc::new(RecordingPublisher::new());
        let service = OfferAvailabilityService::new(
            bus.clone(),
            Arc::new(OfferOwnerResolver),
            events.clone(),
            "taker-key".into(),
            AvailabilityConfig::default(),
        );
        Harness {
            bus,
            events,
            service,
        }
    }

    fn response(offer_id: OfferId, result: AvailabilityResult) -> NetworkEnvelope {
        NetworkEnvelope::new(
            NodeAddress::new("maker.onion", 9999),
            ExchangeMessage::OfferAvailabilityResponse(OfferAvailabilityResponse {
                offer_id,
                result,
                mediator: Some(NodeAddress::new("mediator", 1)),
                refund_agent: Some(NodeAddress::new("refund", 2)),
            }),
        )
    }

    async fn wait_for_request(check: &AvailabilityCheck) {
        let mut state = check.subscribe();
        state
            .wait_for(|s| *s == AvailabilityState::AwaitingResponse)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_response_completes_check() {
        let h = harness();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let check = h.service.start(offer.clone(), 2_000_000);
        wait_for_request(&check).await;

        h.bus
            .deliver(&response(offer.id, AvailabilityResult::Available));
        let outcome = check.outcome().await.unwrap();

        assert_eq!(outcome.result, AvailabilityResult::Available);
        assert_eq!(outcome.mediator, Some(NodeAddress::new("mediator", 1)));
        assert_eq!(h.bus.listener_count(), 0);
        assert!(h.events.any(|e| matches!(
            e,
            ExchangeEvent::OfferAvailabilityChecked {
                result: AvailabilityResult::Available,
                ..
            }
        )));

        // The ack goes out in the background.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = h.bus.sent_envelopes();
        assert!(matches!(
            sent[0].message,
            ExchangeMessage::OfferAvailabilityRequest(_)
        ));
        assert!(sent
            .iter()
            .any(|e| matches!(e.message, ExchangeMessage::Ack(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_taken_offer_drops_agents() {
        let h = harness();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let check = h.service.start(offer.clone(), 2_000_000);
        wait_for_request(&check).await;

        h.bus
            .deliver(&response(offer.id, AvailabilityResult::OfferTaken));
        let outcome = check.outcome().await.unwrap();
        assert_eq!(outcome.result, AvailabilityResult::OfferTaken);
        assert_eq!(outcome.mediator, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_response_ignored_then_timeout() {
        let h = harness();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let check = h.service.start(offer.clone(), 2_000_000);
        wait_for_request(&check).await;

        h.bus
            .deliver(&response(OfferId::new(), AvailabilityResult::Available));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(check.state(), AvailabilityState::AwaitingResponse);

        let state = check.subscribe();
        let err = check.outcome().await.unwrap_err();
        assert!(matches!(err, AvailabilityError::Timeout { timeout_secs: 10, .. }));
        assert!(err.to_string().contains("peer has not responded"));
        assert_eq!(
            *state.borrow(),
            AvailabilityState::Finished(AvailabilityResult::Timeout)
        );
        assert_eq!(h.bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_from_other_node_ignored() {
        let h = harness();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let check = h.service.start(offer.clone(), 2_000_000);
        wait_for_request(&check).await;

        let mut impostor = response(offer.id, AvailabilityResult::Available);
        impostor.sender = NodeAddress::new("impostor.onion", 9999);
        h.bus.deliver(&impostor);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(check.state(), AvailabilityState::AwaitingResponse);

        h.bus
            .deliver(&response(offer.id, AvailabilityResult::OfferTaken));
        let outcome = check.outcome().await.unwrap();
        assert_eq!(outcome.result, AvailabilityResult::OfferTaken);
        assert!(!h
            .bus
            .sent_envelopes()
            .iter()
            .any(|e| matches!(&e.message, ExchangeMessage::Ack(ack) if ack.source_uid == impostor.uid)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_ignored() {
        let h = harness();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let check = h.service.start(offer.clone(), 2_000_000);
        let state = check.subscribe();

        assert!(check.outcome().await.is_err());
        h.bus
            .deliver(&response(offer.id, AvailabilityResult::Available));
        assert_eq!(
            *state.borrow(),
            AvailabilityState::Finished(AvailabilityResult::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_removes_listener_without_notifying_peer() {
        let h = harness();
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let check = h.service.start(offer, 2_000_000);
        wait_for_request(&check).await;

        check.cancel();
        assert_eq!(check.outcome().await, Err(AvailabilityError::Cancelled));
        assert_eq!(h.bus.listener_count(), 0);
        // Only the request was ever sent.
        assert_eq!(h.bus.sent_envelopes().len(), 1);
        assert!(!h
            .events
            .any(|e| matches!(e, ExchangeEvent::OfferAvailabilityChecked { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_fails_check() {
        let h = harness();
        h.bus.fail_next(1);
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        let check = h.service.start(offer, 2_000_000);
        let state = check.subscribe();

        let err = check.outcome().await.unwrap_err();
        assert!(matches!(err, AvailabilityError::Network(_)));
        assert_eq!(
            *state.borrow(),
            AvailabilityState::Finished(AvailabilityResult::UnknownFailure)
        );
        assert_eq!(h.bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_responder_answers_and_acks() {
        let bus = Arc::new(MockMessageBus::new(NodeAddress::new("maker.onion", 9999)));
        let book = Arc::new(MockOfferBook::default());
        let open = OpenOffer::new(offer(OfferDirection::Sell, ProtocolKind::Escrow));
        let offer_id = open.offer.id;
        book.add(open);
        let responder = AvailabilityResponder::new(
            bus.clone(),
            book,
            Arc::new(StaticAgents {
                mediator: Some(NodeAddress::new("mediator", 1)),
                refund_agent: Some(NodeAddress::new("refund", 2)),
            }),
            Arc::new(IgnoreList::default()),
            Arc::new(StaticPriceFeed::default()),
        );

        let request = OfferAvailabilityRequest {
            offer_id,
            takers_trade_price: 2_000_000,
            taker_pub_key: "taker-key".into(),
            supported_capabilities: default_capabilities(),
        };
        let envelope = NetworkEnvelope::new(
            NodeAddress::new("taker", 1),
            ExchangeMessage::OfferAvailabilityRequest(request.clone()),
        );

        let result = responder.handle_request(&envelope, &request).await;
        assert_eq!(result, AvailabilityResult::Available);

        let sent = bus.sent_envelopes();
        assert_eq!(sent.len(), 2);
        match &sent[0].message {
            ExchangeMessage::OfferAvailabilityResponse(r) => {
                assert_eq!(r.result, AvailabilityResult::Available);
                assert_eq!(r.refund_agent, Some(NodeAddress::new("refund", 2)));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &sent[1].message {
            ExchangeMessage::Ack(ack) => {
                assert_eq!(ack.source_uid, envelope.uid);
                assert!(ack.success);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_responder_reports_ignored_taker() {
        let bus = Arc::new(MockMessageBus::new(NodeAddress::new("maker.onion", 9999)));
        let book = Arc::new(MockOfferBook::default());
        let open = OpenOffer::new(offer(OfferDirection::Sell, ProtocolKind::Escrow));
        let offer_id = open.offer.id;
        book.add(open);
        let ignore = Arc::new(IgnoreList::default());
        ignore.ignore(NodeAddress::new("taker", 1));
        let responder = AvailabilityResponder::new(
            bus.clone(),
            book,
            Arc::new(StaticAgents::default()),
            ignore,
            Arc::new(StaticPriceFeed::default()),
        );

        let request = OfferAvailabilityRequest {
            offer_id,
            takers_trade_price: 2_000_000,
            taker_pub_key: "taker-key".into(),
            supported_capabilities: default_capabilities(),
        };
        let envelope = NetworkEnvelope::new(
            NodeAddress::new("taker", 1),
            ExchangeMessage::OfferAvailabilityRequest(request.clone()),
        );
        assert_eq!(
            responder.handle_request(&envelope, &request).await,
            AvailabilityResult::UserIgnored
        );
    }
}
