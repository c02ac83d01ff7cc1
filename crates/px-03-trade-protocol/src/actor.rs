//! # Protocol Actor
//!
//! One actor per trade serializes everything that touches the trade:
//! inbound messages, user actions, timeout expiry, ledger polls and
//! dispute updates all arrive as `TradeCommand`s on one queue.
//!
//! After every command the actor publishes the state transitions it made,
//! refreshes the watch snapshot and requests persistence if the trade
//! changed.

use crate::domain::ProcessModel;
use crate::flow::{Plan, ProtocolFlow, TimeoutDirective, TradeAction};
use px_01_task_runner::{RunnerFault, TaskRunner, Timer};
use shared_bus::ExchangeEvent;
use shared_types::{
    DisputePayout, DisputeState, NetworkEnvelope, NetworkError, ProtocolError, Trade, TradeId,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Commands processed by a trade's actor, in arrival order.
#[derive(Debug)]
pub enum TradeCommand {
    /// Inbound message from the trading peer.
    Message(NetworkEnvelope),
    Action {
        action: TradeAction,
        reply: oneshot::Sender<Result<(), ProtocolError>>,
    },
    SetDisputeState {
        state: DisputeState,
        reply: oneshot::Sender<Result<(), ProtocolError>>,
    },
    /// Record a dispute payout; replies whether it was newly applied.
    ApplyDisputePayout {
        payout: DisputePayout,
        reply: oneshot::Sender<bool>,
    },
    /// Protocol timeout of the given arming.
    Timeout { generation: u64 },
    Shutdown,
}

/// Cloneable handle to a running trade protocol.
#[derive(Clone, Debug)]
pub struct TradeHandle {
    trade_id: TradeId,
    commands: mpsc::Sender<TradeCommand>,
    snapshot: watch::Receiver<Trade>,
}

fn stopped() -> ProtocolError {
    ProtocolError::Network(NetworkError::Stopped)
}

impl TradeHandle {
    pub fn trade_id(&self) -> TradeId {
        self.trade_id
    }

    /// Latest snapshot of the trade.
    pub fn trade(&self) -> Trade {
        self.snapshot.borrow().clone()
    }

    /// Watch the trade's snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Trade> {
        self.snapshot.clone()
    }

    /// Wait until the trade satisfies `pred`.
    pub async fn wait_for(&self, pred: impl FnMut(&Trade) -> bool) -> Trade {
        let mut snapshot = self.snapshot.clone();
        let trade = match snapshot.wait_for(pred).await {
            Ok(trade) => trade.clone(),
            Err(_) => self.trade(),
        };
        trade
    }

    /// Queue an inbound message.
    pub async fn deliver(&self, envelope: NetworkEnvelope) -> Result<(), ProtocolError> {
        self.commands
            .send(TradeCommand::Message(envelope))
            .await
            .map_err(|_| stopped())
    }

    /// Run a user action and wait for its task sequence.
    pub async fn act(&self, action: TradeAction) -> Result<(), ProtocolError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(TradeCommand::Action { action, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn set_dispute_state(&self, state: DisputeState) -> Result<(), ProtocolError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(TradeCommand::SetDisputeState { state, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Record a dispute payout. `Ok(false)` if one was already recorded.
    pub async fn apply_dispute_payout(&self, payout: DisputePayout) -> Result<bool, ProtocolError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(TradeCommand::ApplyDisputePayout { payout, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the actor. Queued commands before this one are still processed.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(TradeCommand::Shutdown).await;
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Start the protocol actor for `model`.
pub fn spawn_protocol(model: ProcessModel, flow: Arc<dyn ProtocolFlow>) -> TradeHandle {
    let capacity = model.services.config.command_capacity.max(1);
    let (commands, receiver) = mpsc::channel(capacity);
    let (snapshot_tx, snapshot) = watch::channel(model.trade.clone());
    let trade_id = model.trade.id;

    let actor = ProtocolActor {
        completed_reported: model.trade.is_completed(),
        model,
        flow,
        commands: receiver,
        self_sender: commands.downgrade(),
        snapshot: snapshot_tx,
        timeout: None,
        generation: 0,
    };
    tokio::spawn(actor.run());

    TradeHandle {
        trade_id,
        commands,
        snapshot,
    }
}

struct ProtocolActor {
    model: ProcessModel,
    flow: Arc<dyn ProtocolFlow>,
    commands: mpsc::Receiver<TradeCommand>,
    self_sender: mpsc::WeakSender<TradeCommand>,
    snapshot: watch::Sender<Trade>,
    timeout: Option<Timer>,
    generation: u64,
    completed_reported: bool,
}

impl ProtocolActor {
    async fn run(mut self) {
        let mut ledger_poll = tokio::time::interval(self.model.services.config.ledger_poll_interval);
        ledger_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            trade_id = %self.model.trade.id,
            protocol = ?self.flow.protocol(),
            role = ?self.model.trade.role,
            "Trade protocol started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(TradeCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = ledger_poll.tick() => self.on_ledger_tick().await,
            }
            self.publish_changes().await;
        }

        self.stop_timeout();
        debug!(trade_id = %self.model.trade.id, "Trade protocol stopped");
    }

    async fn handle(&mut self, command: TradeCommand) {
        match command {
            TradeCommand::Message(envelope) => self.on_message(envelope).await,
            TradeCommand::Action { action, reply } => {
                let result = self.on_action(action).await;
                let _ = reply.send(result);
            }
            TradeCommand::SetDisputeState { state, reply } => {
                let result = self.model.trade.set_dispute_state(state);
                if result.is_ok() {
                    if state.is_open() {
                        self.stop_timeout();
                    }
                    self.model
                        .services
                        .events
                        .publish(ExchangeEvent::DisputeStateChanged {
                            trade_id: self.model.trade.id,
                            state,
                        })
                        .await;
                }
                let _ = reply.send(result);
            }
            TradeCommand::ApplyDisputePayout { payout, reply } => {
                let applied = self.model.trade.record_dispute_payout(payout);
                let _ = reply.send(applied);
            }
            TradeCommand::Timeout { generation } => self.on_timeout(generation).await,
            TradeCommand::Shutdown => {}
        }
    }

    async fn on_message(&mut self, envelope: NetworkEnvelope) {
        let trade_id = self.model.trade.id;
        if envelope.sender != self.model.trade.peer {
            warn!(
                trade_id = %trade_id,
                sender = %envelope.sender,
                message = envelope.name(),
                "Ignoring message from a node that is not the trading peer"
            );
            return;
        }

        let plan = match self.flow.on_message(&self.model.trade, &envelope.message) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(trade_id = %trade_id, message = envelope.name(), error = %e, "Message rejected");
                self.send_ack(&envelope, false, Some(e.to_string()));
                return;
            }
        };

        debug!(trade_id = %trade_id, message = envelope.name(), uid = %envelope.uid, "Handling message");
        self.model.trigger = Some(envelope.clone());
        let result = self.execute(plan).await;
        self.model.trigger = None;

        match result {
            Ok(()) => self.send_ack(&envelope, true, None),
            Err(e) => self.send_ack(&envelope, false, Some(e.to_string())),
        }
    }

    async fn on_action(&mut self, action: TradeAction) -> Result<(), ProtocolError> {
        let plan = self.flow.on_action(&self.model.trade, action)?;
        debug!(trade_id = %self.model.trade.id, action = action.name(), "Handling action");
        self.execute(plan).await
    }

    async fn on_ledger_tick(&mut self) {
        let Some(plan) = self.flow.on_ledger_tick(&self.model.trade) else {
            return;
        };
        let runner = TaskRunner::new(format!("{}-{}", plan.label, self.model.trade.id.short()), plan.tasks);
        if let Err(fault) = runner.run(&mut self.model).await {
            // The next poll retries.
            warn!(trade_id = %self.model.trade.id, error = %fault, "Ledger poll failed");
        }
    }

    async fn execute(&mut self, plan: Plan) -> Result<(), ProtocolError> {
        let Plan {
            label,
            tasks,
            timeout,
        } = plan;
        let runner = TaskRunner::new(format!("{label}-{}", self.model.trade.id.short()), tasks);

        match runner.run(&mut self.model).await {
            Ok(report) => {
                debug!(
                    trade_id = %self.model.trade.id,
                    trigger = label,
                    tasks = report.executed.len(),
                    "Task sequence completed"
                );
                match timeout {
                    TimeoutDirective::Start => self.start_timeout(),
                    TimeoutDirective::Stop => self.stop_timeout(),
                    TimeoutDirective::Keep => {}
                }
                Ok(())
            }
            Err(fault) => Err(self.on_fault(label, fault).await),
        }
    }

    async fn on_fault(
        &mut self,
        label: &'static str,
        fault: RunnerFault<ProtocolError>,
    ) -> ProtocolError {
        let message = fault.to_string();
        let error = fault
            .into_task_error()
            .unwrap_or_else(|| ProtocolError::Violation(message.clone()));
        let trade_id = self.model.trade.id;
        error!(trade_id = %trade_id, trigger = label, kind = ?error.kind(), error = %message, "Trade protocol failed");

        self.model.trade.error_message = Some(message.clone());
        self.stop_timeout();

        let events = self.model.services.events.clone();
        events
            .publish(ExchangeEvent::TradeFailed {
                trade_id,
                kind: error.kind(),
                error: message.clone(),
            })
            .await;
        if error.requires_escalation() {
            warn!(trade_id = %trade_id, "Protocol violation, dispute escalation required");
            events
                .publish(ExchangeEvent::DisputeEscalationRequired {
                    trade_id,
                    reason: message,
                })
                .await;
        }
        self.model.services.persistence.request_persistence();
        error
    }

    fn start_timeout(&mut self) {
        self.stop_timeout();
        self.generation += 1;
        let generation = self.generation;
        let sender = self.self_sender.clone();
        self.timeout = Some(Timer::run_after(
            self.model.services.config.timeout,
            async move {
                if let Some(sender) = sender.upgrade() {
                    let _ = sender.send(TradeCommand::Timeout { generation }).await;
                }
            },
        ));
    }

    fn stop_timeout(&mut self) {
        if let Some(timer) = self.timeout.take() {
            timer.stop();
        }
    }

    async fn on_timeout(&mut self, generation: u64) {
        // A timer stopped after firing may still deliver its command.
        if generation != self.generation || self.timeout.is_none() || self.model.trade.is_completed() {
            debug!(trade_id = %self.model.trade.id, generation, "Ignoring stale timeout");
            return;
        }
        self.timeout = None;

        let error = ProtocolError::Timeout(self.model.services.config.timeout.as_secs());
        let trade_id = self.model.trade.id;
        error!(trade_id = %trade_id, state = ?self.model.trade.state, "{error}");
        self.model.trade.error_message = Some(error.to_string());
        self.model
            .services
            .events
            .publish(ExchangeEvent::TradeFailed {
                trade_id,
                kind: error.kind(),
                error: error.to_string(),
            })
            .await;
        self.model.services.persistence.request_persistence();
    }

    fn send_ack(&self, envelope: &NetworkEnvelope, success: bool, error_message: Option<String>) {
        let bus = self.model.services.bus.clone();
        let ack = envelope.ack(bus.my_address(), success, error_message);
        let peer = envelope.sender.clone();
        let trade_id = self.model.trade.id;
        tokio::spawn(async move {
            if let Err(e) = bus.send(&peer, ack).await {
                debug!(trade_id = %trade_id, error = %e, "Ack not delivered");
            }
        });
    }

    async fn publish_changes(&mut self) {
        let events = self.model.services.events.clone();
        let trade_id = self.model.trade.id;

        for (from, to) in self.model.take_transitions() {
            info!(trade_id = %trade_id, from = ?from, to = ?to, "Trade state changed");
            events
                .publish(ExchangeEvent::TradeStateChanged {
                    trade_id,
                    from,
                    to,
                    phase: to.phase(),
                })
                .await;
        }

        if !self.completed_reported && self.model.trade.is_completed() {
            self.completed_reported = true;
            self.stop_timeout();
            info!(trade_id = %trade_id, "Trade completed");
            events
                .publish(ExchangeEvent::TradeCompleted { trade_id })
                .await;
        }

        let trade = &self.model.trade;
        let changed = self.snapshot.send_if_modified(|current| {
            if current == trade {
                return false;
            }
            *current = trade.clone();
            true
        });
        if changed {
            self.model.services.persistence.request_persistence();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Harness;
    use crate::escrow::EscrowFlow;
    use shared_types::fixtures::offer;
    use shared_types::{
        Asset, ErrorKind, ExchangeMessage, InputsForDepositTxRequest, NodeAddress,
        OfferDirection, OutPoint, PayoutTxPublished, ProtocolKind, SupportType, TradeRole,
        TradeState, TxInput, TxKind, COIN,
    };
    use std::time::Duration;

    const TAKER: &str = "taker";
    const MAKER: &str = "maker";

    fn trade(role: TradeRole, peer: &str) -> Trade {
        Trade::new(
            offer(OfferDirection::Sell, ProtocolKind::Escrow),
            role,
            COIN / 2,
            2_000_000,
            NodeAddress::new(peer, 9999),
        )
    }

    fn spawn(harness: &Harness, trade: Trade) -> TradeHandle {
        spawn_protocol(ProcessModel::new(trade, harness.services()), Arc::new(EscrowFlow))
    }

    fn request(trade: &Trade, input: TxInput) -> NetworkEnvelope {
        NetworkEnvelope::new(
            NodeAddress::new(TAKER, 9999),
            ExchangeMessage::InputsForDepositTxRequest(InputsForDepositTxRequest {
                trade_id: trade.id,
                trade_amount: trade.amount,
                trade_price: trade.price,
                taker_fee_tx_id: "taker-fee".to_string(),
                taker_inputs: vec![input],
                taker_change_address: "taker-change".to_string(),
                taker_payout_address: "taker-payout".to_string(),
                taker_account_id: "taker-account".to_string(),
                taker_payment_method_id: trade.offer.payment_method_id.clone(),
                taker_signing_pub_key: shared_crypto::KeyRing::from_seed([2; 32]).pub_key_hex(),
                mediator: None,
                refund_agent: None,
            }),
        )
    }

    fn taker_input() -> TxInput {
        TxInput {
            outpoint: OutPoint::new("taker-utxo", 0),
            asset: Asset::Btc,
            value: COIN / 10,
        }
    }

    async fn acks(harness: &Harness) -> Vec<(bool, Option<String>)> {
        // Acks are sent from spawned tasks.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        harness
            .bus
            .sent_envelopes()
            .into_iter()
            .filter_map(|env| match env.message {
                ExchangeMessage::Ack(ack) => Some((ack.success, ack.error_message)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_offer_then_timeout() {
        let harness = Harness::new(TAKER, 2);
        let handle = spawn(&harness, trade(TradeRole::BuyerAsTaker, MAKER));

        handle.act(TradeAction::TakeOffer).await.unwrap();
        let trade = handle
            .wait_for(|t| t.state == TradeState::TakerPublishedTakerFeeTx)
            .await;
        assert!(trade.taker_fee_tx_id.is_some());
        let sent = harness.bus.sent_envelopes();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].message, ExchangeMessage::InputsForDepositTxRequest(_)));

        let trade = handle.wait_for(|t| t.error_message.is_some()).await;
        assert_eq!(
            trade.error_message.as_deref(),
            Some("Timeout reached. Protocol did not complete in 60 sec.")
        );
        assert!(harness.events.any(|e| matches!(
            e,
            ExchangeEvent::TradeFailed {
                kind: ErrorKind::TransientNetwork,
                ..
            }
        )));
        assert!(harness.events.any(|e| matches!(
            e,
            ExchangeEvent::TradeStateChanged {
                to: TradeState::TakerPublishedTakerFeeTx,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_in_wrong_phase_is_rejected_without_failing_trade() {
        let harness = Harness::new(TAKER, 2);
        let handle = spawn(&harness, trade(TradeRole::BuyerAsTaker, MAKER));

        let err = handle
            .act(TradeAction::ConfirmPaymentStarted)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedTrigger { .. }));
        assert!(handle.trade().error_message.is_none());
        assert!(harness.bus.sent_envelopes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_in_wrong_phase_is_nacked() {
        let harness = Harness::new(TAKER, 2);
        let handle = spawn(&harness, trade(TradeRole::BuyerAsTaker, MAKER));
        let trade = handle.trade();

        let envelope = NetworkEnvelope::new(
            NodeAddress::new(MAKER, 9999),
            ExchangeMessage::PayoutTxPublished(PayoutTxPublished {
                trade_id: trade.id,
                payout_tx_id: "payout".to_string(),
            }),
        );
        handle.deliver(envelope).await.unwrap();

        let acks = acks(&harness).await;
        assert_eq!(acks.len(), 1);
        assert!(!acks[0].0);
        assert_eq!(handle.trade().state, TradeState::Preparation);
        assert!(handle.trade().error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_from_stranger_ignored() {
        let harness = Harness::new(MAKER, 1);
        let handle = spawn(&harness, trade(TradeRole::SellerAsMaker, TAKER));
        let mut envelope = request(&handle.trade(), taker_input());
        envelope.sender = NodeAddress::new("mallory", 9999);

        handle.deliver(envelope).await.unwrap();
        assert!(acks(&harness).await.is_empty());
        assert_eq!(handle.trade().state, TradeState::Preparation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_fee_tx_fails_trade_without_escalation() {
        let harness = Harness::new(MAKER, 1);
        let handle = spawn(&harness, trade(TradeRole::SellerAsMaker, TAKER));
        harness.ledger.insert_input(&taker_input());

        handle
            .deliver(request(&handle.trade(), taker_input()))
            .await
            .unwrap();
        let trade = handle.wait_for(|t| t.error_message.is_some()).await;

        assert_eq!(
            trade.error_message.as_deref(),
            Some("An error occurred at task VerifyTakerFeeTx: Transaction taker-fee not found")
        );
        let acks = acks(&harness).await;
        assert_eq!(acks.len(), 1);
        assert!(!acks[0].0);
        assert!(harness.events.any(|e| matches!(
            e,
            ExchangeEvent::TradeFailed {
                kind: ErrorKind::ProtocolDesync,
                ..
            }
        )));
        assert!(!harness
            .events
            .any(|e| matches!(e, ExchangeEvent::DisputeEscalationRequired { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inflated_inputs_escalate() {
        let harness = Harness::new(MAKER, 1);
        let handle = spawn(&harness, trade(TradeRole::SellerAsMaker, TAKER));
        harness.ledger.insert_tx("taker-fee", TxKind::TradeFee, 0);
        harness.ledger.insert_input(&taker_input());
        let mut inflated = taker_input();
        inflated.value = COIN;

        handle
            .deliver(request(&handle.trade(), inflated))
            .await
            .unwrap();
        handle.wait_for(|t| t.error_message.is_some()).await;

        assert!(harness
            .events
            .any(|e| matches!(e, ExchangeEvent::DisputeEscalationRequired { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_request_answered_and_timeout_armed() {
        let harness = Harness::new(MAKER, 1);
        let handle = spawn(&harness, trade(TradeRole::SellerAsMaker, TAKER));
        harness.ledger.insert_tx("taker-fee", TxKind::TradeFee, 0);
        harness.ledger.insert_input(&taker_input());

        handle
            .deliver(request(&handle.trade(), taker_input()))
            .await
            .unwrap();
        let trade = handle
            .wait_for(|t| t.state == TradeState::MakerSawArrivedDepositTxInputs)
            .await;
        assert!(trade.contract.is_some());
        assert!(trade.maker_contract_signature.is_some());
        assert_eq!(harness.wallet.sign_count(), 1);

        let acks = acks(&harness).await;
        assert_eq!(acks, vec![(true, None)]);

        // The taker never publishes the deposit.
        let trade = handle.wait_for(|t| t.error_message.is_some()).await;
        assert!(trade.error_message.unwrap().starts_with("Timeout reached"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_opening_dispute_stops_timeout() {
        let harness = Harness::new(TAKER, 2);
        let handle = spawn(&harness, trade(TradeRole::BuyerAsTaker, MAKER));
        handle.act(TradeAction::TakeOffer).await.unwrap();

        handle
            .set_dispute_state(DisputeState::Requested(SupportType::Mediation))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        let trade = handle.trade();
        assert!(trade.error_message.is_none());
        assert_eq!(trade.dispute_state, DisputeState::Requested(SupportType::Mediation));
        assert!(harness
            .events
            .any(|e| matches!(e, ExchangeEvent::DisputeStateChanged { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispute_payout_applied_once() {
        let harness = Harness::new(TAKER, 2);
        let handle = spawn(&harness, trade(TradeRole::BuyerAsTaker, MAKER));
        let payout = DisputePayout {
            buyer_payout_amount: 1,
            seller_payout_amount: 2,
            payout_tx_id: Some("dispute-payout".to_string()),
        };

        assert!(handle.apply_dispute_payout(payout.clone()).await.unwrap());
        assert!(!handle.apply_dispute_payout(payout).await.unwrap());
        let trade = handle
            .wait_for(|t| t.dispute_payout.is_some())
            .await;
        assert_eq!(trade.payout_tx_id.as_deref(), Some("dispute-payout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_handle() {
        let harness = Harness::new(TAKER, 2);
        let handle = spawn(&harness, trade(TradeRole::BuyerAsTaker, MAKER));
        handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(handle.is_closed());
        assert!(handle.act(TradeAction::TakeOffer).await.is_err());
    }
}
