//! # Protocol Flows
//!
//! A flow maps a trigger (a local action, an inbound message or a ledger
//! tick) to the task list that handles it, after checking that the trade
//! is in a phase and role where the trigger is expected.

use crate::domain::ProcessModel;
use px_01_task_runner::BoxedTask;
use shared_types::{
    ExchangeMessage, ProtocolError, ProtocolKind, Trade, TradePhase, TradeRole, TradeState,
};

/// Task type of all trade protocols.
pub type ProtocolTask = BoxedTask<ProcessModel, ProtocolError>;

/// Local user actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    /// Taker starts the trade.
    TakeOffer,
    /// Buyer confirms the external payment was started.
    ConfirmPaymentStarted,
    /// Seller confirms the external payment arrived.
    ConfirmPaymentReceived,
    /// Resend a message whose delivery failed.
    RetryFailedSend,
}

impl TradeAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::TakeOffer => "TakeOffer",
            Self::ConfirmPaymentStarted => "ConfirmPaymentStarted",
            Self::ConfirmPaymentReceived => "ConfirmPaymentReceived",
            Self::RetryFailedSend => "RetryFailedSend",
        }
    }
}

/// What to do with the protocol timeout once a plan completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutDirective {
    Keep,
    Start,
    Stop,
}

/// Task list selected for one trigger.
pub struct Plan {
    pub label: &'static str,
    pub tasks: Vec<ProtocolTask>,
    pub timeout: TimeoutDirective,
}

impl Plan {
    pub fn new(label: &'static str, tasks: Vec<ProtocolTask>) -> Self {
        Self {
            label,
            tasks,
            timeout: TimeoutDirective::Keep,
        }
    }

    pub fn start_timeout(mut self) -> Self {
        self.timeout = TimeoutDirective::Start;
        self
    }

    pub fn stop_timeout(mut self) -> Self {
        self.timeout = TimeoutDirective::Stop;
        self
    }
}

/// One trade protocol variant.
pub trait ProtocolFlow: Send + Sync {
    /// Protocol this flow settles.
    fn protocol(&self) -> ProtocolKind;

    /// Tasks for a local action.
    fn on_action(&self, trade: &Trade, action: TradeAction) -> Result<Plan, ProtocolError>;

    /// Tasks for an inbound message from the trading peer.
    fn on_message(&self, trade: &Trade, message: &ExchangeMessage) -> Result<Plan, ProtocolError>;

    /// Tasks for a periodic ledger poll, if the trade is waiting on the chain.
    fn on_ledger_tick(&self, _trade: &Trade) -> Option<Plan> {
        None
    }
}

/// Precondition check on a trigger.
///
/// ```rust,ignore
/// Condition::new(trade, "DepositTxPublished")
///     .phase(TradePhase::TakerFeePublished)
///     .maker()
///     .check()?;
/// ```
pub struct Condition<'a> {
    trade: &'a Trade,
    trigger: String,
    phases: Vec<TradePhase>,
    states: Vec<TradeState>,
    role_ok: bool,
}

impl<'a> Condition<'a> {
    pub fn new(trade: &'a Trade, trigger: impl Into<String>) -> Self {
        Self {
            trade,
            trigger: trigger.into(),
            phases: Vec::new(),
            states: Vec::new(),
            role_ok: true,
        }
    }

    /// Accept `phase`. Several calls accept any of them.
    pub fn phase(mut self, phase: TradePhase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Accept one exact state, for protocols whose states share a phase.
    pub fn state(mut self, state: TradeState) -> Self {
        self.states.push(state);
        self
    }

    pub fn maker(self) -> Self {
        let ok = self.trade.role.is_maker();
        self.role(ok)
    }

    pub fn taker(self) -> Self {
        let ok = !self.trade.role.is_maker();
        self.role(ok)
    }

    pub fn buyer(self) -> Self {
        let ok = self.trade.role.is_buyer();
        self.role(ok)
    }

    pub fn seller(self) -> Self {
        let ok = !self.trade.role.is_buyer();
        self.role(ok)
    }

    fn role(mut self, ok: bool) -> Self {
        self.role_ok &= ok;
        self
    }

    pub fn check(self) -> Result<(), ProtocolError> {
        let phase = self.trade.phase();
        let phase_ok = (self.phases.is_empty() && self.states.is_empty())
            || self.phases.contains(&phase)
            || self.states.contains(&self.trade.state);
        if phase_ok && self.role_ok {
            return Ok(());
        }
        Err(ProtocolError::UnexpectedTrigger {
            trigger: format!("{} as {}", self.trigger, role_name(self.trade.role)),
            phase,
        })
    }
}

fn role_name(role: TradeRole) -> &'static str {
    match role {
        TradeRole::BuyerAsMaker => "buyer as maker",
        TradeRole::BuyerAsTaker => "buyer as taker",
        TradeRole::SellerAsMaker => "seller as maker",
        TradeRole::SellerAsTaker => "seller as taker",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::fixtures::offer;
    use shared_types::{NodeAddress, OfferDirection, COIN};

    fn trade(role: TradeRole) -> Trade {
        Trade::new(
            offer(OfferDirection::Buy, ProtocolKind::Escrow),
            role,
            COIN,
            2_000_000,
            NodeAddress::new("peer", 1),
        )
    }

    #[test]
    fn test_condition_accepts_listed_phase_and_role() {
        let trade = trade(TradeRole::BuyerAsMaker);
        assert!(Condition::new(&trade, "X")
            .phase(TradePhase::Init)
            .maker()
            .buyer()
            .check()
            .is_ok());
    }

    #[test]
    fn test_condition_rejects_wrong_phase() {
        let mut trade = trade(TradeRole::BuyerAsMaker);
        trade.state = TradeState::DepositConfirmedInBlockChain;
        let err = Condition::new(&trade, "InputsForDepositTxRequest")
            .phase(TradePhase::Init)
            .check()
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedTrigger {
                trigger: "InputsForDepositTxRequest as buyer as maker".to_string(),
                phase: TradePhase::DepositConfirmed,
            }
        );
    }

    #[test]
    fn test_condition_rejects_wrong_role() {
        let trade = trade(TradeRole::SellerAsTaker);
        assert!(Condition::new(&trade, "X").phase(TradePhase::Init).maker().check().is_err());
        assert!(Condition::new(&trade, "X").buyer().check().is_err());
        assert!(Condition::new(&trade, "X").taker().seller().check().is_ok());
    }

    #[test]
    fn test_condition_on_exact_state() {
        let mut trade = trade(TradeRole::BuyerAsMaker);
        trade.state = TradeState::SwapMakerSignedTx;
        assert!(Condition::new(&trade, "X").state(TradeState::SwapMakerSignedTx).check().is_ok());
        assert!(Condition::new(&trade, "X").state(TradeState::SwapPreparation).check().is_err());
    }
}
