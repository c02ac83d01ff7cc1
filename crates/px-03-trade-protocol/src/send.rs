//! Outbound messaging for trade protocols.
//!
//! Mailbox messages are retried a bounded number of times. If delivery
//! still fails the trade records the failed sub-state, keeps the envelope
//! for a manual retry and continues: the task does not fail.
//!
//! Direct messages fail the task when delivery fails.

use crate::domain::{PendingSend, ProcessModel, SendStates};
use async_trait::async_trait;
use px_01_task_runner::{Step, Task};
use shared_bus::ExchangeEvent;
use shared_types::ports::SendOutcome;
use shared_types::{ExchangeMessage, NetworkEnvelope, NetworkError, ProtocolError};
use tracing::{debug, info, warn};

async fn send_with_retry(
    model: &ProcessModel,
    envelope: &NetworkEnvelope,
) -> Result<SendOutcome, NetworkError> {
    let services = &model.services;
    let peer = &model.trade.peer;
    let retries = services.config.send_retries;
    let mut attempt = 0;
    loop {
        match services.bus.send(peer, envelope.clone()).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(
                    trade_id = %model.trade.id,
                    message = envelope.name(),
                    attempt,
                    error = %e,
                    "Send failed, retrying"
                );
                services
                    .events
                    .publish(ExchangeEvent::MessageSendRetried {
                        trade_id: model.trade.id,
                        message: envelope.name().to_string(),
                    })
                    .await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Deliver `envelope`, moving through the send sub-states.
async fn deliver(
    model: &mut ProcessModel,
    envelope: NetworkEnvelope,
    states: SendStates,
) -> Result<(), ProtocolError> {
    match send_with_retry(model, &envelope).await {
        Ok(SendOutcome::Arrived) => {
            debug!(trade_id = %model.trade.id, message = envelope.name(), "Message arrived");
            model.pending_send = None;
            model.set_state(states.arrived)
        }
        Ok(SendOutcome::StoredInMailbox) => {
            info!(trade_id = %model.trade.id, message = envelope.name(), "Message stored in mailbox");
            model.pending_send = None;
            model.set_state(states.stored)
        }
        Err(e) => {
            warn!(
                trade_id = %model.trade.id,
                message = envelope.name(),
                error = %e,
                "Message could not be delivered"
            );
            model.set_state(states.failed)?;
            model.trade.error_message = Some(format!(
                "Sending {} failed: {e}. Retry once the peer is reachable.",
                envelope.name()
            ));
            let message = envelope.name().to_string();
            model.pending_send = Some(PendingSend { envelope, states });
            model
                .services
                .events
                .publish(ExchangeEvent::TradeSendFailed {
                    trade_id: model.trade.id,
                    message,
                    error: e.to_string(),
                })
                .await;
            model.services.persistence.request_persistence();
            Ok(())
        }
    }
}

/// Send a mailbox message. Delivery failure is recorded on the trade, not
/// returned.
pub async fn send_mailbox_message(
    model: &mut ProcessModel,
    message: ExchangeMessage,
    states: SendStates,
) -> Result<(), ProtocolError> {
    let envelope = NetworkEnvelope::new(model.services.bus.my_address(), message);
    model.set_state(states.sent)?;
    deliver(model, envelope, states).await
}

/// Send a direct message. Delivery failure fails the calling task.
pub async fn send_direct_message(
    model: &ProcessModel,
    message: ExchangeMessage,
) -> Result<SendOutcome, ProtocolError> {
    let envelope = NetworkEnvelope::new(model.services.bus.my_address(), message);
    let outcome = send_with_retry(model, &envelope).await?;
    debug!(trade_id = %model.trade.id, message = envelope.name(), outcome = ?outcome, "Direct message sent");
    Ok(outcome)
}

/// Resend the message whose delivery failed.
pub struct ResendPendingMessage;

#[async_trait]
impl Task<ProcessModel, ProtocolError> for ResendPendingMessage {
    fn name(&self) -> &'static str {
        "ResendPendingMessage"
    }

    async fn run(&self, step: &mut Step<'_, ProcessModel, ProtocolError>) -> Result<(), ProtocolError> {
        let model = step.model();
        let pending = model.pending_send.take().ok_or_else(|| {
            ProtocolError::ContextNotAvailable("no message awaiting retry".to_string())
        })?;
        if model.trade.state != pending.states.failed {
            let state = model.trade.state;
            model.pending_send = Some(pending);
            return Err(ProtocolError::Validation(format!(
                "nothing to retry in state {state:?}"
            )));
        }
        model.trade.error_message = None;
        deliver(model, pending.envelope, pending.states).await
    }
}
