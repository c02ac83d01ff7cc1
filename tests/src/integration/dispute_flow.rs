//! # Dispute Flow
//!
//! A refund dispute on a confirmed escrow trade, with a scripted agent.
//! The agent's result reaches the maker before the maker learned of the
//! dispute: the result is parked, retried after the configured delay, and
//! applied once the `PeerOpenedDispute` has arrived.

#[cfg(test)]
mod tests {
    use crate::harness::{eventually, wait_for_trade, Agent, Market};
    use shared_bus::{EventFilter, ExchangeEvent};
    use shared_types::{
        now_secs, ChatMessage, DisputeInfo, DisputePayout, DisputeResult, DisputeResultMessage,
        DisputeState, ExchangeMessage, PeerOpenedDispute, SupportType, TradeId,
    };
    use std::time::Duration;

    fn opened_dispute(agent: &Agent) -> Option<DisputeInfo> {
        agent.received().into_iter().find_map(|e| match e.message {
            ExchangeMessage::DisputeOpened(opened) => Some(opened.dispute),
            _ => None,
        })
    }

    fn refund_result(trade_id: TradeId, payout_tx_id: &str) -> ExchangeMessage {
        ExchangeMessage::DisputeResult(DisputeResultMessage {
            result: DisputeResult {
                trade_id,
                support_type: SupportType::Refund,
                payout: DisputePayout {
                    buyer_payout_amount: 60_000_000,
                    seller_payout_amount: 10_000_000,
                    payout_tx_id: Some(payout_tx_id.to_string()),
                },
                summary_notes: "Buyer proved payment".to_string(),
                chat_message: ChatMessage {
                    uid: format!("result-{trade_id}"),
                    trade_id,
                    sender_is_trader: false,
                    text: "Refund decided in favour of the buyer".to_string(),
                    date: now_secs(),
                },
            },
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_result_before_peer_notice_is_applied_after_retry() {
        let market = Market::start().await.unwrap();
        let agent = Agent::refund_agent(&market.env);
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();
        let mut maker_events = market.maker.events().subscribe(EventFilter::trade(trade_id));

        market
            .taker
            .open_dispute(trade_id, SupportType::Refund)
            .await
            .unwrap();
        assert_eq!(
            market.taker.trade(&trade_id).unwrap().dispute_state,
            DisputeState::Requested(SupportType::Refund)
        );
        eventually("agent received dispute", || opened_dispute(&agent).is_some()).await;
        let dispute = opened_dispute(&agent).unwrap();
        assert_eq!(&dispute.opener, market.taker.address());

        // Result first, dispute notice second.
        let maker = market.maker.address().clone();
        agent
            .send(&maker, refund_result(trade_id, "refund-payout"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            market.maker.trade(&trade_id).unwrap().dispute_state,
            DisputeState::NoDispute
        );

        agent
            .send(&maker, ExchangeMessage::PeerOpenedDispute(PeerOpenedDispute { dispute }))
            .await
            .unwrap();
        wait_for_trade(&market.maker, &trade_id, "peer dispute stored", |t| {
            t.dispute_state != DisputeState::NoDispute
        })
        .await;

        let seller = wait_for_trade(&market.maker, &trade_id, "result applied", |t| {
            t.dispute_state == DisputeState::Closed(SupportType::Refund)
        })
        .await;
        assert_eq!(seller.payout_tx_id.as_deref(), Some("refund-payout"));
        assert_eq!(
            seller.dispute_payout.as_ref().map(|p| p.seller_payout_amount),
            Some(10_000_000)
        );
        assert!(seller.is_completed());
        eventually("maker trade archived", || {
            market.maker.trades().handle(&trade_id).is_none()
        })
        .await;
        assert!(market
            .maker
            .trades()
            .closed_trades()
            .iter()
            .any(|t| t.id == trade_id));

        let mut deferred = false;
        let mut applied = false;
        while let Ok(Some(event)) = maker_events.try_recv() {
            match event {
                ExchangeEvent::DisputeResultDeferred { attempt: 1, .. } => deferred = true,
                ExchangeEvent::DisputeResultApplied { .. } => applied = true,
                _ => {}
            }
        }
        assert!(deferred && applied);

        // The opener gets the same result and closes too.
        let taker = market.taker.address().clone();
        agent
            .send(&taker, refund_result(trade_id, "refund-payout"))
            .await
            .unwrap();
        let buyer = wait_for_trade(&market.taker, &trade_id, "taker result applied", |t| {
            t.dispute_state == DisputeState::Closed(SupportType::Refund)
        })
        .await;
        assert_eq!(buyer.payout_tx_id.as_deref(), Some("refund-payout"));
        eventually("taker trade archived", || {
            market.taker.trades().handle(&trade_id).is_none()
        })
        .await;
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_without_dispute_dropped_after_retries() {
        let market = Market::start().await.unwrap();
        let agent = Agent::refund_agent(&market.env);
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();
        let mut maker_events = market.maker.events().subscribe(EventFilter::trade(trade_id));

        let maker = market.maker.address().clone();
        agent
            .send(&maker, refund_result(trade_id, "stray-payout"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut dropped = false;
        while let Ok(Some(event)) = maker_events.try_recv() {
            if matches!(event, ExchangeEvent::DisputeResultDropped { .. }) {
                dropped = true;
            }
        }
        assert!(dropped);
        let trade = market.maker.trade(&trade_id).unwrap();
        assert_eq!(trade.dispute_state, DisputeState::NoDispute);
        assert!(trade.dispute_payout.is_none());
        assert!(market.maker.trades().handle(&trade_id).is_some());
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispute_needs_reachable_agent() {
        let market = Market::start().await.unwrap();
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();

        // Nobody joined as refund agent.
        let result = market.taker.open_dispute(trade_id, SupportType::Refund).await;

        assert!(result.is_err());
        assert_eq!(
            market.taker.trade(&trade_id).unwrap().dispute_state,
            DisputeState::NoDispute
        );
        market.shutdown().await;
    }
}
