//! # Network Faults
//!
//! Mailbox messages survive transient send failures and offline peers:
//! one failure is retried automatically, a second leaves the trade in a
//! `SendFailed` state until the user retries, and an offline peer gets the
//! message from its mailbox when it comes back.

#[cfg(test)]
mod tests {
    use crate::harness::{wait_for_trade, Market};
    use px_03_trade_protocol::TradeAction;
    use shared_bus::{EventFilter, ExchangeEvent, Subscription};
    use shared_types::{TradeId, TradeState};

    fn drain(subscription: &mut Subscription) -> Vec<ExchangeEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = subscription.try_recv() {
            events.push(event);
        }
        events
    }

    async fn seller_saw_payment_started(market: &Market, trade_id: &TradeId) {
        wait_for_trade(&market.maker, trade_id, "fiat payment message", |t| {
            t.state == TradeState::SellerReceivedFiatPaymentInitiatedMsg
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_send_failure_retried() {
        let market = Market::start().await.unwrap();
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();
        let mut events = market.taker.events().subscribe(EventFilter::trade(trade_id));

        market.env.network.fail_next_sends(market.taker.address(), 1);
        market
            .taker
            .act(&trade_id, TradeAction::ConfirmPaymentStarted)
            .await
            .unwrap();

        seller_saw_payment_started(&market, &trade_id).await;
        assert_eq!(
            market.taker.trade(&trade_id).unwrap().state,
            TradeState::BuyerSawArrivedFiatPaymentInitiatedMsg
        );
        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            ExchangeEvent::MessageSendRetried { message, .. } if message == "FiatTransferStarted"
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ExchangeEvent::TradeSendFailed { .. })));
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_send_waits_for_manual_retry() {
        let market = Market::start().await.unwrap();
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();
        let mut events = market.taker.events().subscribe(EventFilter::trade(trade_id));

        market.env.network.fail_next_sends(market.taker.address(), 2);
        market
            .taker
            .act(&trade_id, TradeAction::ConfirmPaymentStarted)
            .await
            .unwrap();

        let buyer = wait_for_trade(&market.taker, &trade_id, "send failure", |t| {
            t.state == TradeState::BuyerSendFailedFiatPaymentInitiatedMsg
        })
        .await;
        assert!(buyer.error_message.is_none());
        assert!(!buyer.is_completed());
        assert_eq!(
            market.maker.trade(&trade_id).unwrap().state,
            TradeState::DepositConfirmedInBlockChain
        );
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, ExchangeEvent::TradeSendFailed { .. })));

        market
            .taker
            .act(&trade_id, TradeAction::RetryFailedSend)
            .await
            .unwrap();
        seller_saw_payment_started(&market, &trade_id).await;
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_peer_receives_from_mailbox() {
        let market = Market::start().await.unwrap();
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();
        let maker = market.maker.address().clone();

        market.env.network.set_offline(&maker);
        market
            .taker
            .act(&trade_id, TradeAction::ConfirmPaymentStarted)
            .await
            .unwrap();

        wait_for_trade(&market.taker, &trade_id, "message stored", |t| {
            t.state == TradeState::BuyerStoredInMailboxFiatPaymentInitiatedMsg
        })
        .await;
        assert_eq!(market.env.network.mailbox_len(&maker), 1);
        assert_eq!(
            market.maker.trade(&trade_id).unwrap().state,
            TradeState::DepositConfirmedInBlockChain
        );

        market.env.network.set_online(&maker);
        seller_saw_payment_started(&market, &trade_id).await;
        assert_eq!(market.env.network.mailbox_len(&maker), 0);
        market.shutdown().await;
    }
}
