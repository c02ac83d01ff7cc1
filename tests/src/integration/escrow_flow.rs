//! # Escrow Trade Flow
//!
//! Taker and maker run the deposit-based protocol end to end:
//!
//! 1. Availability handshake, then the taker fee and deposit inputs
//! 2. Maker verifies, signs the contract and builds the deposit
//! 3. Taker publishes the deposit, both wait for a confirmation
//! 4. Buyer confirms payment started, seller confirms receipt and pays out
//!
//! The maker's offer is closed once funds are locked; a second taker is
//! refused at the availability step.

#[cfg(test)]
mod tests {
    use crate::harness::{eventually, start_node, wait_for_trade, Market};
    use node_runtime::{ExchangeNode, NodeError};
    use px_02_offer_availability::OpenOfferState;
    use px_03_trade_protocol::TradeAction;
    use shared_types::ports::LedgerQuery;
    use shared_types::{
        Asset, AvailabilityResult, Offer, ProtocolKind, TradePhase, TradeRole, TradeState, COIN,
    };

    fn offer_state(maker: &ExchangeNode, offer: &Offer) -> Option<OpenOfferState> {
        maker.offers().get(&offer.id).map(|o| o.state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_escrow_trade_completes_with_payout() {
        let market = Market::start().await.unwrap();
        let (offer, trade_id) = market.confirmed_escrow_trade().await.unwrap();

        let maker_trade = market.maker.trade(&trade_id).unwrap();
        let taker_trade = market.taker.trade(&trade_id).unwrap();
        assert_eq!(maker_trade.role, TradeRole::SellerAsMaker);
        assert_eq!(taker_trade.role, TradeRole::BuyerAsTaker);
        assert_eq!(maker_trade.deposit_tx_id, taker_trade.deposit_tx_id);
        assert_eq!(maker_trade.contract_hash, taker_trade.contract_hash);
        assert_eq!(offer_state(&market.maker, &offer), Some(OpenOfferState::Closed));

        market
            .taker
            .act(&trade_id, TradeAction::ConfirmPaymentStarted)
            .await
            .unwrap();
        wait_for_trade(&market.maker, &trade_id, "fiat payment message", |t| {
            t.state == TradeState::SellerReceivedFiatPaymentInitiatedMsg
        })
        .await;

        market
            .maker
            .act(&trade_id, TradeAction::ConfirmPaymentReceived)
            .await
            .unwrap();
        let buyer = wait_for_trade(&market.taker, &trade_id, "payout message", |t| {
            t.state == TradeState::BuyerReceivedPayoutTxPublishedMsg
        })
        .await;
        let seller = market.maker.trade(&trade_id).unwrap();

        assert!(buyer.is_completed());
        assert!(seller.is_completed());
        assert_eq!(seller.phase(), TradePhase::PayoutPublished);
        let payout = seller.payout_tx_id.clone().unwrap();
        assert_eq!(buyer.payout_tx_id.as_deref(), Some(payout.as_str()));
        assert!(market.env.ledger.get_transaction(&payout).await.unwrap().is_some());
        assert!(buyer.error_message.is_none());
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_funds_leave_both_wallets() {
        let market = Market::start().await.unwrap();
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();
        let trade = market.taker.trade(&trade_id).unwrap();

        // Buyer locked its security deposit and paid the taker fee.
        assert!(market.taker.wallet().balance(Asset::Btc) <= COIN - trade.buyer_security_deposit());
        // Seller locked the trade amount plus its security deposit.
        assert!(
            market.maker.wallet().balance(Asset::Btc)
                <= 10 * COIN - trade.amount - trade.seller_security_deposit()
        );
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_taker_refused() {
        let market = Market::start().await.unwrap();
        let offer = market.place_sell_offer(ProtocolKind::Escrow).unwrap();
        let trade_id = market.taker.take_offer(offer.clone(), COIN / 2).await.unwrap();
        wait_for_trade(&market.maker, &trade_id, "maker trade", |_| true).await;

        let late = start_node(&market.env, 9003).await.unwrap();
        late.wallet().fund(Asset::Btc, COIN);
        let result = late.take_offer(offer.clone(), COIN / 2).await;

        assert!(matches!(
            result,
            Err(NodeError::OfferNotAvailable {
                result: AvailabilityResult::OfferTaken,
                ..
            })
        ));
        assert!(late.trades().open_trades().is_empty());
        late.shutdown().await.unwrap();
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_amount_below_minimum_rejected_locally() {
        let market = Market::start().await.unwrap();
        let offer = market.place_sell_offer(ProtocolKind::Escrow).unwrap();

        let result = market.taker.take_offer(offer.clone(), offer.min_amount - 1).await;

        assert!(matches!(result, Err(NodeError::AmountOutOfRange { .. })));
        eventually("offer still available", || {
            offer_state(&market.maker, &offer) == Some(OpenOfferState::Available)
        })
        .await;
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handles_survive_until_shutdown() {
        let market = Market::start().await.unwrap();
        let (_, trade_id) = market.confirmed_escrow_trade().await.unwrap();
        let handle = market.taker.trades().handle(&trade_id).unwrap();
        assert!(!handle.is_closed());

        market.shutdown().await;
        eventually("trade actor stopped", || handle.is_closed()).await;
    }
}
