//! # BSQ Swap Flow
//!
//! Atomic BSQ/BTC swap between two nodes: the taker requests, the maker
//! reconciles and signs, the taker completes and publishes. Both sides end
//! on the same swap transaction without any deposit or payment steps.

#[cfg(test)]
mod tests {
    use crate::harness::{wait_for_trade, Market};
    use px_02_offer_availability::OpenOfferState;
    use shared_types::ports::LedgerQuery;
    use shared_types::{Asset, ProtocolKind, TradeRole, TradeState, TxKind, COIN};

    #[tokio::test(start_paused = true)]
    async fn test_swap_completes_on_both_sides() {
        let market = Market::start().await.unwrap();
        market.taker.wallet().fund(Asset::Bsq, 10_000_000);
        let offer = market.place_sell_offer(ProtocolKind::BsqSwap).unwrap();

        let trade_id = market.taker.take_offer(offer.clone(), COIN / 2).await.unwrap();

        let buyer = wait_for_trade(&market.taker, &trade_id, "taker swap completed", |t| {
            t.state == TradeState::SwapCompleted
        })
        .await;
        let seller = wait_for_trade(&market.maker, &trade_id, "maker swap completed", |t| {
            t.state == TradeState::SwapCompleted
        })
        .await;

        assert_eq!(buyer.role, TradeRole::BuyerAsTaker);
        assert_eq!(seller.role, TradeRole::SellerAsMaker);
        let swap_tx_id = buyer.swap_tx_id.clone().unwrap();
        assert_eq!(seller.swap_tx_id.as_deref(), Some(swap_tx_id.as_str()));
        assert!(buyer.deposit_tx_id.is_none());
        assert!(buyer.is_completed() && seller.is_completed());

        let tx = market.env.ledger.get_transaction(&swap_tx_id).await.unwrap().unwrap();
        assert_eq!(tx.kind, TxKind::Swap);
        assert_eq!(
            market.maker.offers().get(&offer.id).map(|o| o.state),
            Some(OpenOfferState::Closed)
        );
        market.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfunded_taker_fails_and_offer_returns() {
        let market = Market::start().await.unwrap();
        let offer = market.place_sell_offer(ProtocolKind::BsqSwap).unwrap();

        // No BSQ in the taker's wallet.
        let result = market.taker.take_offer(offer.clone(), COIN / 2).await;

        assert!(result.is_err());
        let maker_offer = market.maker.offers().get(&offer.id).unwrap();
        assert_eq!(maker_offer.state, OpenOfferState::Available);
        market.shutdown().await;
    }
}
