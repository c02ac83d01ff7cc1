//! # Core Domain Entities
//!
//! Identifiers, network addresses and the offer book entry shared by every
//! protocol subsystem.
//!
//! Amounts are plain satoshi counts (`u64`). Prices are expressed in the
//! smallest unit of the counter currency per whole BTC (for BSQ swaps: BSQ
//! satoshis per BTC).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Satoshis per whole BTC.
pub const COIN: u64 = 100_000_000;

/// Maximum relative deviation between the taker's and the maker's price.
pub const PRICE_TOLERANCE: f64 = 0.01;

/// Unique identifier of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub Uuid);

impl OfferId {
    /// Generate a fresh random offer id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OfferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a trade. A trade is identified by the offer it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub Uuid);

impl TradeId {
    /// The trade id derived from the offer being taken.
    #[must_use]
    pub fn for_offer(offer_id: &OfferId) -> Self {
        Self(offer_id.0)
    }

    /// First eight characters, used in log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.to_string().chars().take(8).collect()
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a network message, used for acks and de-duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageUid(pub Uuid);

impl MessageUid {
    /// Generate a fresh uid.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageUid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address of a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name (onion address in production networks).
    pub host: String,
    /// Port.
    pub port: u16,
}

impl NodeAddress {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form.
    #[must_use]
    pub fn full_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Direction of an offer, from the maker's point of view (buying or selling BTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferDirection {
    /// Maker buys BTC.
    Buy,
    /// Maker sells BTC.
    Sell,
}

impl OfferDirection {
    /// The direction seen from the taker's side.
    #[must_use]
    pub fn mirrored(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Which protocol settles trades of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// Multisig escrow with a later cooperative or arbitrated payout.
    Escrow,
    /// One jointly signed BSQ/BTC settlement transaction.
    BsqSwap,
}

/// How the offer price is determined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PriceRule {
    /// Fixed price in counter-currency units per BTC.
    Fixed(u64),
    /// Market price adjusted by a margin (0.02 = 2% above market for sell offers).
    MarketBased {
        /// Relative margin applied to the market price.
        margin: f64,
    },
}

/// Reasons a taker's price is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceCheckError {
    /// Fixed price offers require the exact price.
    FixedPriceMismatch {
        /// Price proposed by the taker.
        takers_price: u64,
        /// Offer price.
        offer_price: u64,
    },
    /// No market price to derive the offer price from.
    MarketPriceNotAvailable,
    /// The taker's price is outside the tolerance.
    OutOfTolerance {
        /// Price proposed by the taker.
        takers_price: u64,
        /// Maker's computed price.
        makers_price: u64,
        /// Relative deviation.
        deviation: f64,
    },
    /// The taker's price is zero.
    NotPositive,
}

impl fmt::Display for PriceCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedPriceMismatch {
                takers_price,
                offer_price,
            } => write!(
                f,
                "Takers price {takers_price} does not match offer price {offer_price}"
            ),
            Self::MarketPriceNotAvailable => write!(
                f,
                "Market price required for calculating trade price is not available"
            ),
            Self::OutOfTolerance {
                takers_price,
                makers_price,
                deviation,
            } => write!(
                f,
                "Taker's trade price is too far away from our calculated price. takersPrice={takers_price} makersPrice={makers_price} deviation={:.4}%",
                deviation * 100.0
            ),
            Self::NotPositive => write!(f, "takersTradePrice must be positive"),
        }
    }
}

/// An immutable published intent to trade, owned by the maker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Offer id.
    pub id: OfferId,
    /// Maker's network address.
    pub owner: NodeAddress,
    /// Maker's signing public key (hex).
    pub owner_pub_key: String,
    /// Buy or sell BTC, from the maker's side.
    pub direction: OfferDirection,
    /// Maximum trade amount in satoshis.
    pub amount: u64,
    /// Minimum trade amount in satoshis.
    pub min_amount: u64,
    /// Price rule.
    pub price: PriceRule,
    /// Counter currency code.
    pub currency_code: String,
    /// Accepted payment method id.
    pub payment_method_id: String,
    /// Buyer security deposit in satoshis (escrow only).
    pub buyer_security_deposit: u64,
    /// Seller security deposit in satoshis (escrow only).
    pub seller_security_deposit: u64,
    /// Maker fee paid at offer creation, in satoshis.
    pub maker_fee: u64,
    /// Settlement protocol.
    pub protocol: ProtocolKind,
    /// Creation time (unix seconds).
    pub created_at: u64,
}

impl Offer {
    /// Check the internal consistency of the offer.
    pub fn validate(&self) -> Result<(), String> {
        if self.amount == 0 {
            return Err("Offer amount must be positive".to_string());
        }
        if self.min_amount == 0 || self.min_amount > self.amount {
            return Err(format!(
                "Offer min amount {} must be in (0, {}]",
                self.min_amount, self.amount
            ));
        }
        if self.payment_method_id.is_empty() {
            return Err("Offer payment method must not be empty".to_string());
        }
        if self.protocol == ProtocolKind::BsqSwap && !matches!(self.price, PriceRule::Fixed(_)) {
            return Err("BSQ swap offers require a fixed price".to_string());
        }
        Ok(())
    }

    /// Whether `amount` is within `[min_amount, amount]`.
    #[must_use]
    pub fn is_amount_in_range(&self, amount: u64) -> bool {
        amount >= self.min_amount && amount <= self.amount
    }

    /// The offer price, given the current market price if the rule needs one.
    #[must_use]
    pub fn price_at(&self, market_price: Option<u64>) -> Option<u64> {
        match self.price {
            PriceRule::Fixed(price) => Some(price),
            PriceRule::MarketBased { margin } => {
                let market = market_price? as f64;
                let factor = match self.direction {
                    OfferDirection::Sell => 1.0 + margin,
                    OfferDirection::Buy => 1.0 - margin,
                };
                let price = (market * factor).round();
                (price > 0.0).then_some(price as u64)
            }
        }
    }

    /// Verify the taker's trade price against the offer price rule.
    pub fn check_trade_price_tolerance(
        &self,
        takers_price: u64,
        market_price: Option<u64>,
    ) -> Result<(), PriceCheckError> {
        if let PriceRule::Fixed(offer_price) = self.price {
            if takers_price != offer_price {
                return Err(PriceCheckError::FixedPriceMismatch {
                    takers_price,
                    offer_price,
                });
            }
        }
        let makers_price = self
            .price_at(market_price)
            .ok_or(PriceCheckError::MarketPriceNotAvailable)?;
        if takers_price == 0 {
            return Err(PriceCheckError::NotPositive);
        }
        let relation = takers_price as f64 / makers_price as f64;
        let deviation = (1.0 - relation).abs();
        if deviation > PRICE_TOLERANCE {
            return Err(PriceCheckError::OutOfTolerance {
                takers_price,
                makers_price,
                deviation,
            });
        }
        Ok(())
    }

    /// Counter-currency volume of `amount` satoshis at `price`.
    #[must_use]
    pub fn volume(amount: u64, price: u64) -> u64 {
        ((u128::from(amount) * u128::from(price)) / u128::from(COIN)) as u64
    }
}

/// Sample offers for tests and local demos.
pub mod fixtures {
    use super::*;

    /// A 1 BTC offer (min 0.25 BTC) at a fixed price, owned by `maker.onion:9999`.
    #[must_use]
    pub fn offer(direction: OfferDirection, protocol: ProtocolKind) -> Offer {
        Offer {
            id: OfferId::new(),
            owner: NodeAddress::new("maker.onion", 9999),
            owner_pub_key: "00".repeat(32),
            direction,
            amount: COIN,
            min_amount: COIN / 4,
            price: PriceRule::Fixed(2_000_000),
            currency_code: "BSQ".to_string(),
            payment_method_id: "SEPA".to_string(),
            buyer_security_deposit: COIN / 10,
            seller_security_deposit: COIN / 10,
            maker_fee: 5_000,
            protocol,
            created_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::offer;
    use super::*;

    #[test]
    fn test_amount_range() {
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        assert!(offer.is_amount_in_range(COIN / 4));
        assert!(offer.is_amount_in_range(COIN));
        assert!(!offer.is_amount_in_range(COIN / 4 - 1));
        assert!(!offer.is_amount_in_range(COIN + 1));
    }

    #[test]
    fn test_validate_rejects_min_above_amount() {
        let mut offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        offer.min_amount = offer.amount + 1;
        assert!(offer.validate().is_err());
    }

    #[test]
    fn test_swap_offer_requires_fixed_price() {
        let mut offer = offer(OfferDirection::Buy, ProtocolKind::BsqSwap);
        offer.price = PriceRule::MarketBased { margin: 0.01 };
        assert!(offer.validate().is_err());
    }

    #[test]
    fn test_fixed_price_must_match_exactly() {
        let offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        assert!(offer.check_trade_price_tolerance(2_000_000, None).is_ok());
        assert!(matches!(
            offer.check_trade_price_tolerance(2_000_001, None),
            Err(PriceCheckError::FixedPriceMismatch { .. })
        ));
    }

    #[test]
    fn test_market_price_tolerance() {
        let mut offer = offer(OfferDirection::Sell, ProtocolKind::Escrow);
        offer.price = PriceRule::MarketBased { margin: 0.0 };

        assert_eq!(
            offer.check_trade_price_tolerance(1_000_000, None),
            Err(PriceCheckError::MarketPriceNotAvailable)
        );
        assert!(offer
            .check_trade_price_tolerance(1_009_000, Some(1_000_000))
            .is_ok());
        assert!(matches!(
            offer.check_trade_price_tolerance(1_020_000, Some(1_000_000)),
            Err(PriceCheckError::OutOfTolerance { .. })
        ));
    }

    #[test]
    fn test_volume() {
        assert_eq!(Offer::volume(COIN, 2_000_000), 2_000_000);
        assert_eq!(Offer::volume(COIN / 2, 2_000_000), 1_000_000);
    }

    #[test]
    fn test_direction_mirrored() {
        assert_eq!(OfferDirection::Buy.mirrored(), OfferDirection::Sell);
    }
}
