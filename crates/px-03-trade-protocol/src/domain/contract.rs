//! Contract and escrow transaction construction.
//!
//! Both parties run the same builders on the same inputs, so each side can
//! check what the other one signed without trusting it.

use crate::domain::model::{required, ProcessModel};
use shared_types::{
    Asset, Contract, OutPoint, ProtocolError, Trade, TxInput, TxOutput, UnsignedTx,
};

/// Address of the 2-of-2 escrow output of a trade.
pub fn multisig_address(trade: &Trade) -> String {
    format!("multisig-{}", trade.id)
}

/// Build the contract from local and peer-supplied fields.
pub fn build_contract(model: &ProcessModel) -> Result<Contract, ProtocolError> {
    let trade = &model.trade;
    let role = trade.role;
    let my_address = model.services.bus.my_address();
    let my_pub_key = model.services.key_ring.pub_key_hex();
    let my_payout = model.require_my_payout_address()?;
    let peer_payout = required(&model.peer.payout_address, "peer payout address")?;
    let peer_account = required(&model.peer.account_id, "peer account id")?;
    let peer_pub_key = required(&model.peer.signing_pub_key, "peer signing key")?;

    let (buyer_address, seller_address) = if role.is_buyer() {
        (my_address, trade.peer.clone())
    } else {
        (trade.peer.clone(), my_address)
    };
    let (buyer_payout_address, seller_payout_address) = if role.is_buyer() {
        (my_payout, peer_payout)
    } else {
        (peer_payout, my_payout)
    };
    let (maker_account_id, taker_account_id, maker_signing_pub_key, taker_signing_pub_key) =
        if role.is_maker() {
            (model.services.account_id.clone(), peer_account, my_pub_key, peer_pub_key)
        } else {
            (peer_account, model.services.account_id.clone(), peer_pub_key, my_pub_key)
        };

    Ok(Contract {
        offer_id: trade.offer.id,
        trade_amount: trade.amount,
        trade_price: trade.price,
        taker_fee_tx_id: required(&trade.taker_fee_tx_id, "taker fee tx id")?,
        buyer_address,
        seller_address,
        is_buyer_maker_and_seller_taker: role.is_buyer() == role.is_maker(),
        maker_account_id,
        taker_account_id,
        payment_method_id: trade.offer.payment_method_id.clone(),
        maker_signing_pub_key,
        taker_signing_pub_key,
        buyer_payout_address,
        seller_payout_address,
    })
}

/// Change owed back to the owner of `inputs` after contributing `contribution`.
pub fn change_for(inputs: &[TxInput], contribution: u64) -> Result<u64, ProtocolError> {
    let total = inputs
        .iter()
        .filter(|i| i.asset == Asset::Btc)
        .try_fold(0u64, |acc, i| acc.checked_add(i.value))
        .ok_or_else(|| ProtocolError::Violation("input value sum overflows".to_string()))?;
    total.checked_sub(contribution).ok_or_else(|| {
        ProtocolError::Validation(format!(
            "inputs of {total} sat do not cover contribution of {contribution} sat"
        ))
    })
}

/// Build the deposit transaction: taker inputs, then maker inputs; the
/// escrow output, then taker change, then maker change.
pub fn build_deposit_tx(
    trade: &Trade,
    taker_inputs: &[TxInput],
    taker_change_address: &str,
    maker_inputs: &[TxInput],
    maker_change_address: &str,
) -> Result<UnsignedTx, ProtocolError> {
    let (taker_contribution, maker_contribution) = if trade.role.is_maker() {
        (trade.peer_deposit_contribution(), trade.my_deposit_contribution())
    } else {
        (trade.my_deposit_contribution(), trade.peer_deposit_contribution())
    };
    let taker_change = change_for(taker_inputs, taker_contribution)?;
    let maker_change = change_for(maker_inputs, maker_contribution)?;

    let mut outputs = vec![TxOutput::new(
        multisig_address(trade),
        Asset::Btc,
        trade.deposit_amount(),
    )];
    if taker_change > 0 {
        outputs.push(TxOutput::new(taker_change_address, Asset::Btc, taker_change));
    }
    if maker_change > 0 {
        outputs.push(TxOutput::new(maker_change_address, Asset::Btc, maker_change));
    }

    let inputs = taker_inputs
        .iter()
        .chain(maker_inputs.iter())
        .cloned()
        .collect();
    Ok(UnsignedTx { inputs, outputs })
}

/// Outpoint of the escrow output of the published deposit.
pub fn deposit_outpoint(model: &ProcessModel) -> Result<TxInput, ProtocolError> {
    let trade = &model.trade;
    let deposit_tx_id = required(&trade.deposit_tx_id, "deposit tx id")?;
    let deposit = model
        .deposit_tx
        .as_ref()
        .ok_or_else(|| ProtocolError::ContextNotAvailable("deposit tx".to_string()))?;
    let index = deposit
        .tx
        .find_output(&multisig_address(trade), Asset::Btc, trade.deposit_amount())
        .ok_or_else(|| ProtocolError::Violation("deposit tx has no escrow output".to_string()))?;
    Ok(TxInput {
        outpoint: OutPoint::new(deposit_tx_id, index),
        asset: Asset::Btc,
        value: trade.deposit_amount(),
    })
}

/// Amounts paid out to buyer and seller after a regular trade.
pub fn payout_amounts(trade: &Trade) -> (u64, u64) {
    (
        trade.amount + trade.buyer_security_deposit(),
        trade.seller_security_deposit(),
    )
}

/// Build the payout transaction spending the escrow output.
pub fn build_payout_tx(model: &ProcessModel) -> Result<UnsignedTx, ProtocolError> {
    let contract = model
        .trade
        .contract
        .as_ref()
        .ok_or_else(|| ProtocolError::ContextNotAvailable("contract".to_string()))?;
    let escrow = deposit_outpoint(model)?;
    let (buyer_amount, seller_amount) = payout_amounts(&model.trade);

    Ok(UnsignedTx {
        inputs: vec![escrow],
        outputs: vec![
            TxOutput::new(contract.buyer_payout_address.clone(), Asset::Btc, buyer_amount),
            TxOutput::new(contract.seller_payout_address.clone(), Asset::Btc, seller_amount),
        ],
    })
}
