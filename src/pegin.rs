//! Peg-In Validator
//!
//! Registers bitcoin transactions touching federation funds. A transaction
//! is proven against the header chain, recognized by its shape, and then
//! credited, refunded or just recorded. Spends are recognized structurally;
//! scripts are never executed.

use bitcoin::consensus::encode::deserialize;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, PublicKey, ScriptBuf, Transaction, Txid};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::bridge::BridgeSupport;
use crate::btc_spv::{declared_input_count, raw_tx_hash, BtcChain, PartialMerkleProof};
use crate::common::logging::log_pegin_event;
use crate::common::{AlertKind, BridgeError, Result};
use crate::federation::Federation;
use crate::host::{HostAddress, HostLedger, HostTransaction, BRIDGE_ADDRESS};
use crate::release::script_sig;
use crate::release::ReleaseTransactionBuilder;
use crate::units::sats_to_wei;
use crate::utxo::{self, Utxo};

/// What a transaction does to federation funds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxClassification {
    /// Pays the live federations from outside
    PegIn,
    /// Spends federation UTXOs
    PegOut,
    /// Moves retiring funds to the active federation
    Migration,
    Unrecognized,
}

/// Whether any input's scriptSig ends with the federation's redeem script
pub fn spends_from(tx: &Transaction, federation: &Federation) -> bool {
    let redeem = federation.redeem_script();
    tx.input.iter().any(|input| {
        script_sig::redeem_script(&input.script_sig).map_or(false, |pushed| pushed == redeem)
    })
}

/// Total paid to the federation's P2SH script
pub fn value_sent_to(tx: &Transaction, federation: &Federation) -> Amount {
    let script = federation.p2sh_script();
    tx.output
        .iter()
        .filter(|output| output.script_pubkey == script)
        .map(|output| output.value)
        .sum()
}

pub fn classify(
    tx: &Transaction,
    active: &Federation,
    retiring: Option<&Federation>,
    minimum_lock_value: Amount,
) -> TxClassification {
    if let Some(retiring) = retiring {
        if spends_from(tx, retiring) && value_sent_to(tx, active) > Amount::ZERO {
            return TxClassification::Migration;
        }
    }

    let live: Vec<&Federation> = std::iter::once(active).chain(retiring).collect();
    if live.iter().any(|federation| spends_from(tx, federation)) {
        return TxClassification::PegOut;
    }

    let received: Amount = live.iter().map(|federation| value_sent_to(tx, federation)).sum();
    if received >= minimum_lock_value {
        return TxClassification::PegIn;
    }

    TxClassification::Unrecognized
}

/// Context-free checks a transaction must pass before it is looked at
pub fn verify_structure(tx: &Transaction) -> Result<()> {
    if tx.input.is_empty() || tx.output.is_empty() {
        return Err(BridgeError::verification("transaction has no inputs or no outputs"));
    }

    let mut total = Amount::ZERO;
    for output in &tx.output {
        total = total
            .checked_add(output.value)
            .filter(|sum| output.value <= Amount::MAX_MONEY && *sum <= Amount::MAX_MONEY)
            .ok_or_else(|| BridgeError::verification("output value out of range"))?;
    }

    let mut spent = HashSet::with_capacity(tx.input.len());
    if !tx.input.iter().all(|input| spent.insert(input.previous_output)) {
        return Err(BridgeError::verification("duplicate inputs"));
    }

    Ok(())
}

/// Public key pushed by a P2PKH spend in the first input
fn sender_key_bytes(tx: &Transaction) -> Option<Vec<u8>> {
    let chunks = script_sig::chunks(&tx.input.first()?.script_sig)?;
    if chunks.len() != 2 {
        return None;
    }
    chunks.into_iter().nth(1)
}

impl<C: BtcChain, L: HostLedger> BridgeSupport<'_, C, L> {
    /// Register a bitcoin transaction proven by a partial Merkle tree of the block at `height`
    pub fn register_btc_transaction(
        &mut self,
        tx: &HostTransaction,
        raw_tx: &[u8],
        height: i32,
        pmt: &[u8],
    ) -> Result<()> {
        let txid = raw_tx_hash(raw_tx);
        if self.state.processed_txs.contains_key(&txid) {
            warn!(%txid, "Bitcoin transaction already processed");
            return Ok(());
        }

        let Ok(height) = u32::try_from(height) else {
            self.raise_alert(
                AlertKind::NegativeHeight,
                format!("bitcoin tx {} supplied with negative height {}", txid, height),
            );
            return Ok(());
        };

        let best_height = self.chain.best_height();
        let confirmations = i64::from(best_height) - i64::from(height) + 1;
        let required = i64::from(self.constants.btc2host_min_confirmations);
        if confirmations < required {
            warn!(%txid, confirmations, required, "Not enough confirmations");
            return Ok(());
        }

        if !PartialMerkleProof::has_expected_size(pmt) {
            return Err(BridgeError::illegal_argument(
                "partial merkle tree doesn't have the expected size",
            ));
        }
        let proof = PartialMerkleProof::parse(pmt).map_err(|e| {
            BridgeError::illegal_argument(format!("partial merkle tree could not be parsed: {}", e))
        })?;
        let merkle_root = proof
            .root_for(&txid)
            .map_err(|e| BridgeError::illegal_argument(e.to_string()))?;

        let header = self.chain.header_at_height(height).ok_or_else(|| {
            BridgeError::illegal_argument(format!("no best-chain block at height {}", height))
        })?;
        if header.merkle_root.to_byte_array() != merkle_root {
            self.raise_alert(
                AlertKind::MerkleRootMismatch,
                format!(
                    "bitcoin tx {} proves root {} but the block at {} has {}",
                    txid,
                    hex::encode(merkle_root),
                    height,
                    header.merkle_root
                ),
            );
            return Ok(());
        }

        let inputs = declared_input_count(raw_tx)
            .map_err(|e| BridgeError::illegal_argument(e.to_string()))?;
        if inputs == 0 {
            return Err(BridgeError::verification("transaction has no inputs"));
        }

        let btc_tx: Transaction = deserialize(raw_tx).map_err(|e| {
            BridgeError::illegal_argument(format!("bitcoin transaction could not be parsed: {}", e))
        })?;
        verify_structure(&btc_tx)?;

        let active = self.active_federation().clone();
        let retiring = self.retiring_federation().cloned();
        let kind = classify(
            &btc_tx,
            &active,
            retiring.as_ref(),
            self.constants.minimum_lock_tx_value,
        );
        debug!(%txid, ?kind, host_tx = %tx.hash, "Classified bitcoin transaction");

        let locked = match kind {
            TxClassification::PegIn => {
                match self.process_pegin(&btc_tx, &txid, height, &active, retiring.as_ref())? {
                    Some(locked) => locked,
                    None => return Ok(()),
                }
            }
            TxClassification::PegOut | TxClassification::Migration => true,
            TxClassification::Unrecognized => {
                self.raise_alert(
                    AlertKind::UnrecognizedTransaction,
                    format!("bitcoin tx {} is not a peg-in, a peg-out nor a migration", txid),
                );
                return Ok(());
            }
        };

        self.state.processed_txs.insert(txid, self.block.number);
        if locked {
            self.save_new_utxos(&btc_tx, height, &active, retiring.as_ref());
        }
        info!(%txid, block = self.block.number, "Bitcoin transaction processed");
        Ok(())
    }

    /// Credit or refund a peg-in; `None` when the sender cannot be identified
    fn process_pegin(
        &mut self,
        tx: &Transaction,
        txid: &Txid,
        height: u32,
        active: &Federation,
        retiring: Option<&Federation>,
    ) -> Result<Option<bool>> {
        let Some(key_bytes) = sender_key_bytes(tx) else {
            warn!(%txid, "First input does not spend a pay-to-pubkey-hash output");
            return Ok(None);
        };
        let sender = PublicKey::from_slice(&key_bytes).map_err(|e| {
            BridgeError::illegal_argument(format!("sender public key could not be parsed: {}", e))
        })?;

        let live: Vec<&Federation> = std::iter::once(active).chain(retiring).collect();
        let total: Amount = live.iter().map(|federation| value_sent_to(tx, federation)).sum();

        let whitelist_key = sender.pubkey_hash().to_raw_hash();
        let sender_script = ScriptBuf::new_p2pkh(&sender.pubkey_hash());
        let sender_address = self.describe_script(&sender_script);

        if !self
            .state
            .lock_whitelist
            .is_whitelisted_for(&whitelist_key, total, height)
        {
            let live_scripts: Vec<ScriptBuf> = live.iter().map(|f| f.p2sh_script()).collect();
            let received = Utxo::from_outputs(tx, height, |script| live_scripts.contains(script));

            let refund = ReleaseTransactionBuilder::new(
                &received,
                &live,
                active.p2sh_script(),
                self.fee_per_kb(),
                self.constants,
            )
            .build_empty_wallet_to(&sender_script);

            match refund {
                Ok(built) => {
                    log_pegin_event(
                        "pegin_refunded",
                        &txid.to_string(),
                        total.to_sat(),
                        Some(&sender_address),
                        false,
                    );
                    self.state
                        .release_transactions
                        .add(built.tx, self.block.number);
                }
                Err(e) => {
                    self.raise_alert(
                        AlertKind::RefundBuildFailed,
                        format!(
                            "refund of {} to {} for bitcoin tx {} failed: {}",
                            total, sender_address, txid, e
                        ),
                    );
                }
            }
            return Ok(Some(false));
        }

        let recipient = HostAddress::from_public_key(&sender);
        self.ledger
            .transfer(&BRIDGE_ADDRESS, &recipient, sats_to_wei(total))?;
        self.state.lock_whitelist.consume(&whitelist_key, total);

        log_pegin_event(
            "pegin_credited",
            &txid.to_string(),
            total.to_sat(),
            Some(&recipient.to_string()),
            true,
        );
        Ok(Some(true))
    }

    /// Track outputs paying the live federations, each in its own list
    fn save_new_utxos(
        &mut self,
        tx: &Transaction,
        height: u32,
        active: &Federation,
        retiring: Option<&Federation>,
    ) {
        let active_script = active.p2sh_script();
        let to_active = Utxo::from_outputs(tx, height, |script| *script == active_script);
        let mut added = utxo::add_unique(self.active_utxos_mut(), to_active);

        if let Some(retiring) = retiring {
            let retiring_script = retiring.p2sh_script();
            if retiring_script != active_script {
                let to_retiring = Utxo::from_outputs(tx, height, |script| *script == retiring_script);
                added += utxo::add_unique(&mut self.state.utxos.old_federation_utxos, to_retiring);
            }
        }

        debug!(txid = %tx.compute_txid(), added, "Saved federation UTXOs");
    }
}
