//! Release Transaction Builder
//!
//! Builds unsigned P2SH multisig spends of federation UTXOs. Recipients pay
//! the fee, estimated from the serialized size with every signature slot
//! reserved.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use tracing::{debug, warn};

use super::script_sig::{placeholder_script_sig, SIGNATURE_SIZE_ESTIMATE};
use crate::common::BridgeConstants;
use crate::federation::Federation;
use crate::utxo::{self, Utxo};

/// Builder errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("insufficient money: need {required}, have {available}")]
    InsufficientMoney { required: Amount, available: Amount },

    #[error("could not adjust outputs above the dust threshold")]
    CouldNotAdjustDownwards,

    #[error("transaction of {size} bytes exceeds the maximum of {max}")]
    ExceededMaxTransactionSize { size: usize, max: usize },

    #[error("resulting output would be dust")]
    Dusty,

    #[error("migration not possible after {0} attempts")]
    MigrationExhausted(usize),

    #[error("fee for {size} bytes at {fee_per_kb} per kb overflows")]
    FeeOverflow { size: usize, fee_per_kb: Amount },
}

impl BuildError {
    /// Errors a smaller migration target may get past
    fn is_shrinkable(&self) -> bool {
        matches!(
            self,
            BuildError::InsufficientMoney { .. }
                | BuildError::ExceededMaxTransactionSize { .. }
                | BuildError::CouldNotAdjustDownwards
        )
    }
}

/// A built transaction with the UTXOs it spends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub tx: Transaction,
    pub selected_utxos: Vec<Utxo>,
    pub fee: Amount,
}

impl BuildResult {
    pub fn total_input(&self) -> Amount {
        utxo::total(&self.selected_utxos)
    }
}

/// A UTXO together with the federation able to spend it
struct Spendable<'a> {
    utxo: &'a Utxo,
    federation: &'a Federation,
}

pub struct ReleaseTransactionBuilder<'a> {
    spendable: Vec<Spendable<'a>>,
    change_script: ScriptBuf,
    fee_per_kb: Amount,
    min_nondust_output: Amount,
    max_transaction_size: usize,
    max_migration_iterations: usize,
}

impl<'a> ReleaseTransactionBuilder<'a> {
    /// Builder over a wallet of UTXOs owned by `federations`, sending change to `change_script`
    pub fn new(
        utxos: &'a [Utxo],
        federations: &[&'a Federation],
        change_script: ScriptBuf,
        fee_per_kb: Amount,
        constants: &BridgeConstants,
    ) -> Self {
        let mut spendable: Vec<Spendable<'a>> = utxos
            .iter()
            .filter_map(|utxo| {
                let owner = federations
                    .iter()
                    .copied()
                    .find(|f| f.p2sh_script() == utxo.script_pubkey);
                if owner.is_none() {
                    warn!(
                        txid = %utxo.txid,
                        vout = utxo.vout,
                        "UTXO not owned by any live federation, skipping"
                    );
                }
                owner.map(|federation| Spendable { utxo, federation })
            })
            .collect();

        // Largest first, ties broken by outpoint
        spendable.sort_by(|a, b| {
            b.utxo
                .value
                .cmp(&a.utxo.value)
                .then_with(|| a.utxo.txid.cmp(&b.utxo.txid))
                .then_with(|| a.utxo.vout.cmp(&b.utxo.vout))
        });

        Self {
            spendable,
            change_script,
            fee_per_kb,
            min_nondust_output: constants.min_nondust_output,
            max_transaction_size: constants.max_transaction_size,
            max_migration_iterations: constants.max_migration_iterations,
        }
    }

    pub fn balance(&self) -> Amount {
        self.spendable.iter().map(|s| s.utxo.value).sum()
    }

    /// Pay `amount` minus fees to `destination`, returning change to the federation
    pub fn build_amount_to(
        &self,
        destination: &ScriptBuf,
        amount: Amount,
    ) -> Result<BuildResult, BuildError> {
        self.build_to(destination, amount, &self.change_script)
    }

    /// Spend every UTXO into a single output
    pub fn build_empty_wallet_to(&self, destination: &ScriptBuf) -> Result<BuildResult, BuildError> {
        let balance = self.balance();
        if self.spendable.is_empty() {
            return Err(BuildError::InsufficientMoney {
                required: self.min_nondust_output,
                available: balance,
            });
        }

        let selected: Vec<&Spendable> = self.spendable.iter().collect();
        let mut tx = unsigned_tx(&selected, vec![output(destination, balance)]);
        let fee = self.fee_for(&tx, &selected)?;

        let value = balance.checked_sub(fee).unwrap_or(Amount::ZERO);
        if value < self.min_nondust_output {
            return Err(BuildError::Dusty);
        }
        tx.output[0].value = value;

        Ok(result(tx, &selected, fee))
    }

    /// Move as much of the wallet as possible to `destination`, halving on failure
    pub fn build_migration(
        &self,
        destination: &ScriptBuf,
        balance: Amount,
    ) -> Result<BuildResult, BuildError> {
        let mut target = balance;

        for attempt in 0..self.max_migration_iterations {
            if target < self.min_nondust_output {
                return Err(BuildError::Dusty);
            }

            match self.build_to(destination, target, destination) {
                Ok(built) => return Ok(built),
                Err(e) if e.is_shrinkable() => {
                    debug!(attempt, target = target.to_sat(), error = %e, "Migration attempt failed, halving");
                    target = Amount::from_sat(target.to_sat() / 2);
                }
                Err(e) => return Err(e),
            }
        }

        Err(BuildError::MigrationExhausted(self.max_migration_iterations))
    }

    fn build_to(
        &self,
        destination: &ScriptBuf,
        amount: Amount,
        change_script: &ScriptBuf,
    ) -> Result<BuildResult, BuildError> {
        let mut selected: Vec<&Spendable> = Vec::new();
        let mut gathered = Amount::ZERO;
        for candidate in &self.spendable {
            if gathered >= amount {
                break;
            }
            gathered += candidate.utxo.value;
            selected.push(candidate);
        }

        if gathered < amount || selected.is_empty() {
            return Err(BuildError::InsufficientMoney {
                required: amount,
                available: gathered,
            });
        }

        let mut change = gathered - amount;
        let mut outputs = vec![output(destination, amount)];
        if change > Amount::ZERO {
            outputs.push(output(change_script, change));
        }

        let mut tx = unsigned_tx(&selected, outputs);
        let fee = self.fee_for(&tx, &selected)?;

        let mut recipient = amount
            .checked_sub(fee)
            .ok_or(BuildError::CouldNotAdjustDownwards)?;

        // Dust change is topped up out of the recipient's share
        if change > Amount::ZERO && change < self.min_nondust_output {
            let bump = self.min_nondust_output - change;
            recipient = recipient
                .checked_sub(bump)
                .ok_or(BuildError::CouldNotAdjustDownwards)?;
            change = self.min_nondust_output;
        }

        if recipient < self.min_nondust_output {
            return Err(BuildError::CouldNotAdjustDownwards);
        }

        tx.output[0].value = recipient;
        if let Some(change_output) = tx.output.get_mut(1) {
            change_output.value = change;
        }

        Ok(result(tx, &selected, fee))
    }

    /// Fee for the signed size, checking it against the relay limit
    fn fee_for(&self, tx: &Transaction, selected: &[&Spendable]) -> Result<Amount, BuildError> {
        let signatures: usize = selected.iter().map(|s| s.federation.threshold()).sum();
        let size = serialize(tx).len() + signatures * SIGNATURE_SIZE_ESTIMATE;

        if size > self.max_transaction_size {
            return Err(BuildError::ExceededMaxTransactionSize {
                size,
                max: self.max_transaction_size,
            });
        }

        (size as u64)
            .checked_mul(self.fee_per_kb.to_sat())
            .map(|fee| Amount::from_sat(fee / 1000))
            .ok_or(BuildError::FeeOverflow {
                size,
                fee_per_kb: self.fee_per_kb,
            })
    }
}

fn output(script: &ScriptBuf, value: Amount) -> TxOut {
    TxOut {
        value,
        script_pubkey: script.clone(),
    }
}

fn unsigned_tx(selected: &[&Spendable], output: Vec<TxOut>) -> Transaction {
    let input = selected
        .iter()
        .map(|s| TxIn {
            previous_output: s.utxo.outpoint(),
            script_sig: placeholder_script_sig(&s.federation.redeem_script(), s.federation.threshold()),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        })
        .collect();

    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

fn result(tx: Transaction, selected: &[&Spendable], fee: Amount) -> BuildResult {
    BuildResult {
        tx,
        selected_utxos: selected.iter().map(|s| s.utxo.clone()).collect(),
        fee,
    }
}
