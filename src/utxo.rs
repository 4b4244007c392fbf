//! Federation UTXO ledger
//!
//! Outputs the bridge can spend, split by federation slot. A UTXO sits in
//! exactly one list and leaves it in the same invocation that builds the
//! transaction spending it.

use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    pub height: u32,
    pub is_coinbase: bool,
    pub script_pubkey: ScriptBuf,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }

    /// Outputs of `tx` whose script satisfies `pays`
    pub fn from_outputs(
        tx: &Transaction,
        height: u32,
        mut pays: impl FnMut(&ScriptBuf) -> bool,
    ) -> Vec<Utxo> {
        let txid = tx.compute_txid();
        tx.output
            .iter()
            .enumerate()
            .filter(|(_, out)| pays(&out.script_pubkey))
            .map(|(vout, out)| Utxo {
                txid,
                vout: vout as u32,
                value: out.value,
                height,
                is_coinbase: tx.is_coinbase(),
                script_pubkey: out.script_pubkey.clone(),
            })
            .collect()
    }
}

/// Sum of UTXO values
pub fn total(utxos: &[Utxo]) -> Amount {
    utxos.iter().map(|u| u.value).sum()
}

/// Drop every UTXO spent by one of the transaction's inputs
pub fn remove_spent(utxos: &mut Vec<Utxo>, tx: &Transaction) -> usize {
    let before = utxos.len();
    utxos.retain(|u| !tx.input.iter().any(|i| i.previous_output == u.outpoint()));
    before - utxos.len()
}

/// Append UTXOs whose outpoint is not yet tracked
pub fn add_unique(utxos: &mut Vec<Utxo>, incoming: Vec<Utxo>) -> usize {
    let mut added = 0;
    for utxo in incoming {
        if !utxos.iter().any(|u| u.outpoint() == utxo.outpoint()) {
            utxos.push(utxo);
            added += 1;
        }
    }
    added
}

/// UTXO lists following the federation slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoLedger {
    pub new_federation_utxos: Vec<Utxo>,
    pub old_federation_utxos: Vec<Utxo>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_new(&self) -> Amount {
        total(&self.new_federation_utxos)
    }

    pub fn total_old(&self) -> Amount {
        total(&self.old_federation_utxos)
    }
}
