//! Release Transaction Set
//!
//! Built release transactions waiting for enough host-chain confirmations
//! before federators start signing them.

use bitcoin::Transaction;
use serde::{Deserialize, Serialize};

use super::tx_hex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTransactionEntry {
    #[serde(with = "tx_hex")]
    pub transaction: Transaction,
    /// Host block the transaction was built at
    pub block_number: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTransactionSet {
    entries: Vec<ReleaseTransactionEntry>,
}

impl ReleaseTransactionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction; re-adding one already present is a no-op
    pub fn add(&mut self, transaction: Transaction, block_number: u64) {
        let txid = transaction.compute_txid();
        if self.entries.iter().any(|e| e.transaction.compute_txid() == txid) {
            return;
        }
        self.entries.push(ReleaseTransactionEntry {
            transaction,
            block_number,
        });
    }

    pub fn entries(&self) -> &[ReleaseTransactionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return up to `max` transactions at least `min_confirmations` blocks old
    pub fn slice_with_confirmations(
        &mut self,
        current_block: u64,
        min_confirmations: u64,
        max: Option<usize>,
    ) -> Vec<Transaction> {
        let limit = max.unwrap_or(usize::MAX);
        let mut sliced = Vec::new();

        self.entries.retain(|entry| {
            let confirmed = current_block.saturating_sub(entry.block_number) >= min_confirmations
                && current_block >= entry.block_number;
            if confirmed && sliced.len() < limit {
                sliced.push(entry.transaction.clone());
                false
            } else {
                true
            }
        });

        sliced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};

    fn tx(n: u64) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(n),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn test_slice_respects_age_and_limit() {
        let mut set = ReleaseTransactionSet::new();
        set.add(tx(1), 10);
        set.add(tx(2), 11);
        set.add(tx(3), 20);

        assert!(set.slice_with_confirmations(12, 3, None).is_empty());

        let sliced = set.slice_with_confirmations(14, 3, Some(1));
        assert_eq!(sliced, vec![tx(1)]);
        assert_eq!(set.len(), 2);

        let sliced = set.slice_with_confirmations(30, 3, None);
        assert_eq!(sliced, vec![tx(2), tx(3)]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_add_ignores_duplicates() {
        let mut set = ReleaseTransactionSet::new();
        set.add(tx(1), 10);
        set.add(tx(1), 12);
        assert_eq!(set.len(), 1);
        assert_eq!(set.entries()[0].block_number, 10);
    }

    #[test]
    fn test_serializes_transactions_as_hex() {
        let mut set = ReleaseTransactionSet::new();
        set.add(tx(5), 1);

        let json = serde_json::to_value(&set).unwrap();
        assert!(json["entries"][0]["transaction"].is_string());
        let back: ReleaseTransactionSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }
}
