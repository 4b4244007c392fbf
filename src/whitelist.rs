//! Lock Whitelist
//!
//! Only whitelisted senders may lock bitcoin. A one-off entry allows a fixed
//! number of locks up to a maximum value each; an unlimited entry allows any
//! number of locks, optionally bounded by a cumulative capacity. Past the
//! disable height every sender is accepted.

use bitcoin::hashes::{hash160, Hash};
use bitcoin::{Address, Amount, Network};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WhitelistError {
    #[error("address already whitelisted: {0}")]
    AlreadyExists(String),

    #[error("address not whitelisted: {0}")]
    NotFound(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("disable block height already set")]
    DisableHeightAlreadySet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WhitelistEntryKind {
    OneOff {
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        max_transfer_value: Amount,
        remaining_uses: u32,
    },
    Unlimited {
        #[serde(with = "bitcoin::amount::serde::as_sat::opt", default)]
        remaining_capacity: Option<Amount>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockWhitelistEntry {
    /// Address as given when the entry was added
    pub address: String,
    #[serde(flatten)]
    pub kind: WhitelistEntryKind,
}

impl LockWhitelistEntry {
    pub fn one_off(address: impl Into<String>, max_transfer_value: Amount, uses: u32) -> Self {
        Self {
            address: address.into(),
            kind: WhitelistEntryKind::OneOff {
                max_transfer_value,
                remaining_uses: uses,
            },
        }
    }

    pub fn unlimited(address: impl Into<String>, capacity: Option<Amount>) -> Self {
        Self {
            address: address.into(),
            kind: WhitelistEntryKind::Unlimited {
                remaining_capacity: capacity,
            },
        }
    }

    pub fn can_lock(&self, amount: Amount) -> bool {
        match self.kind {
            WhitelistEntryKind::OneOff {
                max_transfer_value,
                remaining_uses,
            } => remaining_uses > 0 && amount <= max_transfer_value,
            WhitelistEntryKind::Unlimited { remaining_capacity } => {
                remaining_capacity.map_or(true, |cap| amount <= cap)
            }
        }
    }

    /// Account for a lock; true when the entry is used up
    fn consume(&mut self, amount: Amount) -> bool {
        match &mut self.kind {
            WhitelistEntryKind::OneOff { remaining_uses, .. } => {
                *remaining_uses = remaining_uses.saturating_sub(1);
                *remaining_uses == 0
            }
            WhitelistEntryKind::Unlimited { remaining_capacity } => {
                if let Some(cap) = remaining_capacity {
                    *cap = cap.checked_sub(amount).unwrap_or(Amount::ZERO);
                }
                false
            }
        }
    }
}

/// Whitelist entries keyed by the address's hash160
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockWhitelist {
    entries: BTreeMap<hash160::Hash, LockWhitelistEntry>,
    disable_block_height: Option<u32>,
}

impl LockWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a base58 address of the given network into its whitelist key
    pub fn address_key(address: &str, network: Network) -> Result<hash160::Hash, WhitelistError> {
        let parsed = Address::from_str(address)
            .map_err(|e| WhitelistError::InvalidAddress(e.to_string()))?
            .require_network(network)
            .map_err(|e| WhitelistError::InvalidAddress(e.to_string()))?;

        Self::script_key(&parsed)
            .ok_or_else(|| WhitelistError::InvalidAddress(format!("{} is not p2pkh or p2sh", address)))
    }

    /// Hash160 carried by a P2PKH or P2SH address
    pub fn script_key(address: &Address) -> Option<hash160::Hash> {
        let script = address.script_pubkey();
        let bytes = script.as_bytes();
        let hash = if script.is_p2pkh() {
            &bytes[3..23]
        } else if script.is_p2sh() {
            &bytes[2..22]
        } else {
            return None;
        };
        hash160::Hash::from_slice(hash).ok()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &hash160::Hash) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &hash160::Hash) -> Option<&LockWhitelistEntry> {
        self.entries.get(key)
    }

    /// Entry at a position of the key order
    pub fn get_by_index(&self, index: usize) -> Option<&LockWhitelistEntry> {
        self.entries.values().nth(index)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&hash160::Hash, &LockWhitelistEntry)> {
        self.entries.iter()
    }

    pub fn put(&mut self, key: hash160::Hash, entry: LockWhitelistEntry) -> Result<(), WhitelistError> {
        if self.entries.contains_key(&key) {
            return Err(WhitelistError::AlreadyExists(entry.address));
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn remove(&mut self, key: &hash160::Hash) -> Result<LockWhitelistEntry, WhitelistError> {
        self.entries
            .remove(key)
            .ok_or_else(|| WhitelistError::NotFound(key.to_string()))
    }

    pub fn is_whitelisted_for(&self, key: &hash160::Hash, amount: Amount, height: u32) -> bool {
        if self.disable_block_height.map_or(false, |disable| height > disable) {
            return true;
        }
        self.entries.get(key).map_or(false, |entry| entry.can_lock(amount))
    }

    /// Charge a lock against the sender's entry, dropping exhausted one-off entries
    pub fn consume(&mut self, key: &hash160::Hash, amount: Amount) {
        let exhausted = match self.entries.get_mut(key) {
            Some(entry) => entry.consume(amount),
            None => return,
        };
        if exhausted {
            self.entries.remove(key);
        }
    }

    pub fn disable_block_height(&self) -> Option<u32> {
        self.disable_block_height
    }

    pub fn set_disable_block_height(&mut self, height: u32) -> Result<(), WhitelistError> {
        if self.disable_block_height.is_some() {
            return Err(WhitelistError::DisableHeightAlreadySet);
        }
        self.disable_block_height = Some(height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{CompressedPublicKey, PublicKey, ScriptBuf};

    fn key(n: u8) -> hash160::Hash {
        hash160::Hash::from_byte_array([n; 20])
    }

    fn public_key() -> PublicKey {
        let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        PublicKey::new(secret.public_key(&Secp256k1::new()))
    }

    #[test]
    fn test_address_key_p2pkh_and_p2sh() {
        let pubkey = public_key();
        let p2pkh = Address::p2pkh(pubkey, Network::Regtest).to_string();
        assert_eq!(
            LockWhitelist::address_key(&p2pkh, Network::Regtest).unwrap().to_byte_array(),
            pubkey.pubkey_hash().to_byte_array()
        );

        let redeem = ScriptBuf::from_bytes(vec![0x51]);
        let p2sh = Address::p2sh(&redeem, Network::Regtest).unwrap().to_string();
        assert_eq!(
            LockWhitelist::address_key(&p2sh, Network::Regtest).unwrap().to_byte_array(),
            redeem.script_hash().to_byte_array()
        );
    }

    #[test]
    fn test_address_key_rejects_other_formats() {
        let pubkey = public_key();
        assert!(matches!(
            LockWhitelist::address_key("not-an-address", Network::Regtest),
            Err(WhitelistError::InvalidAddress(_))
        ));

        let mainnet = Address::p2pkh(pubkey, Network::Bitcoin).to_string();
        assert!(matches!(
            LockWhitelist::address_key(&mainnet, Network::Regtest),
            Err(WhitelistError::InvalidAddress(_))
        ));

        let compressed = CompressedPublicKey::try_from(pubkey).unwrap();
        let segwit = Address::p2wpkh(&compressed, Network::Regtest).to_string();
        assert!(matches!(
            LockWhitelist::address_key(&segwit, Network::Regtest),
            Err(WhitelistError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_one_off_entry_removed_after_last_use() {
        let mut whitelist = LockWhitelist::new();
        whitelist
            .put(key(1), LockWhitelistEntry::one_off("a", Amount::from_sat(1_000), 1))
            .unwrap();

        assert!(whitelist.is_whitelisted_for(&key(1), Amount::from_sat(1_000), 0));
        assert!(!whitelist.is_whitelisted_for(&key(1), Amount::from_sat(1_001), 0));

        whitelist.consume(&key(1), Amount::from_sat(1_000));
        assert_eq!(whitelist.size(), 0);
        assert!(!whitelist.is_whitelisted_for(&key(1), Amount::from_sat(1), 0));
    }

    #[test]
    fn test_capped_unlimited_entry_shrinks() {
        let mut whitelist = LockWhitelist::new();
        whitelist
            .put(key(2), LockWhitelistEntry::unlimited("b", Some(Amount::from_btc(5.0).unwrap())))
            .unwrap();

        let three = Amount::from_btc(3.0).unwrap();
        assert!(whitelist.is_whitelisted_for(&key(2), three, 0));
        whitelist.consume(&key(2), three);

        assert!(!whitelist.is_whitelisted_for(&key(2), three, 0));
        assert!(whitelist.is_whitelisted_for(&key(2), Amount::from_btc(2.0).unwrap(), 0));
        assert!(whitelist.contains(&key(2)));
    }

    #[test]
    fn test_put_and_remove() {
        let mut whitelist = LockWhitelist::new();
        whitelist.put(key(1), LockWhitelistEntry::unlimited("a", None)).unwrap();
        assert!(matches!(
            whitelist.put(key(1), LockWhitelistEntry::unlimited("a", None)),
            Err(WhitelistError::AlreadyExists(_))
        ));

        whitelist.remove(&key(1)).unwrap();
        assert!(matches!(whitelist.remove(&key(1)), Err(WhitelistError::NotFound(_))));
    }

    #[test]
    fn test_disable_height_opens_whitelist_once() {
        let mut whitelist = LockWhitelist::new();
        whitelist.set_disable_block_height(100).unwrap();

        assert!(!whitelist.is_whitelisted_for(&key(3), Amount::from_sat(1), 100));
        assert!(whitelist.is_whitelisted_for(&key(3), Amount::from_sat(1), 101));
        assert_eq!(
            whitelist.set_disable_block_height(200),
            Err(WhitelistError::DisableHeightAlreadySet)
        );
    }

    #[test]
    fn test_index_follows_key_order() {
        let mut whitelist = LockWhitelist::new();
        whitelist.put(key(9), LockWhitelistEntry::unlimited("z", None)).unwrap();
        whitelist.put(key(1), LockWhitelistEntry::unlimited("a", None)).unwrap();

        assert_eq!(whitelist.get_by_index(0).unwrap().address, "a");
        assert_eq!(whitelist.get_by_index(1).unwrap().address, "z");
        assert!(whitelist.get_by_index(2).is_none());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut whitelist = LockWhitelist::new();
        whitelist
            .put(key(1), LockWhitelistEntry::one_off("a", Amount::from_sat(7), 2))
            .unwrap();
        whitelist
            .put(key(2), LockWhitelistEntry::unlimited("b", Some(Amount::from_sat(9))))
            .unwrap();
        whitelist.set_disable_block_height(5).unwrap();

        let json = serde_json::to_string(&whitelist).unwrap();
        let back: LockWhitelist = serde_json::from_str(&json).unwrap();
        assert_eq!(back, whitelist);
    }
}
