//! Federation Registry
//!
//! A federation is an ordered set of members whose BTC keys form a P2SH
//! multisig. Three generations can coexist: the active federation, a
//! retiring one being migrated away from, and a pending one still being
//! assembled by vote.

pub mod pending;
pub mod registry;

pub use pending::PendingFederation;
pub use registry::{FederationReference, FederationRegistry};

use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::Builder;
use bitcoin::{Address, PublicKey, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::host::HostAddress;

/// Largest multisig whose P2SH redeem script stays within the push limit
pub const MAX_FEDERATION_SIZE: usize = 15;

/// Federation errors
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("federation has no members")]
    Empty,

    #[error("federation of {0} members exceeds the maximum of {MAX_FEDERATION_SIZE}")]
    TooManyMembers(usize),

    #[error("duplicate federator key: {0}")]
    DuplicateKey(PublicKey),

    #[error("cannot derive federation address: {0}")]
    Address(String),
}

/// Which of a member's keys to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Btc,
    Host,
    Mst,
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "btc" => Ok(KeyType::Btc),
            "host" | "rsk" => Ok(KeyType::Host),
            "mst" => Ok(KeyType::Mst),
            _ => Err(format!("unknown key type: {}", s)),
        }
    }
}

/// A federator: one key per chain plus an auxiliary multisig key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationMember {
    pub btc_public_key: PublicKey,
    pub host_public_key: PublicKey,
    pub mst_public_key: PublicKey,
}

impl FederationMember {
    pub fn new(btc_public_key: PublicKey, host_public_key: PublicKey, mst_public_key: PublicKey) -> Self {
        Self {
            btc_public_key,
            host_public_key,
            mst_public_key,
        }
    }

    /// Member using the same key in every role
    pub fn from_single_key(key: PublicKey) -> Self {
        Self::new(key, key, key)
    }

    pub fn public_key(&self, kind: KeyType) -> &PublicKey {
        match kind {
            KeyType::Btc => &self.btc_public_key,
            KeyType::Host => &self.host_public_key,
            KeyType::Mst => &self.mst_public_key,
        }
    }

    /// Host-chain account this federator signs with
    pub fn host_address(&self) -> HostAddress {
        HostAddress::from_public_key(&self.host_public_key)
    }
}

/// A committed federation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Federation {
    members: Vec<FederationMember>,
    creation_time_ms: u64,
    creation_block_number: u64,
    network: bitcoin::Network,
}

impl Federation {
    /// Build a federation, ordering members by BTC key
    pub fn new(
        mut members: Vec<FederationMember>,
        creation_time_ms: u64,
        creation_block_number: u64,
        network: bitcoin::Network,
    ) -> Result<Self, FederationError> {
        if members.is_empty() {
            return Err(FederationError::Empty);
        }
        if members.len() > MAX_FEDERATION_SIZE {
            return Err(FederationError::TooManyMembers(members.len()));
        }

        members.sort_by(|a, b| a.btc_public_key.to_bytes().cmp(&b.btc_public_key.to_bytes()));
        if let Some(pair) = members
            .windows(2)
            .find(|pair| pair[0].btc_public_key == pair[1].btc_public_key)
        {
            return Err(FederationError::DuplicateKey(pair[0].btc_public_key));
        }

        Ok(Self {
            members,
            creation_time_ms,
            creation_block_number,
            network,
        })
    }

    pub fn members(&self) -> &[FederationMember] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Signatures required to spend: a strict majority
    pub fn threshold(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn creation_time_ms(&self) -> u64 {
        self.creation_time_ms
    }

    pub fn creation_block_number(&self) -> u64 {
        self.creation_block_number
    }

    pub fn btc_network(&self) -> bitcoin::Network {
        self.network
    }

    pub fn btc_public_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.members.iter().map(|m| &m.btc_public_key)
    }

    pub fn has_btc_public_key(&self, key: &PublicKey) -> bool {
        self.btc_public_keys().any(|k| k == key)
    }

    pub fn btc_public_key_index(&self, key: &PublicKey) -> Option<usize> {
        self.btc_public_keys().position(|k| k == key)
    }

    pub fn member_public_key(&self, index: usize, kind: KeyType) -> Option<&PublicKey> {
        self.members.get(index).map(|m| m.public_key(kind))
    }

    /// `OP_m <keys> OP_n OP_CHECKMULTISIG`
    pub fn redeem_script(&self) -> ScriptBuf {
        let mut builder = Builder::new().push_int(self.threshold() as i64);
        for key in self.btc_public_keys() {
            builder = builder.push_key(key);
        }
        builder
            .push_int(self.size() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
    }

    pub fn p2sh_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2sh(&self.redeem_script().script_hash())
    }

    pub fn address(&self) -> Result<Address, FederationError> {
        Address::p2sh(&self.redeem_script(), self.network)
            .map_err(|e| FederationError::Address(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    pub(crate) fn key(n: u8) -> PublicKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[n; 32]).unwrap();
        PublicKey::new(secret.public_key(&secp))
    }

    #[test]
    fn test_members_sorted_by_btc_key() {
        let members: Vec<_> = (1..=5).map(|n| FederationMember::from_single_key(key(n))).collect();
        let federation = Federation::new(members, 0, 0, bitcoin::Network::Regtest).unwrap();

        let keys: Vec<_> = federation.btc_public_keys().map(|k| k.to_bytes()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(federation.threshold(), 3);
    }

    #[test]
    fn test_member_order_does_not_change_address() {
        let forward: Vec<_> = (1..=3).map(|n| FederationMember::from_single_key(key(n))).collect();
        let mut backward = forward.clone();
        backward.reverse();

        let a = Federation::new(forward, 0, 0, bitcoin::Network::Regtest).unwrap();
        let b = Federation::new(backward, 0, 0, bitcoin::Network::Regtest).unwrap();
        assert_eq!(a.address().unwrap(), b.address().unwrap());
        assert_eq!(a.p2sh_script(), a.address().unwrap().script_pubkey());
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(
            Federation::new(vec![], 0, 0, bitcoin::Network::Regtest),
            Err(FederationError::Empty)
        ));

        let dup = vec![
            FederationMember::from_single_key(key(1)),
            FederationMember::from_single_key(key(1)),
        ];
        assert!(matches!(
            Federation::new(dup, 0, 0, bitcoin::Network::Regtest),
            Err(FederationError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_redeem_script_layout() {
        let members: Vec<_> = (1..=3).map(|n| FederationMember::from_single_key(key(n))).collect();
        let federation = Federation::new(members, 0, 0, bitcoin::Network::Regtest).unwrap();
        let script = federation.redeem_script();
        let bytes = script.as_bytes();

        // OP_2, 3 x (push33 + key), OP_3, OP_CHECKMULTISIG
        assert_eq!(bytes.len(), 1 + 3 * 34 + 1 + 1);
        assert_eq!(bytes[0], 0x52);
        assert_eq!(bytes[bytes.len() - 2], 0x53);
        assert_eq!(bytes[bytes.len() - 1], 0xae);
    }
}
