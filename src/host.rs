//! Host Chain Primitives
//!
//! The account-based chain the bridge lives on is an external collaborator.
//! The core only needs its addresses, the calling transaction, the executing
//! block and a ledger able to move balances.

use bitcoin::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Address of the bridge contract, which holds every locked host-chain balance
pub const BRIDGE_ADDRESS: HostAddress = HostAddress([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x00, 0x00, 0x06,
]);

/// Unspendable sink for value the federation no longer backs
pub const BURN_ADDRESS: HostAddress = HostAddress([0u8; 20]);

/// 20-byte host-chain account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostAddress(pub [u8; 20]);

impl HostAddress {
    /// Address controlled by a secp256k1 key: last 20 bytes of keccak256(uncompressed point)
    pub fn from_public_key(key: &PublicKey) -> Self {
        let uncompressed = key.inner.serialize_uncompressed();
        let digest = Keccak256::digest(&uncompressed[1..]);

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for HostAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// 32-byte host-chain transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostTxHash(pub [u8; 32]);

impl fmt::Display for HostTxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for HostTxHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

// Both hashes persist as hex strings so they can key JSON maps.
macro_rules! impl_hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_hex_serde!(HostAddress);
impl_hex_serde!(HostTxHash);

/// The host-chain transaction invoking the bridge
#[derive(Debug, Clone)]
pub struct HostTransaction {
    pub hash: HostTxHash,
    pub sender: HostAddress,
    /// Public key recovered from the transaction signature, if any
    pub sender_public_key: Option<PublicKey>,
    /// Value transferred to the bridge, in host base units
    pub value: u128,
    /// Whether the call came from a contract rather than a signed transaction
    pub from_contract: bool,
}

impl HostTransaction {
    /// A plain signed transaction sent by the holder of `key`
    pub fn signed_by(hash: HostTxHash, key: PublicKey, value: u128) -> Self {
        Self {
            hash,
            sender: HostAddress::from_public_key(&key),
            sender_public_key: Some(key),
            value,
            from_contract: false,
        }
    }
}

/// The host-chain block executing the current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionBlock {
    pub number: u64,
    pub timestamp_ms: u64,
}

/// Host ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance in {address}: need {required}, have {available}")]
    InsufficientBalance {
        address: HostAddress,
        required: u128,
        available: u128,
    },

    #[error("balance overflow for {0}")]
    Overflow(HostAddress),
}

/// Balance movements the bridge performs on the host chain
pub trait HostLedger {
    /// Current balance of an address
    fn balance(&self, address: &HostAddress) -> u128;

    /// Move value between two accounts
    fn transfer(
        &mut self,
        from: &HostAddress,
        to: &HostAddress,
        amount: u128,
    ) -> Result<(), LedgerError>;
}

/// In-memory ledger for tests and tooling
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    balances: BTreeMap<HostAddress, u128>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a balance out of thin air
    pub fn credit(&mut self, address: HostAddress, amount: u128) {
        *self.balances.entry(address).or_insert(0) += amount;
    }
}

impl HostLedger for MemoryLedger {
    fn balance(&self, address: &HostAddress) -> u128 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    fn transfer(
        &mut self,
        from: &HostAddress,
        to: &HostAddress,
        amount: u128,
    ) -> Result<(), LedgerError> {
        let available = self.balance(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                address: *from,
                required: amount,
                available,
            });
        }

        let target = self.balance(to);
        if from != to {
            let credited = target.checked_add(amount).ok_or(LedgerError::Overflow(*to))?;
            self.balances.insert(*from, available - amount);
            self.balances.insert(*to, credited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_generator_key() {
        // Private key 1 controls the well-known address 0x7e5f...bdf
        let key = PublicKey::from_str(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        assert_eq!(
            HostAddress::from_public_key(&key).to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_address_parse_roundtrip() {
        let address: HostAddress = "0x0000000000000000000000000000000001000006".parse().unwrap();
        assert_eq!(address, BRIDGE_ADDRESS);
        assert!("0x1234".parse::<HostAddress>().is_err());
    }

    #[test]
    fn test_ledger_transfer() {
        let mut ledger = MemoryLedger::new();
        let user = HostAddress([7u8; 20]);
        ledger.credit(BRIDGE_ADDRESS, 100);

        ledger.transfer(&BRIDGE_ADDRESS, &user, 60).unwrap();
        assert_eq!(ledger.balance(&user), 60);
        assert_eq!(ledger.balance(&BRIDGE_ADDRESS), 40);

        let err = ledger.transfer(&BRIDGE_ADDRESS, &user, 41).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_hash_serializes_as_hex_string() {
        let hash = HostTxHash([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: HostTxHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
