//! Federator-side signer
//!
//! Produces the per-input DER signatures a federator submits through
//! `add_signature`. Each input is signed with a legacy `SIGHASH_ALL` digest
//! over the redeem script carried in its scriptSig.

use bitcoin::secp256k1::{self, Secp256k1, SecretKey};
use bitcoin::{PublicKey, Transaction};

use super::script_sig::{legacy_sighash, redeem_script};

/// Signs release transactions on behalf of one federator
pub trait ReleaseSigner {
    /// One DER signature (without sighash byte) per input
    fn sign(&self, tx: &Transaction) -> Result<Vec<Vec<u8>>, SignerError>;

    /// The federator's BTC public key
    fn public_key(&self) -> PublicKey;

    /// Get signer type description
    fn signer_type(&self) -> &'static str;
}

/// Signer holding a single secret key in memory
pub struct SingleKeySigner {
    secret_key: SecretKey,
    secp: Secp256k1<secp256k1::All>,
}

impl SingleKeySigner {
    /// Create from secret key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignerError> {
        let secp = Secp256k1::new();
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        Ok(Self { secret_key, secp })
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(hex).map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("key must be 32 bytes".to_string()))?;
        Self::from_bytes(&arr)
    }

    /// Generate a new random signer
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        Self { secret_key, secp }
    }

    /// Get secret key hex (for backup)
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }
}

impl ReleaseSigner for SingleKeySigner {
    fn sign(&self, tx: &Transaction) -> Result<Vec<Vec<u8>>, SignerError> {
        (0..tx.input.len())
            .map(|index| {
                let redeem = redeem_script(&tx.input[index].script_sig)
                    .ok_or(SignerError::MissingRedeemScript(index))?;
                let sighash = legacy_sighash(tx, index, &redeem)
                    .ok_or(SignerError::MissingRedeemScript(index))?;

                let sig = self.secp.sign_ecdsa(&sighash, &self.secret_key);
                Ok(sig.serialize_der().to_vec())
            })
            .collect()
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::new(self.secret_key.public_key(&self.secp))
    }

    fn signer_type(&self) -> &'static str {
        "single-key"
    }
}

/// Signer errors
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("input {0} carries no redeem script")]
    MissingRedeemScript(usize),
}
