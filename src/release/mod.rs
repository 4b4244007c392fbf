//! Releases: host-chain peg-outs paid in bitcoin
//!
//! # Flow
//!
//! ```text
//! release_btc ──► ReleaseRequestQueue
//!                      │ update_collections (bounded iterations)
//!                      ▼
//!             ReleaseTransactionBuilder ──► ReleaseTransactionSet
//!                                                │ host2btc confirmations
//!                                                ▼
//!                                        PendingSignatures ◄── add_signature
//!                                                │ every slot filled
//!                                                ▼
//!                                         fully signed, ready to broadcast
//! ```

pub mod aggregator;
pub mod builder;
pub mod queue;
pub mod script_sig;
pub mod set;
pub mod signer;

pub use aggregator::{PendingSignatures, SigningOutcome};
pub use builder::{BuildError, BuildResult, ReleaseTransactionBuilder};
pub use queue::{ReleaseRequest, ReleaseRequestQueue};
pub use set::{ReleaseTransactionEntry, ReleaseTransactionSet};
pub use signer::{ReleaseSigner, SignerError, SingleKeySigner};

/// Transactions persist as consensus-encoded hex
pub(crate) mod tx_hex {
    use bitcoin::consensus::encode::{deserialize_hex, serialize_hex};
    use bitcoin::Transaction;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(tx: &Transaction, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&serialize_hex(tx))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Transaction, D::Error> {
        let s = String::deserialize(deserializer)?;
        deserialize_hex(&s).map_err(serde::de::Error::custom)
    }
}
