//! fedpeg - Federated Bitcoin Peg Core
//!
//! Consensus-critical decision logic for a custodial bridge between Bitcoin
//! and an account-based host chain, operated by a federation of signers.
//!
//! ## Components
//!
//! 1. **Peg-in validation** - SPV proof checks, classification and crediting
//! 2. **Release building** - coin selection, fees, dust handling and burns
//! 3. **Signature aggregation** - multisig slots filled by federators
//! 4. **Migration** - sweeping a retiring federation into the active one
//! 5. **Elections** - N-of-M voting for federation changes and fee updates
//!
//! Every operation runs synchronously against an explicit [`BridgeState`],
//! loaded from and flushed to a [`storage::BridgeStore`] once per invocation.

pub mod bridge;
pub mod btc_spv;
pub mod common;
pub mod election;
pub mod federation;
pub mod host;
pub mod migration;
pub mod pegin;
pub mod release;
pub mod storage;
pub mod utxo;
pub mod whitelist;

// Re-exports: Bridge facade
pub use bridge::{codes, BridgeSupport};

// Re-exports: Common infrastructure
pub use common::{
    Alert, AlertKind, BridgeConstants, BridgeError, ConfigError, FedpegConfig, Network, Result,
};

// Re-exports: Bitcoin SPV
pub use btc_spv::{BtcChain, ChainError, MemoryBtcChain, MerkleBranch, PartialMerkleProof, SpvError};

// Re-exports: Federation registry and elections
pub use election::{AbiCallElection, AbiCallSpec, AddressBasedAuthorizer, AuthorizerPolicy};
pub use federation::{
    Federation, FederationError, FederationMember, FederationReference, FederationRegistry,
    KeyType, PendingFederation,
};

// Re-exports: Host chain
pub use host::{
    ExecutionBlock, HostAddress, HostLedger, HostTransaction, HostTxHash, LedgerError,
    MemoryLedger, BRIDGE_ADDRESS, BURN_ADDRESS,
};

// Re-exports: Releases
pub use release::{
    BuildError, BuildResult, PendingSignatures, ReleaseRequest, ReleaseRequestQueue,
    ReleaseSigner, ReleaseTransactionBuilder, ReleaseTransactionSet, SigningOutcome,
    SingleKeySigner,
};

// Re-exports: State and storage
pub use storage::{BridgeState, BridgeStore, MemoryStore, SqliteStore, StorageError};
pub use utxo::{Utxo, UtxoLedger};
pub use whitelist::{LockWhitelist, LockWhitelistEntry, WhitelistEntryKind, WhitelistError};

/// Satoshi and host-chain unit conversion helpers
pub mod units {
    use bitcoin::Amount;

    pub const SATS_PER_BTC: u64 = 100_000_000;

    /// Host-chain base units per satoshi (18 host decimals vs 8 BTC decimals)
    pub const WEI_PER_SAT: u128 = 10_000_000_000;

    pub fn sats_to_btc(sats: u64) -> f64 {
        sats as f64 / SATS_PER_BTC as f64
    }

    /// Host-chain value equivalent to a bitcoin amount
    pub fn sats_to_wei(amount: Amount) -> u128 {
        amount.to_sat() as u128 * WEI_PER_SAT
    }

    /// Bitcoin amount for a host-chain value, truncating sub-satoshi dust
    pub fn wei_to_sats(wei: u128) -> Amount {
        let sats = wei / WEI_PER_SAT;
        Amount::from_sat(u64::try_from(sats).unwrap_or(u64::MAX))
    }

    pub fn format_sats(sats: u64) -> String {
        let btc = sats_to_btc(sats);
        format!("{} sats ({:.8} BTC)", sats, btc)
    }

}
