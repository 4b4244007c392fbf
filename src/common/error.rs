//! Common Error Types for the bridge core
//!
//! Soft rejections never reach this type: they are logged and turned into
//! no-ops or negative status codes. What remains are caller errors (the
//! invocation is rejected and its state changes discarded) and
//! infrastructure failures.

use thiserror::Error;

use crate::btc_spv::{ChainError, SpvError};
use crate::federation::FederationError;
use crate::host::LedgerError;
use crate::release::BuildError;
use crate::storage::StorageError;

/// Root error type for the bridge core
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Malformed input supplied by the caller
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Bitcoin transaction failed structural verification
    #[error("verification failed: {0}")]
    Verification(String),

    /// Releases cannot be requested by contracts
    #[error("contract {0} cannot request a release")]
    ContractCaller(String),

    /// SPV proof errors
    #[error("spv error: {0}")]
    Spv(#[from] SpvError),

    /// Header chain errors
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Federation derivation errors
    #[error("federation error: {0}")]
    Federation(#[from] FederationError),

    /// Release building errors
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Host ledger errors
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Create an illegal argument error
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    /// Create a verification error
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller supplied bad input, as opposed to an infrastructure failure
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            BridgeError::IllegalArgument(_)
                | BridgeError::Verification(_)
                | BridgeError::ContractCaller(_)
                | BridgeError::Spv(_)
        )
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Storage(StorageError::Connection(_)))
    }

    /// Get error code for callers
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Logging(_) => "LOGGING_ERROR",
            BridgeError::IllegalArgument(_) => "ILLEGAL_ARGUMENT",
            BridgeError::Verification(_) => "VERIFICATION_ERROR",
            BridgeError::ContractCaller(_) => "CONTRACT_CALLER",
            BridgeError::Spv(_) => "SPV_ERROR",
            BridgeError::Chain(_) => "CHAIN_ERROR",
            BridgeError::Federation(_) => "FEDERATION_ERROR",
            BridgeError::Build(_) => "BUILD_ERROR",
            BridgeError::Ledger(_) => "LEDGER_ERROR",
            BridgeError::Storage(_) => "STORAGE_ERROR",
            BridgeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BridgeError::illegal_argument("pmt too short");
        assert!(err.to_string().contains("pmt too short"));
        assert_eq!(err.error_code(), "ILLEGAL_ARGUMENT");
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BridgeError::Storage(StorageError::Connection("pool".into())).is_retryable());
        assert!(!BridgeError::Storage(StorageError::InvalidData("version".into())).is_retryable());
        assert!(!BridgeError::verification("no inputs").is_retryable());
    }
}
