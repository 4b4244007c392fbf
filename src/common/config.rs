//! Bridge Constants and Environment-based Configuration
//!
//! Per-network presets mirror the parameters every node must agree on:
//! confirmation depths, minimum values, federation ages and the authorizer
//! sets allowed to vote. Operators override them through environment
//! variables (a `.env` file is honoured).
//!
//! # Environment Variables
//!
//! ## Network
//! - `FEDPEG_NETWORK` - "mainnet", "testnet" or "regtest" (default: "regtest")
//!
//! ## Genesis Federation
//! - `FEDPEG_GENESIS_FEDERATION_KEYS` - Comma-separated hex compressed public keys
//! - `FEDPEG_GENESIS_FEDERATION_CREATION_TIME_MS` - Creation timestamp (default: 0)
//!
//! ## Authorizers
//! - `FEDPEG_FEDERATION_CHANGE_AUTHORIZERS` - Comma-separated hex host addresses
//! - `FEDPEG_FEE_PER_KB_AUTHORIZERS` - Comma-separated hex host addresses
//! - `FEDPEG_LOCK_WHITELIST_AUTHORIZERS` - Comma-separated hex host addresses
//!
//! ## Optional Overrides
//! - `FEDPEG_BTC2HOST_MIN_CONFIRMATIONS`
//! - `FEDPEG_HOST2BTC_MIN_CONFIRMATIONS`
//! - `FEDPEG_GENESIS_FEE_PER_KB_SATS`
//! - `FEDPEG_DB_PATH` - SQLite state file (default: "fedpeg-state.db")
//! - `FEDPEG_LOG_LEVEL` - Logging level (debug, info, warn, error)
//! - `FEDPEG_JSON_LOGS` - Set to "1" for JSON log output

use bitcoin::{Amount, PublicKey};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::election::{AddressBasedAuthorizer, AuthorizerPolicy};
use crate::federation::{Federation, FederationMember};
use crate::host::HostAddress;

/// Well-known keys (generator multiples 1, 2 and 3) used as the regtest genesis federation
const REGTEST_GENESIS_KEYS: [&str; 3] = [
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
    "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5",
    "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9",
];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("network mismatch: expected {0}, got {1}")]
    NetworkMismatch(String, String),

    #[error("invalid genesis federation: {0}")]
    InvalidGenesisFederation(String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" | "reg" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "FEDPEG_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Get bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Consensus parameters of the bridge
#[derive(Debug, Clone)]
pub struct BridgeConstants {
    pub network: Network,
    pub genesis_federation: Federation,
    /// Bitcoin confirmations required before a peg-in is accepted
    pub btc2host_min_confirmations: u32,
    /// Host blocks a release transaction waits before collecting signatures
    pub host2btc_min_confirmations: u64,
    pub minimum_lock_tx_value: Amount,
    pub minimum_release_tx_value: Amount,
    pub genesis_fee_per_kb: Amount,
    /// Smallest output the bitcoin network relays
    pub min_nondust_output: Amount,
    pub max_transaction_size: usize,
    /// Host blocks after commit before a new federation becomes active
    pub federation_activation_age: u64,
    pub funds_migration_age_since_activation_begin: u64,
    pub funds_migration_age_since_activation_end: u64,
    pub min_pending_federation_size: usize,
    pub max_release_iterations: usize,
    pub max_migration_iterations: usize,
    pub federation_change_authorizer: AddressBasedAuthorizer,
    pub fee_per_kb_change_authorizer: AddressBasedAuthorizer,
    pub lock_whitelist_change_authorizer: AddressBasedAuthorizer,
}

impl BridgeConstants {
    /// Presets for a network, with empty authorizer sets
    pub fn new(network: Network, genesis_federation: Federation) -> Self {
        let base = Self {
            network,
            genesis_federation,
            btc2host_min_confirmations: 100,
            host2btc_min_confirmations: 4000,
            minimum_lock_tx_value: Amount::from_sat(1_000_000),
            minimum_release_tx_value: Amount::from_sat(800_000),
            genesis_fee_per_kb: Amount::from_sat(50_000),
            min_nondust_output: Amount::from_sat(546),
            max_transaction_size: 100_000,
            federation_activation_age: 18_500,
            funds_migration_age_since_activation_begin: 0,
            funds_migration_age_since_activation_end: 10_585,
            min_pending_federation_size: 2,
            max_release_iterations: 30,
            max_migration_iterations: 20,
            federation_change_authorizer: AddressBasedAuthorizer::new(
                Vec::new(),
                AuthorizerPolicy::Majority,
            ),
            fee_per_kb_change_authorizer: AddressBasedAuthorizer::new(
                Vec::new(),
                AuthorizerPolicy::Majority,
            ),
            lock_whitelist_change_authorizer: AddressBasedAuthorizer::new(
                Vec::new(),
                AuthorizerPolicy::One,
            ),
        };

        match network {
            Network::Mainnet => base,
            Network::Testnet => Self {
                btc2host_min_confirmations: 10,
                host2btc_min_confirmations: 10,
                federation_activation_age: 60,
                funds_migration_age_since_activation_begin: 60,
                funds_migration_age_since_activation_end: 900,
                ..base
            },
            Network::Regtest => Self {
                btc2host_min_confirmations: 3,
                host2btc_min_confirmations: 3,
                minimum_lock_tx_value: Amount::from_sat(500_000),
                minimum_release_tx_value: Amount::from_sat(250_000),
                genesis_fee_per_kb: Amount::from_sat(10_000),
                federation_activation_age: 10,
                funds_migration_age_since_activation_begin: 15,
                funds_migration_age_since_activation_end: 100,
                ..base
            },
        }
    }

    /// Regtest presets around the well-known genesis keys
    pub fn regtest_default() -> Result<Self, ConfigError> {
        let genesis = parse_genesis_federation(&REGTEST_GENESIS_KEYS.join(","), 0, Network::Regtest)?;
        Ok(Self::new(Network::Regtest, genesis))
    }

    pub fn btc_network(&self) -> bitcoin::Network {
        self.network.bitcoin_network()
    }

    pub fn with_federation_change_authorizer(mut self, authorizer: AddressBasedAuthorizer) -> Self {
        self.federation_change_authorizer = authorizer;
        self
    }

    pub fn with_fee_per_kb_change_authorizer(mut self, authorizer: AddressBasedAuthorizer) -> Self {
        self.fee_per_kb_change_authorizer = authorizer;
        self
    }

    pub fn with_lock_whitelist_change_authorizer(
        mut self,
        authorizer: AddressBasedAuthorizer,
    ) -> Self {
        self.lock_whitelist_change_authorizer = authorizer;
        self
    }

    /// Load constants from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let network: Network = env::var("FEDPEG_NETWORK")
            .unwrap_or_else(|_| "regtest".to_string())
            .parse()?;

        let creation_time_ms = parse_optional::<u64>("FEDPEG_GENESIS_FEDERATION_CREATION_TIME_MS")?
            .unwrap_or(0);
        let keys = get_required_or_regtest_default(
            "FEDPEG_GENESIS_FEDERATION_KEYS",
            &REGTEST_GENESIS_KEYS.join(","),
            network,
        )?;
        let genesis = parse_genesis_federation(&keys, creation_time_ms, network)?;

        let mut constants = Self::new(network, genesis);

        constants.federation_change_authorizer = AddressBasedAuthorizer::new(
            parse_authorizers("FEDPEG_FEDERATION_CHANGE_AUTHORIZERS", network)?,
            AuthorizerPolicy::Majority,
        );
        constants.fee_per_kb_change_authorizer = AddressBasedAuthorizer::new(
            parse_authorizers("FEDPEG_FEE_PER_KB_AUTHORIZERS", network)?,
            AuthorizerPolicy::Majority,
        );
        constants.lock_whitelist_change_authorizer = AddressBasedAuthorizer::new(
            parse_authorizers("FEDPEG_LOCK_WHITELIST_AUTHORIZERS", network)?,
            AuthorizerPolicy::One,
        );

        if let Some(confirmations) = parse_optional("FEDPEG_BTC2HOST_MIN_CONFIRMATIONS")? {
            constants.btc2host_min_confirmations = confirmations;
        }
        if let Some(confirmations) = parse_optional("FEDPEG_HOST2BTC_MIN_CONFIRMATIONS")? {
            constants.host2btc_min_confirmations = confirmations;
        }
        if let Some(sats) = parse_optional::<u64>("FEDPEG_GENESIS_FEE_PER_KB_SATS")? {
            constants.genesis_fee_per_kb = Amount::from_sat(sats);
        }

        constants.validate()?;
        Ok(constants)
    }

    /// Sanity checks every node would otherwise disagree on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.genesis_federation.btc_network() != self.btc_network() {
            return Err(ConfigError::NetworkMismatch(
                format!("{:?}", self.btc_network()),
                format!("{:?}", self.genesis_federation.btc_network()),
            ));
        }

        if self.funds_migration_age_since_activation_begin
            >= self.funds_migration_age_since_activation_end
        {
            return Err(ConfigError::InvalidValue(
                "funds_migration_age".to_string(),
                "migration window must begin before it ends".to_string(),
            ));
        }

        if self.btc2host_min_confirmations == 0 {
            return Err(ConfigError::InvalidValue(
                "FEDPEG_BTC2HOST_MIN_CONFIRMATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        if self.genesis_fee_per_kb == Amount::ZERO {
            return Err(ConfigError::InvalidValue(
                "FEDPEG_GENESIS_FEE_PER_KB_SATS".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.network != Network::Mainnet {
            return Err(ConfigError::NetworkMismatch(
                "mainnet".to_string(),
                format!("{:?}", self.network),
            ));
        }

        for (name, authorizer) in [
            ("FEDPEG_FEDERATION_CHANGE_AUTHORIZERS", &self.federation_change_authorizer),
            ("FEDPEG_FEE_PER_KB_AUTHORIZERS", &self.fee_per_kb_change_authorizer),
            ("FEDPEG_LOCK_WHITELIST_AUTHORIZERS", &self.lock_whitelist_change_authorizer),
        ] {
            if authorizer.is_empty() {
                return Err(ConfigError::MissingEnvVar(name.to_string()));
            }
        }

        Ok(())
    }
}

/// Process-level configuration for the tooling binary
#[derive(Debug, Clone)]
pub struct FedpegConfig {
    pub constants: BridgeConstants,
    pub db_path: PathBuf,
    pub log_level: String,
    pub json_logs: bool,
}

impl FedpegConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let constants = BridgeConstants::from_env()?;

        let db_path = env::var("FEDPEG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("fedpeg-state.db"));
        let log_level = env::var("FEDPEG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let json_logs = env::var("FEDPEG_JSON_LOGS").map(|v| v == "1").unwrap_or(false);

        Ok(Self {
            constants,
            db_path,
            log_level,
            json_logs,
        })
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let c = &self.constants;
        println!("=== fedpeg Configuration ===");
        println!("Network: {:?}", c.network);
        println!(
            "Genesis Federation: {}-of-{}",
            c.genesis_federation.threshold(),
            c.genesis_federation.size()
        );
        println!("BTC->Host Confirmations: {}", c.btc2host_min_confirmations);
        println!("Host->BTC Confirmations: {}", c.host2btc_min_confirmations);
        println!("Minimum Lock Value: {} sats", c.minimum_lock_tx_value.to_sat());
        println!("Genesis Fee/kB: {} sats", c.genesis_fee_per_kb.to_sat());
        println!("State DB: {}", self.db_path.display());
        println!("Log Level: {}", self.log_level);
        println!("============================");
    }
}

/// Get required env var, or use default for regtest only
fn get_required_or_regtest_default(
    var_name: &str,
    regtest_default: &str,
    network: Network,
) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) => Ok(value),
        Err(_) => {
            if network == Network::Regtest {
                Ok(regtest_default.to_string())
            } else {
                Err(ConfigError::MissingEnvVar(var_name.to_string()))
            }
        }
    }
}

fn parse_optional<T: FromStr>(var_name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse '{}'", value))
        }),
        Err(_) => Ok(None),
    }
}

fn parse_authorizers(var_name: &str, network: Network) -> Result<Vec<HostAddress>, ConfigError> {
    let raw = get_required_or_regtest_default(var_name, "", network)?;

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<HostAddress>()
                .map_err(|e| ConfigError::InvalidValue(var_name.to_string(), e.to_string()))
        })
        .collect()
}

/// Build a federation from comma-separated hex keys, one key per member role
pub fn parse_genesis_federation(
    keys: &str,
    creation_time_ms: u64,
    network: Network,
) -> Result<Federation, ConfigError> {
    let members = keys
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            PublicKey::from_str(s)
                .map(FederationMember::from_single_key)
                .map_err(|e| ConfigError::InvalidGenesisFederation(format!("{}: {}", s, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Federation::new(members, creation_time_ms, 0, network.bitcoin_network())
        .map_err(|e| ConfigError::InvalidGenesisFederation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert!(matches!("mainnet".parse::<Network>(), Ok(Network::Mainnet)));
        assert!(matches!("testnet".parse::<Network>(), Ok(Network::Testnet)));
        assert!(matches!("regtest".parse::<Network>(), Ok(Network::Regtest)));
        assert!("invalid".parse::<Network>().is_err());
    }

    #[test]
    fn test_regtest_default_genesis() {
        let constants = BridgeConstants::regtest_default().unwrap();
        assert_eq!(constants.genesis_federation.size(), 3);
        assert_eq!(constants.genesis_federation.threshold(), 2);
        assert!(constants.validate().is_ok());
    }

    #[test]
    fn test_regtest_not_production_ready() {
        let constants = BridgeConstants::regtest_default().unwrap();
        assert!(matches!(
            constants.validate_for_production(),
            Err(ConfigError::NetworkMismatch(_, _))
        ));
    }

    #[test]
    fn test_invalid_genesis_key_rejected() {
        let result = parse_genesis_federation("02deadbeef", 0, Network::Regtest);
        assert!(matches!(result, Err(ConfigError::InvalidGenesisFederation(_))));
    }
}
