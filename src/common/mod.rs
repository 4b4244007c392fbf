//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the bridge core.
//!
//! This module contains:
//! - Network constants and configuration loading from environment variables
//! - Structured logging setup and the critical alert channel
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{BridgeConstants, ConfigError, FedpegConfig, Network};
pub use error::{BridgeError, Result};
pub use logging::{
    init_from_config, init_logging, log_alert, log_election_event, log_federation_event,
    log_pegin_event, log_release_event, Alert, AlertKind, ErrorDetails, EventCategory, LogEvent,
    LogLevel, LoggingError,
};
