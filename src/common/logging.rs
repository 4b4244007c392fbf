//! Structured Logging for the bridge core
//!
//! Provides structured logging with:
//! - JSON output for log aggregation services
//! - Category helpers for peg-ins, releases, federation changes and elections
//! - The critical alert channel for consensus anomalies
//!
//! # Usage
//!
//! ```rust,ignore
//! use fedpeg::common::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?;
//! tracing::info!(target: "fedpeg::pegin", txid = %txid, "Processing peg-in");
//! ```
//!
//! Alerts never change control flow. They are recorded by the caller and
//! logged at error level under the `fedpeg::alert` target, which operators
//! are expected to monitor.

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Inbound bitcoin payments
    PegIn,
    /// Release requests and release transactions
    Release,
    /// Federation lifecycle (commit, activation, migration)
    Federation,
    /// Votes and election outcomes
    Election,
    /// Critical consensus alerts
    Alert,
    /// System events (startup, shutdown)
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    /// Log level
    pub level: String,
    /// Event category
    pub category: EventCategory,
    /// Human-readable message
    pub message: String,
    /// Identifier tying related events together (txid, host tx hash)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            error: None,
        }
    }

    /// Add correlation ID
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add error details
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    /// Render this event as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Critical Alerts
// ============================================================================

/// Kinds of consensus anomalies raised on the alert channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A peg-in was registered with a negative block height
    NegativeHeight,
    /// Proof root differs from the header stored at the given height
    MerkleRootMismatch,
    /// Transaction touches federation funds but fits no known shape
    UnrecognizedTransaction,
    /// A refund for a rejected peg-in could not be built
    RefundBuildFailed,
    /// A migration transaction could not be built
    MigrationFailed,
    /// A winning vote failed to execute
    VoteExecutionFailed,
}

/// A critical alert raised during an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Emit an alert on the monitored alert target
pub fn log_alert(alert: &Alert) {
    let event = LogEvent::new(LogLevel::Error, EventCategory::Alert, alert.message.clone())
        .with_data(serde_json::json!({ "kind": alert.kind }));

    tracing::error!(target: "fedpeg::alert", "{}", event.to_json());
}

// ============================================================================
// Category Helpers
// ============================================================================

/// Log a peg-in event
pub fn log_pegin_event(
    event_type: &str,
    btc_txid: &str,
    amount_sats: u64,
    sender: Option<&str>,
    success: bool,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let event = LogEvent::new(level, EventCategory::PegIn, event_type)
        .with_correlation_id(btc_txid)
        .with_data(serde_json::json!({
            "btc_txid": btc_txid,
            "amount_sats": amount_sats,
            "sender": sender,
            "success": success
        }));

    if success {
        tracing::info!(target: "fedpeg::pegin", "{}", event.to_json());
    } else {
        tracing::warn!(target: "fedpeg::pegin", "{}", event.to_json());
    }
}

/// Log a release event
pub fn log_release_event(
    event_type: &str,
    correlation_id: &str,
    amount_sats: u64,
    destination: &str,
    btc_txid: Option<&str>,
    error: Option<&str>,
) {
    let mut event = LogEvent::new(
        if error.is_some() { LogLevel::Warn } else { LogLevel::Info },
        EventCategory::Release,
        event_type,
    )
    .with_correlation_id(correlation_id)
    .with_data(serde_json::json!({
        "amount_sats": amount_sats,
        "destination": destination,
        "btc_txid": btc_txid
    }));

    if let Some(err) = error {
        event = event.with_error("RELEASE_ERROR", err);
        tracing::warn!(target: "fedpeg::release", "{}", event.to_json());
    } else {
        tracing::info!(target: "fedpeg::release", "{}", event.to_json());
    }
}

/// Log a federation lifecycle event
pub fn log_federation_event(event_type: &str, details: serde_json::Value) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Federation, event_type)
        .with_data(details);

    tracing::info!(target: "fedpeg::federation", "{}", event.to_json());
}

/// Log an election outcome
pub fn log_election_event(function: &str, voter: &str, result: i32) {
    let level = if result > 0 { LogLevel::Info } else { LogLevel::Debug };
    let event = LogEvent::new(level, EventCategory::Election, function).with_data(
        serde_json::json!({
            "voter": voter,
            "result": result
        }),
    );

    if result > 0 {
        tracing::info!(target: "fedpeg::election", "{}", event.to_json());
    } else {
        tracing::debug!(target: "fedpeg::election", "{}", event.to_json());
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("fedpeg={}", format!("{:?}", level).to_lowercase()))
    });

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from FedpegConfig
pub fn init_from_config(config: &super::config::FedpegConfig) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    init_logging(level, config.json_logs)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}
