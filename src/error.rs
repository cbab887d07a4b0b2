// =============================================================================
// Error taxonomy — one enum per subsystem boundary
// =============================================================================
//
// Mirrors the error kinds in the design's error-handling table: each variant
// carries exactly the context needed to build an ACK reason code or a fatal
// exit. Subsystems return their own narrow error type; `AppError` wraps all
// of them at the orchestrator boundary so `main` can match on exit codes.
// =============================================================================

use thiserror::Error;

/// Errors from the broker bridge (connection, auth, requests).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection lost")]
    ConnectionLost,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),
    #[error("rate limited")]
    RateLimited,
    #[error("order rejected: {0}")]
    OrderRejected(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Errors from the risk guard's pre-trade gates, in evaluation order.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskError {
    #[error("emergency drawdown breached: {dd_pct:.2}% >= {limit_pct:.2}%")]
    Emergency { dd_pct: f64, limit_pct: f64 },
    #[error("drawdown limit breached: {dd_pct:.2}% >= {limit_pct:.2}%")]
    DrawdownLimit { dd_pct: f64, limit_pct: f64 },
    #[error("insufficient margin: free={free:.2} required={required:.2}")]
    InsufficientMargin { free: f64, required: f64 },
    #[error("spread exceeded: {spread_pips:.2} pips > {max_pips:.2} pips")]
    SpreadExceeded { spread_pips: f64, max_pips: f64 },
    #[error("spread unknown for symbol")]
    SpreadUnknown,
    #[error("circuit breaker open: {consecutive_losses} consecutive losses")]
    CircuitBreakerOpen { consecutive_losses: u32 },
}

/// Errors from USD-stop -> absolute-price conversion.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConverterError {
    #[error("unknown pip value for symbol {0}")]
    UnknownPipValue(String),
}

/// Errors from the bar buffer / bar detector.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BarError {
    #[error("bar arrived out of order: incoming {incoming} <= last {last}")]
    OutOfOrderBar { incoming: i64, last: i64 },
}

/// Errors from model bundle loading.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(String),
    #[error("missing required metadata field: {0}")]
    MissingField(&'static str),
    #[error("archive corrupted: {0}")]
    Corrupted(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("value out of range: {field} = {value}")]
    OutOfRange { field: &'static str, value: String },
    #[error("file unreadable: {0}")]
    Unreadable(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level error used at the orchestrator/bootstrap boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl AppError {
    /// Map to the process exit code defined by the CLI surface: 0 clean,
    /// 1 fatal init error, 2 invalid configuration, 130 interrupt.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::Model(_) | AppError::Broker(_) | AppError::Fatal(_) => 1,
        }
    }
}
