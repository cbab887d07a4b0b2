// =============================================================================
// Main configuration — broker/paths/trading/risk/persistence/logging/health
// =============================================================================
//
// Loaded once at startup from a JSON file. Every field carries
// `#[serde(default)]` so that adding a field never breaks an older config.
// `${ENV_VAR}` references inside string values are expanded against the
// process environment at load time, before the JSON is parsed.
// =============================================================================

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

fn default_broker_type() -> String {
    "mock".to_string()
}

fn default_environment() -> String {
    "demo".to_string()
}

fn default_models_dir() -> String {
    "models".to_string()
}

fn default_executor_config() -> String {
    "symbols.json".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_timeframe() -> String {
    "M5".to_string()
}

fn default_initial_balance() -> f64 {
    10_000.0
}

fn default_dd_limit_pct() -> f64 {
    10.0
}

fn default_dd_emergency_pct() -> f64 {
    20.0
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_retry_queue_capacity() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_heartbeat_interval_s() -> u64 {
    30
}

fn default_symbol_timeout_s() -> u64 {
    300
}

fn default_memory_limit_mb() -> u64 {
    512
}

fn default_request_timeout_s() -> u64 {
    30
}

fn default_shutdown_grace_s() -> u64 {
    10
}

/// `broker` section: which SDK to use and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_broker_type")]
    pub r#type: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            r#type: default_broker_type(),
            login: String::new(),
            password: String::new(),
            server: String::new(),
            environment: default_environment(),
            request_timeout_s: default_request_timeout_s(),
        }
    }
}

/// `paths` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
    #[serde(default = "default_executor_config")]
    pub executor_config: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            executor_config: default_executor_config(),
            log_dir: default_log_dir(),
        }
    }
}

/// `trading` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSection {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_true")]
    pub close_on_exit: bool,
    #[serde(default = "default_true")]
    pub close_on_day_change: bool,
    #[serde(default)]
    pub start_paused: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TradingSection {
    fn default() -> Self {
        Self {
            timeframe: default_timeframe(),
            initial_balance: default_initial_balance(),
            close_on_exit: true,
            close_on_day_change: true,
            start_paused: false,
        }
    }
}

/// `risk` section. Mirrors the `_risk` entry reserved in the symbol config
/// file; both are loaded, the main config's copy used until the symbol
/// config is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_dd_limit_pct")]
    pub dd_limit_pct: f64,
    #[serde(default = "default_dd_emergency_pct")]
    pub dd_emergency_pct: f64,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            dd_limit_pct: default_dd_limit_pct(),
            dd_emergency_pct: default_dd_emergency_pct(),
            initial_balance: default_initial_balance(),
            max_consecutive_losses: default_max_consecutive_losses(),
        }
    }
}

/// `persistence` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub credentials: String,
    #[serde(default = "default_retry_queue_capacity")]
    pub retry_queue_capacity: usize,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            credentials: String::new(),
            retry_queue_capacity: default_retry_queue_capacity(),
        }
    }
}

/// `logging` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: String,
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
            rotation: default_rotation(),
        }
    }
}

/// `health` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,
    #[serde(default = "default_symbol_timeout_s")]
    pub symbol_timeout_s: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: default_heartbeat_interval_s(),
            symbol_timeout_s: default_symbol_timeout_s(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

/// Top-level main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub trading: TradingSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default = "default_shutdown_grace_s")]
    pub shutdown_grace_s: u64,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            paths: PathsSection::default(),
            trading: TradingSection::default(),
            risk: RiskSection::default(),
            persistence: PersistenceSection::default(),
            logging: LoggingSection::default(),
            health: HealthSection::default(),
            shutdown_grace_s: default_shutdown_grace_s(),
        }
    }
}

impl MainConfig {
    /// Load the main configuration from a JSON file, expanding `${ENV_VAR}`
    /// references against the process environment before parsing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&raw);

        let config: Self = serde_json::from_str(&expanded)?;
        config.validate()?;

        info!(
            path = %path.display(),
            broker_type = %config.broker.r#type,
            environment = %config.broker.environment,
            timeframe = %config.trading.timeframe,
            "main config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration atomically (write to a tmp sibling, rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        info!(path = %path.display(), "main config saved (atomic)");
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.r#type != "real" && self.broker.r#type != "mock" {
            return Err(ConfigError::OutOfRange {
                field: "broker.type",
                value: self.broker.r#type.clone(),
            });
        }
        if self.broker.environment != "demo" && self.broker.environment != "live" {
            return Err(ConfigError::OutOfRange {
                field: "broker.environment",
                value: self.broker.environment.clone(),
            });
        }
        if self.risk.dd_limit_pct <= 0.0 || self.risk.dd_limit_pct >= self.risk.dd_emergency_pct {
            return Err(ConfigError::OutOfRange {
                field: "risk.dd_limit_pct",
                value: self.risk.dd_limit_pct.to_string(),
            });
        }
        if self.trading.initial_balance <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "trading.initial_balance",
                value: self.trading.initial_balance.to_string(),
            });
        }
        Ok(())
    }
}

/// Expand `${VAR_NAME}` occurrences in `input` using the process environment.
/// Unresolved variables are left as an empty string and a warning is logged,
/// matching fail-soft config hygiene rather than crashing on a missing
/// optional secret.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find('}') {
                let var_name = &input[i + 2..i + 2 + end];
                match std::env::var(var_name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        warn!(var = var_name, "config references undefined environment variable");
                    }
                }
                i += 2 + end + 1;
                continue;
            }
        }
        let ch = input[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = MainConfig::default();
        assert_eq!(cfg.broker.r#type, "mock");
        assert_eq!(cfg.broker.environment, "demo");
        assert_eq!(cfg.trading.timeframe, "M5");
        assert!((cfg.risk.dd_limit_pct - 10.0).abs() < f64::EPSILON);
        assert!((cfg.risk.dd_emergency_pct - 20.0).abs() < f64::EPSILON);
        assert_eq!(cfg.persistence.retry_queue_capacity, 1000);
        assert_eq!(cfg.health.symbol_timeout_s, 300);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: MainConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.broker.r#type, "mock");
        assert_eq!(cfg.paths.models_dir, "models");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "broker": { "type": "real", "environment": "live" } }"#;
        let cfg: MainConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.broker.r#type, "real");
        assert_eq!(cfg.broker.environment, "live");
        assert_eq!(cfg.trading.timeframe, "M5");
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = MainConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: MainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.broker.r#type, cfg2.broker.r#type);
        assert!((cfg.risk.dd_limit_pct - cfg2.risk.dd_limit_pct).abs() < f64::EPSILON);
    }

    #[test]
    fn env_var_expansion_substitutes_value() {
        std::env::set_var("MERIDIAN_TEST_LOGIN", "trader42");
        let input = r#"{"broker": {"login": "${MERIDIAN_TEST_LOGIN}"}}"#;
        let expanded = expand_env_vars(input);
        assert!(expanded.contains("trader42"));
        std::env::remove_var("MERIDIAN_TEST_LOGIN");
    }

    #[test]
    fn env_var_expansion_leaves_missing_var_empty() {
        let input = r#"{"broker": {"login": "${MERIDIAN_DEFINITELY_UNSET}"}}"#;
        let expanded = expand_env_vars(input);
        assert!(expanded.contains(r#""login": """#));
    }

    #[test]
    fn validate_rejects_bad_broker_type() {
        let mut cfg = MainConfig::default();
        cfg.broker.r#type = "bogus".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_emergency_at_or_below_limit() {
        let mut cfg = MainConfig::default();
        cfg.risk.dd_emergency_pct = cfg.risk.dd_limit_pct;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn atomic_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = MainConfig::default();
        cfg.save(&path).unwrap();
        let loaded = MainConfig::load(&path).unwrap();
        assert_eq!(loaded.broker.r#type, cfg.broker.r#type);
    }
}
