use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub limits: RiskLimitsConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Who may clear an engaged kill switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillSwitchMode {
    /// Only an explicit operator disengage clears the switch
    #[default]
    Manual,
    /// Pipelines disengage once the cooldown has elapsed and evaluation is back to NORMAL
    Auto,
}

/// Account-risk thresholds. Immutable after load, shared read-only.
///
/// Fractions are expressed in `[0, 1]` (0.02 = 2%).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskLimitsConfig {
    /// Hard drawdown fraction; reaching it engages the kill switch
    pub max_daily_drawdown: f64,
    /// Hard leverage ceiling; also the clamp for the reported leverage
    pub max_account_leverage: f64,
    /// Soft drawdown fraction (WARNING)
    pub drawdown_warning: f64,
    /// Soft leverage (WARNING)
    pub leverage_warning: f64,
    #[serde(default)]
    pub kill_switch_mode: KillSwitchMode,
    pub recovery_cooldown_seconds: u64,
    pub tick_processing_timeout_ms: u64,
    pub max_consecutive_losses: u32,
    /// Consecutive soft-breach ticks before WARNING escalates to CRITICAL
    #[serde(default = "default_critical_after_ticks")]
    pub critical_after_ticks: u32,
}

impl RiskLimitsConfig {
    #[inline]
    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_processing_timeout_ms)
    }

    #[inline]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.recovery_cooldown_seconds)
    }
}

impl Default for RiskLimitsConfig {
    /// Conservative limits used when no configuration file is supplied
    fn default() -> Self {
        Self {
            max_daily_drawdown: 0.02,
            max_account_leverage: 5.0,
            drawdown_warning: 0.01,
            leverage_warning: 3.0,
            kill_switch_mode: KillSwitchMode::Manual,
            recovery_cooldown_seconds: 300,
            tick_processing_timeout_ms: 10,
            max_consecutive_losses: 5,
            critical_after_ticks: default_critical_after_ticks(),
        }
    }
}

/// Starting account and instrument universe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    /// Units per lot (100000 for standard FX lots)
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
    /// One dispatch pipeline per symbol
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            contract_size: default_contract_size(),
            symbols: default_symbols(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KillSwitchConfig {
    /// Durable marker shared by every process on the host
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,
    /// Keep state in memory only (paper runs and tests)
    #[serde(default)]
    pub in_memory: bool,
    /// Recorded in the marker as the engaging entity
    #[serde(default = "default_identity")]
    pub identity: String,
    /// How often the runtime re-reads the marker for external changes
    #[serde(default = "default_marker_poll_ms")]
    pub marker_poll_ms: u64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            marker_path: default_marker_path(),
            in_memory: false,
            identity: default_identity(),
            marker_poll_ms: default_marker_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Request/reply endpoint of the terminal
    #[serde(default = "default_command_addr")]
    pub command_addr: String,
    /// Broadcast endpoint of the terminal
    #[serde(default = "default_market_data_addr")]
    pub market_data_addr: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Route orders to the in-process paper terminal instead of the command endpoint
    #[serde(default)]
    pub paper: bool,
    /// Fixed fill price for paper fills; None fills at the tick price
    #[serde(default)]
    pub paper_fill_price: Option<f64>,
}

impl GatewayConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            command_addr: default_command_addr(),
            market_data_addr: default_market_data_addr(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            paper: false,
            paper_fill_price: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    /// Append-only JSONL decision log
    #[serde(default = "default_forensic_path")]
    pub forensic_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            forensic_path: default_forensic_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: RiskLimitsConfig::default(),
            account: AccountConfig::default(),
            kill_switch: KillSwitchConfig::default(),
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_critical_after_ticks() -> u32 {
    3
}

fn default_initial_balance() -> f64 {
    100_000.0
}

fn default_contract_size() -> f64 {
    100_000.0
}

fn default_symbols() -> Vec<String> {
    vec!["EURUSD".to_string()]
}

fn default_marker_path() -> PathBuf {
    PathBuf::from("./data/kill_switch.lock")
}

fn default_identity() -> String {
    "warden".to_string()
}

fn default_marker_poll_ms() -> u64 {
    500
}

fn default_command_addr() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_market_data_addr() -> String {
    "127.0.0.1:5556".to_string()
}

fn default_command_timeout_ms() -> u64 {
    2_000
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_forensic_path() -> PathBuf {
    PathBuf::from("./data/forensic.jsonl")
}
