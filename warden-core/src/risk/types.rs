use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a tick's risk evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Normal,
    /// One soft threshold breached
    Warning,
    /// Soft breaches compounding (several at once, persisting, or loss streak)
    Critical,
    /// Hard limit breached; kill switch engaged
    Kill,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "NORMAL",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
            AlertLevel::Kill => "KILL",
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, AlertLevel::Warning | AlertLevel::Critical)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account snapshot, recomputed once per tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub open_positions: usize,
    /// Notional of open positions at mark
    pub exposure: f64,
    /// Reported leverage, clamped to `[0, max_account_leverage]`
    pub leverage: f64,
    pub peak_equity: f64,
    /// Currency amount below peak equity
    pub drawdown: f64,
    /// Fraction of peak equity, `[0, 1]` for any non-negative equity
    pub drawdown_pct: f64,
    pub consecutive_losses: u32,
    pub alert_level: AlertLevel,
}

impl AccountState {
    /// Flat account at `balance`
    pub fn initial(balance: f64) -> Self {
        Self {
            balance,
            equity: balance,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            open_positions: 0,
            exposure: 0.0,
            leverage: 0.0,
            peak_equity: balance,
            drawdown: 0.0,
            drawdown_pct: 0.0,
            consecutive_losses: 0,
            alert_level: AlertLevel::Normal,
        }
    }
}

/// The threshold comparison that decided a tick's alert level
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Breach {
    HardDrawdown { drawdown_pct: f64, limit: f64 },
    HardLeverage { leverage: f64, limit: f64 },
    SoftDrawdown { drawdown_pct: f64, limit: f64 },
    SoftLeverage { leverage: f64, limit: f64 },
    ConsecutiveLosses { count: u32, limit: u32 },
}

impl Breach {
    pub fn is_hard(&self) -> bool {
        matches!(self, Breach::HardDrawdown { .. } | Breach::HardLeverage { .. })
    }
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breach::HardDrawdown { drawdown_pct, limit } => write!(
                f,
                "hard drawdown breach: {:.2}% >= {:.2}%",
                drawdown_pct * 100.0,
                limit * 100.0
            ),
            Breach::HardLeverage { leverage, limit } => {
                write!(f, "hard leverage breach: {:.2}x >= {:.2}x", leverage, limit)
            }
            Breach::SoftDrawdown { drawdown_pct, limit } => write!(
                f,
                "drawdown warning: {:.2}% >= {:.2}%",
                drawdown_pct * 100.0,
                limit * 100.0
            ),
            Breach::SoftLeverage { leverage, limit } => {
                write!(f, "leverage warning: {:.2}x >= {:.2}x", leverage, limit)
            }
            Breach::ConsecutiveLosses { count, limit } => {
                write!(f, "{} consecutive losing trades (limit {})", count, limit)
            }
        }
    }
}

/// Outcome of one `monitor_tick`
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub account: AccountState,
    pub alert_level: AlertLevel,
    /// Highest-priority breach, if any
    pub breach: Option<Breach>,
    /// Leverage before clamping; what the hard comparison used
    pub raw_leverage: f64,
    /// This evaluation moved the kill switch from SAFE to ENGAGED
    pub engaged: bool,
}

impl EvaluationResult {
    pub fn reason(&self) -> String {
        match &self.breach {
            Some(breach) => breach.to_string(),
            None => "within limits".to_string(),
        }
    }
}

/// Running counters for an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub ticks_monitored: u64,
    /// Ticks that ended WARNING or CRITICAL
    pub alerts_triggered: u64,
    /// Kill switch transitions caused by this evaluator
    pub kills_triggered: u64,
    pub account: AccountState,
}
