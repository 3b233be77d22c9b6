//! Account Risk Evaluator
//!
//! Recomputes the account snapshot on every tick and compares it against the
//! configured limits. Hard breaches engage the kill switch; soft breaches
//! raise WARNING or CRITICAL alerts. Monitoring continues after a kill so the
//! forensic trail stays complete.
//!
//! ## Breach priority
//!
//! ```text
//! hard drawdown > hard leverage > soft drawdown > soft leverage > consecutive losses
//! ```
//!
//! ## Computation
//!
//! - equity      = balance + Σ unrealized  (longs marked at bid, shorts at ask)
//! - drawdown    = (peak equity - equity) / peak equity
//! - leverage    = exposure / equity, clamped to `[0, max_account_leverage]`
//!
//! The hard leverage comparison uses the raw ratio; only the reported value is
//! clamped. With equity at or below zero there is no meaningful ratio and the
//! ceiling itself is used, which reaches the hard limit and engages the switch.

use crate::config::{AccountConfig, RiskLimitsConfig};
use crate::core::{OrderIntent, TickEvent};
use crate::resilience::KillSwitch;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod positions;
pub mod types;

pub use positions::{FillOutcome, OpenPosition, PositionBook};
pub use types::{AccountState, AlertLevel, Breach, EvaluationResult, RiskSummary};

/// Equity below this is treated as zero for the leverage ratio
const MIN_EQUITY: f64 = 1e-9;

/// Raw and reported leverage for an exposure/equity pair.
///
/// Returns `(raw, reported)` where `reported` lies in `[0, ceiling]`.
pub fn compute_leverage(exposure: f64, equity: f64, ceiling: f64) -> (f64, f64) {
    if exposure.is_nan() || exposure <= 0.0 {
        return (0.0, 0.0);
    }
    let raw = if equity <= MIN_EQUITY || !equity.is_finite() {
        ceiling
    } else {
        let ratio = exposure / equity;
        if ratio.is_finite() {
            ratio
        } else {
            ceiling
        }
    };
    (raw, raw.clamp(0.0, ceiling))
}

/// Per-instrument risk evaluator
///
/// Owns the account model for one pipeline and is the only writer of its
/// `AccountState`.
pub struct RiskEvaluator {
    symbol: String,
    limits: Arc<RiskLimitsConfig>,
    contract_size: f64,
    kill_switch: KillSwitch,
    /// Recorded as the engaging entity
    identity: String,

    book: PositionBook,
    balance: f64,
    realized_pnl: f64,
    peak_equity: f64,
    consecutive_losses: u32,
    /// Consecutive ticks with at least one soft breach
    soft_streak: u32,
    state: AccountState,

    ticks_monitored: u64,
    alerts_triggered: u64,
    kills_triggered: u64,
}

impl RiskEvaluator {
    pub fn new(
        symbol: impl Into<String>,
        limits: Arc<RiskLimitsConfig>,
        account: &AccountConfig,
        kill_switch: KillSwitch,
    ) -> Self {
        let symbol = symbol.into();
        let identity = format!("risk-evaluator:{}", symbol);
        Self {
            symbol,
            limits,
            contract_size: account.contract_size,
            kill_switch,
            identity,
            book: PositionBook::new(),
            balance: account.initial_balance,
            realized_pnl: 0.0,
            peak_equity: account.initial_balance,
            consecutive_losses: 0,
            soft_streak: 0,
            state: AccountState::initial(account.initial_balance),
            ticks_monitored: 0,
            alerts_triggered: 0,
            kills_triggered: 0,
        }
    }

    /// Evaluate one tick: re-mark positions, recompute the snapshot, classify
    /// breaches and engage the kill switch on a hard one.
    pub fn monitor_tick(&mut self, tick: &TickEvent) -> EvaluationResult {
        self.ticks_monitored += 1;
        let limits = &*self.limits;

        self.book.mark(tick);
        let unrealized = self.book.unrealized_pnl(self.contract_size);
        let exposure = self.book.exposure(self.contract_size);
        let equity = self.balance + unrealized;

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = (self.peak_equity - equity).max(0.0);
        let drawdown_pct = if self.peak_equity > MIN_EQUITY {
            drawdown / self.peak_equity
        } else {
            // Nothing left to lose from
            1.0
        };

        let (raw_leverage, leverage) =
            compute_leverage(exposure, equity, limits.max_account_leverage);

        let hard = if drawdown_pct >= limits.max_daily_drawdown {
            Some(Breach::HardDrawdown {
                drawdown_pct,
                limit: limits.max_daily_drawdown,
            })
        } else if raw_leverage >= limits.max_account_leverage {
            Some(Breach::HardLeverage {
                leverage: raw_leverage,
                limit: limits.max_account_leverage,
            })
        } else {
            None
        };

        let mut soft: Vec<Breach> = Vec::new();
        if drawdown_pct >= limits.drawdown_warning {
            soft.push(Breach::SoftDrawdown {
                drawdown_pct,
                limit: limits.drawdown_warning,
            });
        }
        if raw_leverage >= limits.leverage_warning {
            soft.push(Breach::SoftLeverage {
                leverage: raw_leverage,
                limit: limits.leverage_warning,
            });
        }
        let loss_streak = self.consecutive_losses >= limits.max_consecutive_losses;
        if loss_streak {
            soft.push(Breach::ConsecutiveLosses {
                count: self.consecutive_losses,
                limit: limits.max_consecutive_losses,
            });
        }

        if soft.is_empty() {
            self.soft_streak = 0;
        } else {
            self.soft_streak = self.soft_streak.saturating_add(1);
        }

        let (alert_level, breach, engaged) = match hard {
            Some(breach) => {
                let engaged = self.engage(tick, &breach);
                (AlertLevel::Kill, Some(breach), engaged)
            }
            None if !soft.is_empty() => {
                let level = if soft.len() >= 2
                    || loss_streak
                    || self.soft_streak >= limits.critical_after_ticks
                {
                    AlertLevel::Critical
                } else {
                    AlertLevel::Warning
                };
                (level, soft.first().copied(), false)
            }
            None => (AlertLevel::Normal, None, false),
        };

        if alert_level.is_alert() {
            self.alerts_triggered += 1;
            if let Some(breach) = &breach {
                warn!(
                    symbol = %self.symbol,
                    tick = tick.sequence,
                    level = %alert_level,
                    soft_streak = self.soft_streak,
                    "{}",
                    breach
                );
            }
        }

        self.state = AccountState {
            balance: self.balance,
            equity,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: unrealized,
            open_positions: self.book.len(),
            exposure,
            leverage,
            peak_equity: self.peak_equity,
            drawdown,
            drawdown_pct,
            consecutive_losses: self.consecutive_losses,
            alert_level,
        };

        EvaluationResult {
            account: self.state,
            alert_level,
            breach,
            raw_leverage,
            engaged,
        }
    }

    fn engage(&mut self, tick: &TickEvent, breach: &Breach) -> bool {
        let reason = format!("{} on {} tick {}", breach, self.symbol, tick.sequence);
        match self.kill_switch.engage_by(&reason, &self.identity) {
            Ok(true) => {
                self.kills_triggered += 1;
                true
            }
            Ok(false) => {
                debug!(symbol = %self.symbol, "Hard breach while kill switch already engaged");
                false
            }
            Err(e) => {
                // The switch is engaged in memory even when the marker write fails
                error!(symbol = %self.symbol, error = %e, "Kill switch engaged without durable marker");
                self.kills_triggered += 1;
                true
            }
        }
    }

    /// Book a fill reported by the terminal. Realized PnL moves into the
    /// balance; the snapshot reflects it from the next tick.
    pub fn apply_fill(&mut self, intent: &OrderIntent, fill_price: f64) -> FillOutcome {
        let outcome = self.book.apply_fill(
            &intent.symbol,
            intent.side,
            intent.volume,
            fill_price,
            self.contract_size,
        );

        if outcome.closed_any() {
            self.balance += outcome.realized_pnl;
            self.realized_pnl += outcome.realized_pnl;
            if outcome.realized_pnl < 0.0 {
                self.consecutive_losses = self.consecutive_losses.saturating_add(1);
            } else {
                self.consecutive_losses = 0;
            }
            info!(
                symbol = %intent.symbol,
                realized = outcome.realized_pnl,
                balance = self.balance,
                consecutive_losses = self.consecutive_losses,
                "Position closed"
            );
        }

        outcome
    }

    /// Snapshot from the last evaluated tick
    pub fn account(&self) -> &AccountState {
        &self.state
    }

    pub fn positions(&self) -> &[OpenPosition] {
        self.book.positions()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Entity name recorded on the engagements this evaluator makes
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub fn get_summary(&self) -> RiskSummary {
        RiskSummary {
            ticks_monitored: self.ticks_monitored,
            alerts_triggered: self.alerts_triggered,
            kills_triggered: self.kills_triggered,
            account: self.state,
        }
    }
}
