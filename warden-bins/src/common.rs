//! Common utilities for all binaries
//!
//! Shared CLI arguments, configuration loading and kill switch setup.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use warden_core::config::Config;
use warden_core::engine::PipelineReport;
use warden_core::forensic::ForensicLog;
use warden_core::resilience::KillSwitch;

/// Common CLI arguments for all binaries
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level, overrides `[logging].log_level`
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

/// Load and validate configuration, applying CLI overrides
pub fn load_config(args: &CommonArgs) -> Result<Config> {
    let mut config = Config::load_or_default(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Default configuration is invalid".to_string(),
    })?;

    if let Some(level) = &args.log_level {
        config.logging.log_level = level.clone();
    }
    if args.json_logs {
        config.logging.json_logs = true;
    }
    Ok(config)
}

/// Initialize tracing/logging
pub fn init_logging(config: &Config) -> Result<()> {
    warden_core::utils::init_logger(&config.logging.log_level, config.logging.json_logs)
}

/// Kill switch per `[kill_switch]`, recording transitions to `forensic`
pub fn build_kill_switch(config: &Config, identity: &str, forensic: ForensicLog) -> Result<KillSwitch> {
    let cooldown = config.limits.cooldown();
    let kill_switch = if config.kill_switch.in_memory {
        tracing::warn!("Kill switch is in-memory only; engagements will not survive a restart");
        KillSwitch::in_memory(cooldown)
    } else {
        let path = &config.kill_switch.marker_path;
        KillSwitch::with_marker(path, cooldown, identity)
            .with_context(|| format!("Failed to open kill switch marker {}", path.display()))?
    };
    Ok(kill_switch.with_forensic(forensic))
}

/// Print final statistics
pub fn print_reports(reports: &[PipelineReport]) {
    tracing::info!("=== Final Statistics ===");
    for report in reports {
        let stats = &report.stats;
        let account = &report.summary.account;
        tracing::info!("[{}]", report.symbol);
        tracing::info!("  Ticks processed: {}", stats.ticks_processed);
        tracing::info!("  Signals received: {}", stats.signals_received);
        tracing::info!("  Orders emitted: {}", stats.orders_emitted);
        tracing::info!(
            "  Blocked: {} pre-signal, {} pre-order, {} timeout",
            stats.blocked_pre_signal,
            stats.blocked_pre_order,
            stats.evaluation_timeouts
        );
        tracing::info!(
            "  Rejected: {}, submit failures: {}, invalid signals: {}",
            stats.rejected,
            stats.submit_failures,
            stats.invalid_signals
        );
        tracing::info!(
            "  Alerts: {}, kills: {}",
            report.summary.alerts_triggered,
            report.summary.kills_triggered
        );
        tracing::info!(
            "  Equity: {:.2} (peak {:.2}, drawdown {:.2}%), leverage {:.2}x",
            account.equity,
            account.peak_equity,
            account.drawdown_pct * 100.0,
            account.leverage
        );
        tracing::info!("  Max tick latency: {}us", stats.max_tick_latency_ns / 1_000);
    }
}
