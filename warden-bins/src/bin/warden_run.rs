//! Warden control-plane daemon
//!
//! One dispatch pipeline per configured symbol, all sharing one kill switch.
//!
//! - Market data: the terminal's broadcast channel, or `--ticks FILE` to
//!   replay broadcast lines
//! - Signals: JSON lines on stdin, `{"symbol":"EURUSD","side":"BUY","volume":0.1}`
//! - Orders: the terminal's command channel, or the paper terminal with `--paper`

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{bounded, unbounded, Sender};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use warden_bins::common::{build_kill_switch, init_logging, load_config, print_reports, CommonArgs};
use warden_core::config::Config;
use warden_core::core::Signal;
use warden_core::engine::{
    spawn_marker_watcher, ChannelSignals, DispatchPipeline, PipelineContext, Runtime,
};
use warden_core::forensic::ForensicLog;
use warden_core::gateway::{
    ChannelBroadcastSource, CommandClient, CommandTransport, MarketDataSubscriber, PaperTerminal,
    SubscriberStats, TcpBroadcastSource, TcpCommandTransport,
};
use warden_core::monitoring::MetricsRegistry;
use warden_core::resilience::{install_panic_handler, BackoffConfig, KillSwitch};
use warden_core::risk::RiskEvaluator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Warden risk-control plane")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Fill orders with the in-process paper terminal
    #[arg(long)]
    paper: bool,

    /// Replay broadcast lines from a file instead of subscribing
    #[arg(long)]
    ticks: Option<PathBuf>,

    /// Write the Prometheus exposition here on exit
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.common)?;
    if args.paper {
        config.gateway.paper = true;
    }
    init_logging(&config)?;

    info!("=== Warden: risk-control plane ===");
    info!("Symbols: {}", config.account.symbols.join(", "));
    info!(
        "Limits: drawdown {:.2}% (warn {:.2}%), leverage {:.1}x (warn {:.1}x), mode {:?}",
        config.limits.max_daily_drawdown * 100.0,
        config.limits.drawdown_warning * 100.0,
        config.limits.max_account_leverage,
        config.limits.leverage_warning,
        config.limits.kill_switch_mode
    );

    let forensic = ForensicLog::open(&config.logging.forensic_path).with_context(|| {
        format!(
            "Failed to open forensic log {}",
            config.logging.forensic_path.display()
        )
    })?;
    let kill_switch = build_kill_switch(&config, &config.kill_switch.identity, forensic.clone())?;
    if !kill_switch.is_safe() {
        warn!(
            "Starting with kill switch ENGAGED: {}",
            kill_switch.reason().unwrap_or_default()
        );
    }

    // A panicking pipeline engages the switch before unwinding
    install_panic_handler(kill_switch.clone());

    let metrics = MetricsRegistry::new().context("Failed to create metrics registry")?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let shutdown_ctrlc = shutdown.clone();
    ctrlc::set_handler(move || {
        warn!("Received Ctrl+C, initiating graceful shutdown...");
        shutdown_ctrlc.store(true, Ordering::Release);
    })?;

    let ctx = PipelineContext::new(kill_switch.clone(), Arc::new(config.limits.clone()))
        .with_forensic(forensic.clone())
        .with_metrics(metrics.clone());

    let mut runtime = Runtime::new();
    let signal_routes = if config.gateway.paper {
        warn!("PAPER TRADING MODE - NO ORDERS REACH THE TERMINAL");
        let terminal = PaperTerminal::new(config.gateway.paper_fill_price);
        spawn_pipelines(&mut runtime, &config, &ctx, &metrics, || terminal.clone())?
    } else {
        info!("Command channel: {}", config.gateway.command_addr);
        let addr = config.gateway.command_addr.clone();
        let connect_timeout = config.gateway.connect_timeout();
        spawn_pipelines(&mut runtime, &config, &ctx, &metrics, || {
            TcpCommandTransport::new(addr.clone(), connect_timeout)
        })?
    };

    info!("{} pipelines running", runtime.pipelines());
    spawn_signal_reader(signal_routes)?;

    let watcher = match kill_switch.marker_path() {
        Some(path) => {
            info!("Watching kill switch marker {}", path.display());
            Some(spawn_marker_watcher(
                kill_switch.clone(),
                Duration::from_millis(config.kill_switch.marker_poll_ms),
                shutdown.clone(),
            )?)
        }
        None => None,
    };

    let feed = match args.ticks.as_deref() {
        Some(path) => replay(path, &mut runtime, shutdown.clone(), &metrics),
        None => {
            info!("Market data: {}", config.gateway.market_data_addr);
            let source = TcpBroadcastSource::new(
                config.gateway.market_data_addr.clone(),
                BackoffConfig::default(),
            );
            MarketDataSubscriber::new(source, shutdown.clone())
                .with_metrics(metrics.clone())
                .run(runtime.router())
                .map_err(anyhow::Error::from)
        }
    };

    match &feed {
        Ok(stats) => info!(
            "Market data: {} messages, {} ticks, {} malformed",
            stats.messages, stats.ticks, stats.malformed
        ),
        Err(e) => error!("Market data feed failed: {:#}", e),
    }
    if runtime.router().unrouted() > 0 {
        warn!("{} ticks for unconfigured symbols dropped", runtime.router().unrouted());
    }

    shutdown.store(true, Ordering::Release);
    let reports = runtime.shutdown();
    if let Some(watcher) = watcher {
        if watcher.join().is_err() {
            error!("Marker watcher panicked");
        }
    }

    print_reports(&reports);
    report_kill_switch(&kill_switch);

    let exposition = metrics.encode().context("Failed to encode metrics")?;
    match &args.metrics_out {
        Some(path) => std::fs::write(path, exposition)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?,
        None => tracing::debug!("Metrics:\n{}", exposition),
    }

    feed.map(|_| ())
}

/// One pipeline per symbol; returns the per-symbol signal senders
fn spawn_pipelines<T, F>(
    runtime: &mut Runtime,
    config: &Config,
    ctx: &PipelineContext,
    metrics: &MetricsRegistry,
    transport: F,
) -> Result<HashMap<String, Sender<Signal>>>
where
    T: CommandTransport + Send + 'static,
    F: Fn() -> T,
{
    let mut routes = HashMap::new();

    for symbol in &config.account.symbols {
        let evaluator = RiskEvaluator::new(
            symbol.as_str(),
            ctx.limits.clone(),
            &config.account,
            ctx.kill_switch.clone(),
        );
        let gateway = CommandClient::new(transport(), config.gateway.command_timeout())
            .with_metrics(metrics.clone());
        let (tx, rx) = unbounded();

        runtime
            .spawn_pipeline(DispatchPipeline::new(
                ctx.clone(),
                evaluator,
                ChannelSignals::new(rx),
                gateway,
            ))
            .with_context(|| format!("Failed to start pipeline for {}", symbol))?;
        routes.insert(symbol.clone(), tx);
    }

    Ok(routes)
}

/// Route stdin signal lines to their symbol's pipeline
fn spawn_signal_reader(routes: HashMap<String, Sender<Signal>>) -> Result<()> {
    thread::Builder::new()
        .name("signal-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Signal input failed: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let signal: Signal = match serde_json::from_str(&line) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!(line = %line, error = %e, "Ignoring malformed signal");
                        continue;
                    }
                };
                match routes.get(&signal.symbol) {
                    Some(tx) => {
                        if tx.send(signal).is_err() {
                            break;
                        }
                    }
                    None => warn!(symbol = %signal.symbol, "Ignoring signal for unconfigured symbol"),
                }
            }
            info!("Signal input closed");
        })
        .context("Failed to start signal reader")?;
    Ok(())
}

/// Feed a recorded broadcast file through the subscriber
fn replay(
    path: &Path,
    runtime: &mut Runtime,
    shutdown: Arc<AtomicBool>,
    metrics: &MetricsRegistry,
) -> Result<SubscriberStats> {
    info!("Replaying market data from {}", path.display());
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let (tx, rx) = bounded(1024);
    thread::Builder::new()
        .name("tick-replay".to_string())
        .spawn(move || {
            for line in BufReader::new(file).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Replay read failed: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to start replay reader")?;

    let stats = MarketDataSubscriber::new(ChannelBroadcastSource::new(rx), shutdown)
        .with_metrics(metrics.clone())
        .run(runtime.router())?;
    Ok(stats)
}

fn report_kill_switch(kill_switch: &KillSwitch) {
    let state = kill_switch.state();
    if state.is_engaged() {
        warn!(
            "Kill switch ENGAGED by {}: {}",
            state.engaged_by.as_deref().unwrap_or("unknown"),
            state.reason.as_deref().unwrap_or("no reason recorded")
        );
        if !kill_switch.cooldown_remaining().is_zero() {
            info!(
                "Recovery cooldown: {}s remaining",
                kill_switch.cooldown_remaining().as_secs()
            );
        }
    } else {
        info!("Kill switch SAFE");
    }
}
