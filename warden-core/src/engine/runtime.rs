//! Per-instrument threads
//!
//! Each pipeline owns a thread and a bounded tick queue. The market-data
//! subscriber feeds a [`TickRouter`], which fans ticks out by symbol, so ticks
//! for one instrument are processed strictly in arrival order while
//! instruments run in parallel.

use super::dispatch::{DispatchPipeline, PipelineStats};
use super::traits::{OrderGateway, SignalSource};
use crate::core::TickEvent;
use crate::gateway::TickSink;
use crate::resilience::KillSwitch;
use crate::risk::RiskSummary;
use crossbeam::channel::{bounded, Receiver, SendError, Sender};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ticks queued per pipeline before the subscriber blocks
pub const TICK_QUEUE_CAPACITY: usize = 1024;

/// Fans ticks out to pipeline queues by symbol
#[derive(Default)]
pub struct TickRouter {
    routes: HashMap<String, Sender<TickEvent>>,
    unrouted: u64,
}

impl TickRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, symbol: impl Into<String>, sender: Sender<TickEvent>) {
        self.routes.insert(symbol.into(), sender);
    }

    /// Ticks for symbols with no pipeline
    pub fn unrouted(&self) -> u64 {
        self.unrouted
    }

    /// Drop every route, letting pipeline threads drain and exit
    pub fn close(&mut self) {
        self.routes.clear();
    }
}

impl TickSink for TickRouter {
    fn on_tick(&mut self, tick: TickEvent) -> bool {
        let Some(sender) = self.routes.get(&tick.symbol) else {
            self.unrouted += 1;
            debug!(symbol = %tick.symbol, "No pipeline for symbol, dropping tick");
            return true;
        };

        if let Err(SendError(tick)) = sender.send(tick) {
            // the pipeline thread is gone; its panic hook already engaged the switch
            warn!(symbol = %tick.symbol, "Pipeline queue closed, removing route");
            self.routes.remove(&tick.symbol);
        }
        !self.routes.is_empty()
    }
}

/// Final counters of a pipeline thread
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub symbol: String,
    pub stats: PipelineStats,
    pub summary: RiskSummary,
}

/// Owns the pipeline threads and the router that feeds them
#[derive(Default)]
pub struct Runtime {
    router: TickRouter,
    workers: Vec<(String, JoinHandle<PipelineReport>)>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a pipeline onto its own thread
    pub fn spawn_pipeline<S, G>(&mut self, pipeline: DispatchPipeline<S, G>) -> io::Result<()>
    where
        S: SignalSource + Send + 'static,
        G: OrderGateway + Send + 'static,
    {
        let symbol = pipeline.symbol().to_string();
        let (tx, rx) = bounded(TICK_QUEUE_CAPACITY);

        let handle = thread::Builder::new()
            .name(format!("pipeline-{}", symbol))
            .spawn(move || run_pipeline(pipeline, rx))?;

        info!(symbol = %symbol, "Pipeline thread started");
        self.router.add_route(symbol.clone(), tx);
        self.workers.push((symbol, handle));
        Ok(())
    }

    pub fn router(&mut self) -> &mut TickRouter {
        &mut self.router
    }

    pub fn pipelines(&self) -> usize {
        self.workers.len()
    }

    /// Close every queue, wait for queued ticks to drain, collect reports
    ///
    /// A pipeline that panicked has no report.
    pub fn shutdown(mut self) -> Vec<PipelineReport> {
        self.router.close();

        let mut reports = Vec::with_capacity(self.workers.len());
        for (symbol, handle) in self.workers.drain(..) {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => error!(symbol = %symbol, "Pipeline thread panicked"),
            }
        }
        reports
    }
}

/// Drive one pipeline until its queue closes
pub fn run_pipeline<S, G>(mut pipeline: DispatchPipeline<S, G>, ticks: Receiver<TickEvent>) -> PipelineReport
where
    S: SignalSource,
    G: OrderGateway,
{
    for tick in ticks.iter() {
        pipeline.process_tick(&tick);
    }

    let stats = pipeline.stats();
    info!(
        symbol = pipeline.symbol(),
        ticks = stats.ticks_processed,
        emitted = stats.orders_emitted,
        blocked = stats.blocked(),
        "Pipeline stopped"
    );

    PipelineReport {
        symbol: pipeline.symbol().to_string(),
        stats,
        summary: pipeline.summary(),
    }
}

/// Poll the on-disk marker so engagements by other processes reach `is_safe()`
/// without waiting for the pre-order gate.
pub fn spawn_marker_watcher(
    kill_switch: KillSwitch,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("marker-watcher".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                if let Err(e) = kill_switch.refresh() {
                    warn!(error = %e, "Kill switch marker refresh failed");
                }
                thread::sleep(interval);
            }
            debug!("Marker watcher stopped");
        })
}
