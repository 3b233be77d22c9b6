//! Prometheus metrics for the control plane
//!
//! - Pipeline: decisions per action, evaluation latency
//! - Risk: alerts, kill switch transitions, live drawdown/leverage
//! - Gateway: command outcomes, dropped market-data messages

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "warden";

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    pipeline: Arc<PipelineMetrics>,
    risk: Arc<RiskMetrics>,
    gateway: Arc<GatewayMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let pipeline = Arc::new(PipelineMetrics::new(&registry)?);
        let risk = Arc::new(RiskMetrics::new(&registry)?);
        let gateway = Arc::new(GatewayMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            pipeline,
            risk,
            gateway,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pipeline(&self) -> &PipelineMetrics {
        &self.pipeline
    }

    pub fn risk(&self) -> &RiskMetrics {
        &self.risk
    }

    pub fn gateway(&self) -> &GatewayMetrics {
        &self.gateway
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Per-tick pipeline metrics
pub struct PipelineMetrics {
    /// Ticks by symbol and final action
    pub decisions_total: IntCounterVec,
    /// Risk evaluation wall time
    pub evaluation_seconds: HistogramVec,
    /// Whole tick wall time, including submit
    pub tick_seconds: HistogramVec,
}

impl PipelineMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let decisions_total = IntCounterVec::new(
            Opts::new("pipeline_decisions_total", "Ticks processed by final action")
                .namespace(NAMESPACE),
            &["symbol", "action"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let evaluation_seconds = HistogramVec::new(
            HistogramOpts::new("pipeline_evaluation_seconds", "Risk evaluation latency")
                .namespace(NAMESPACE)
                .buckets(vec![
                    0.000_001, 0.000_005, 0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005,
                    0.01, 0.05,
                ]),
            &["symbol"],
        )?;
        registry.register(Box::new(evaluation_seconds.clone()))?;

        let tick_seconds = HistogramVec::new(
            HistogramOpts::new("pipeline_tick_seconds", "End-to-end tick latency")
                .namespace(NAMESPACE)
                .buckets(vec![0.000_01, 0.000_1, 0.001, 0.01, 0.1, 1.0, 5.0]),
            &["symbol"],
        )?;
        registry.register(Box::new(tick_seconds.clone()))?;

        Ok(Self {
            decisions_total,
            evaluation_seconds,
            tick_seconds,
        })
    }
}

/// Account risk metrics
pub struct RiskMetrics {
    /// WARNING / CRITICAL / KILL evaluations
    pub alerts_total: IntCounterVec,
    /// SAFE → ENGAGED transitions caused by evaluators
    pub kills_total: IntCounter,
    /// 1 while the kill switch is engaged
    pub kill_switch_engaged: IntGauge,
    pub drawdown_ratio: GaugeVec,
    pub leverage_ratio: GaugeVec,
    pub equity: GaugeVec,
}

impl RiskMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let alerts_total = IntCounterVec::new(
            Opts::new("risk_alerts_total", "Risk evaluations above NORMAL").namespace(NAMESPACE),
            &["symbol", "level"],
        )?;
        registry.register(Box::new(alerts_total.clone()))?;

        let kills_total = IntCounter::with_opts(
            Opts::new("risk_kills_total", "Kill switch engagements by risk evaluators")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(kills_total.clone()))?;

        let kill_switch_engaged = IntGauge::with_opts(
            Opts::new("kill_switch_engaged", "1 while the kill switch is engaged")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(kill_switch_engaged.clone()))?;

        let drawdown_ratio = GaugeVec::new(
            Opts::new("risk_drawdown_ratio", "Drawdown as a fraction of peak equity")
                .namespace(NAMESPACE),
            &["symbol"],
        )?;
        registry.register(Box::new(drawdown_ratio.clone()))?;

        let leverage_ratio = GaugeVec::new(
            Opts::new("risk_leverage_ratio", "Reported (clamped) account leverage")
                .namespace(NAMESPACE),
            &["symbol"],
        )?;
        registry.register(Box::new(leverage_ratio.clone()))?;

        let equity = GaugeVec::new(
            Opts::new("risk_equity", "Account equity").namespace(NAMESPACE),
            &["symbol"],
        )?;
        registry.register(Box::new(equity.clone()))?;

        Ok(Self {
            alerts_total,
            kills_total,
            kill_switch_engaged,
            drawdown_ratio,
            leverage_ratio,
            equity,
        })
    }
}

/// Terminal connectivity metrics
pub struct GatewayMetrics {
    /// Command outcomes: filled / rejected / timeout / error
    pub commands_total: IntCounterVec,
    /// Broadcast messages dropped as malformed or unknown
    pub malformed_messages_total: IntCounter,
}

impl GatewayMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let commands_total = IntCounterVec::new(
            Opts::new("gateway_commands_total", "Order commands by outcome").namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let malformed_messages_total = IntCounter::with_opts(
            Opts::new(
                "gateway_malformed_messages_total",
                "Market data messages dropped as malformed",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(malformed_messages_total.clone()))?;

        Ok(Self {
            commands_total,
            malformed_messages_total,
        })
    }
}
