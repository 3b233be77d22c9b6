//! Double-gate dispatch pipeline
//!
//! One pipeline per instrument, driven by its own thread. Every tick walks the
//! same states and ends in exactly one forensic record:
//!
//! ```text
//!  RECEIVED ──► RISK_CHECKED ──┬─(over budget)──────────────────────► BLOCKED_TIMEOUT
//!                              ▼
//!                       PRE_SIGNAL_GATE ──(is_safe = false)─────────► BLOCKED_PRE_SIGNAL
//!                              │
//!                       signal source ──(nothing)───────────────────► NO_SIGNAL
//!                              │
//!                       PRE_ORDER_GATE ──(confirm_safe = false)─────► BLOCKED_PRE_ORDER
//!                              │
//!                           submit ──► EMITTED | REJECTED | SUBMIT_FAILED
//! ```
//!
//! The second gate sits immediately before the irreversible submit and closes
//! the window in which another pipeline, or another process, engages the
//! switch while this tick's order is being built.

use super::traits::{OrderGateway, SignalSource};
use crate::config::{KillSwitchMode, RiskLimitsConfig};
use crate::core::{EvaluationTimeout, KillSwitchError, OrderIntent, OrderResult, TickEvent};
use crate::forensic::{Action, ForensicLog, ForensicRecord};
use crate::monitoring::MetricsRegistry;
use crate::resilience::KillSwitch;
use crate::risk::{AccountState, AlertLevel, EvaluationResult, RiskEvaluator, RiskSummary};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Handles shared by every pipeline in the process
#[derive(Clone)]
pub struct PipelineContext {
    pub kill_switch: KillSwitch,
    pub limits: Arc<RiskLimitsConfig>,
    pub forensic: ForensicLog,
    pub metrics: Option<MetricsRegistry>,
}

impl PipelineContext {
    pub fn new(kill_switch: KillSwitch, limits: Arc<RiskLimitsConfig>) -> Self {
        Self {
            kill_switch,
            limits,
            forensic: ForensicLog::disabled(),
            metrics: None,
        }
    }

    pub fn with_forensic(mut self, forensic: ForensicLog) -> Self {
        self.forensic = forensic;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// What one tick resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub tick_id: u64,
    pub action: Action,
    pub reason: String,
    pub alert_level: AlertLevel,
    pub account: AccountState,
    /// Terminal ticket when the order was filled
    pub ticket: Option<u64>,
    pub latency: Duration,
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks_processed: u64,
    pub signals_received: u64,
    pub orders_emitted: u64,
    pub no_signal: u64,
    pub blocked_pre_signal: u64,
    pub blocked_pre_order: u64,
    pub evaluation_timeouts: u64,
    pub invalid_signals: u64,
    pub rejected: u64,
    pub submit_failures: u64,
    pub max_tick_latency_ns: u64,
}

impl PipelineStats {
    fn count(&mut self, action: Action) {
        match action {
            Action::Emitted => self.orders_emitted += 1,
            Action::NoSignal => self.no_signal += 1,
            Action::BlockedPreSignal => self.blocked_pre_signal += 1,
            Action::BlockedPreOrder => self.blocked_pre_order += 1,
            Action::BlockedTimeout => self.evaluation_timeouts += 1,
            Action::InvalidSignal => self.invalid_signals += 1,
            Action::Rejected => self.rejected += 1,
            Action::SubmitFailed => self.submit_failures += 1,
            Action::KillSwitchEngaged | Action::KillSwitchDisengaged | Action::KillSwitchAdopted => {}
        }
    }

    /// Ticks that ended in any BLOCKED state
    pub fn blocked(&self) -> u64 {
        self.blocked_pre_signal + self.blocked_pre_order + self.evaluation_timeouts
    }
}

/// Per-instrument pipeline
///
/// Type parameters:
/// - `S`: where signals come from
/// - `G`: where orders go
pub struct DispatchPipeline<S: SignalSource, G: OrderGateway> {
    symbol: String,
    ctx: PipelineContext,
    evaluator: RiskEvaluator,
    signals: S,
    gateway: G,
    tick_budget: Duration,
    stats: PipelineStats,
}

impl<S: SignalSource, G: OrderGateway> DispatchPipeline<S, G> {
    pub fn new(ctx: PipelineContext, evaluator: RiskEvaluator, signals: S, gateway: G) -> Self {
        info!(
            symbol = evaluator.symbol(),
            "Initializing pipeline: {} + {}",
            signals.name(),
            gateway.name()
        );

        Self {
            symbol: evaluator.symbol().to_string(),
            tick_budget: ctx.limits.tick_budget(),
            ctx,
            evaluator,
            signals,
            gateway,
            stats: PipelineStats::default(),
        }
    }

    /// Override the evaluation budget from the limits
    pub fn with_tick_budget(mut self, budget: Duration) -> Self {
        self.tick_budget = budget;
        self
    }

    /// Run one tick to completion and record its outcome
    pub fn process_tick(&mut self, tick: &TickEvent) -> TickOutcome {
        let started = Instant::now();
        self.stats.ticks_processed += 1;

        // RECEIVED → RISK_CHECKED
        let eval = self.evaluator.monitor_tick(tick);
        let evaluation_elapsed = started.elapsed();

        let (action, reason, ticket) = if evaluation_elapsed > self.tick_budget {
            let timeout = EvaluationTimeout {
                elapsed: evaluation_elapsed,
                budget: self.tick_budget,
            };
            warn!(symbol = %self.symbol, tick = tick.sequence, "{}", timeout);
            (Action::BlockedTimeout, timeout.to_string(), None)
        } else {
            self.gate_and_submit(tick, &eval)
        };

        let latency = started.elapsed();
        self.stats.count(action);
        self.stats.max_tick_latency_ns = self
            .stats
            .max_tick_latency_ns
            .max(latency.as_nanos() as u64);

        let outcome = TickOutcome {
            tick_id: tick.sequence,
            action,
            reason,
            alert_level: eval.alert_level,
            account: eval.account,
            ticket,
            latency,
        };

        self.record(&outcome, &eval, evaluation_elapsed);
        self.auto_recover(&eval);

        outcome
    }

    fn gate_and_submit(
        &mut self,
        tick: &TickEvent,
        eval: &EvaluationResult,
    ) -> (Action, String, Option<u64>) {
        let kill_switch = &self.ctx.kill_switch;

        // PRE_SIGNAL_GATE
        if !kill_switch.is_safe() {
            return (
                Action::BlockedPreSignal,
                format!("kill switch engaged: {}", engaged_reason(kill_switch)),
                None,
            );
        }

        let Some(signal) = self.signals.next_signal(tick, &eval.account) else {
            return (Action::NoSignal, "no signal".to_string(), None);
        };
        self.stats.signals_received += 1;

        let intent = match OrderIntent::from_signal(&signal) {
            Ok(intent) if intent.symbol == self.symbol => intent,
            Ok(intent) => {
                return (
                    Action::InvalidSignal,
                    format!("signal for {} on {} pipeline", intent.symbol, self.symbol),
                    None,
                )
            }
            Err(e) => return (Action::InvalidSignal, e.to_string(), None),
        };

        // PRE_ORDER_GATE
        if !kill_switch.confirm_safe() {
            warn!(
                symbol = %self.symbol,
                tick = tick.sequence,
                "Kill switch engaged while order was being built, not submitting"
            );
            return (
                Action::BlockedPreOrder,
                format!("kill switch engaged before submit: {}", engaged_reason(kill_switch)),
                None,
            );
        }

        match self.gateway.submit(&intent) {
            Ok(OrderResult::Filled { ticket, price }) => {
                let fill_price = price.unwrap_or_else(|| tick.entry_for(intent.side));
                self.evaluator.apply_fill(&intent, fill_price);
                info!(
                    symbol = %intent.symbol,
                    side = %intent.side,
                    volume = intent.volume,
                    price = fill_price,
                    ticket,
                    "Order filled"
                );
                (
                    Action::Emitted,
                    format!(
                        "{} {} {} filled at {} (ticket {})",
                        intent.side, intent.volume, intent.symbol, fill_price, ticket
                    ),
                    Some(ticket),
                )
            }
            Ok(OrderResult::Rejected { retcode }) => {
                warn!(symbol = %intent.symbol, retcode, "Order rejected by terminal");
                (
                    Action::Rejected,
                    format!(
                        "{} {} {} rejected: retcode {}",
                        intent.side, intent.volume, intent.symbol, retcode
                    ),
                    None,
                )
            }
            Err(e) => {
                error!(symbol = %intent.symbol, error = %e, "Order submit failed, not retrying");
                (Action::SubmitFailed, e.to_string(), None)
            }
        }
    }

    fn record(&self, outcome: &TickOutcome, eval: &EvaluationResult, evaluation: Duration) {
        debug!(
            symbol = %self.symbol,
            tick = outcome.tick_id,
            action = outcome.action.as_str(),
            level = %outcome.alert_level,
            "{}",
            outcome.reason
        );

        self.ctx.forensic.record(ForensicRecord::tick(
            outcome.tick_id,
            &self.symbol,
            outcome.action,
            outcome.reason.clone(),
            outcome.account,
        ));

        if let Some(metrics) = &self.ctx.metrics {
            let symbol = self.symbol.as_str();
            let pipeline = metrics.pipeline();
            pipeline
                .decisions_total
                .with_label_values(&[symbol, outcome.action.as_str()])
                .inc();
            pipeline
                .evaluation_seconds
                .with_label_values(&[symbol])
                .observe(evaluation.as_secs_f64());
            pipeline
                .tick_seconds
                .with_label_values(&[symbol])
                .observe(outcome.latency.as_secs_f64());

            let risk = metrics.risk();
            if eval.alert_level != AlertLevel::Normal {
                risk.alerts_total
                    .with_label_values(&[symbol, eval.alert_level.as_str()])
                    .inc();
            }
            if eval.engaged {
                risk.kills_total.inc();
            }
            risk.kill_switch_engaged
                .set(i64::from(!self.ctx.kill_switch.is_safe()));
            risk.drawdown_ratio
                .with_label_values(&[symbol])
                .set(eval.account.drawdown_pct);
            risk.leverage_ratio
                .with_label_values(&[symbol])
                .set(eval.account.leverage);
            risk.equity.with_label_values(&[symbol]).set(eval.account.equity);
        }
    }

    /// In auto mode a NORMAL evaluation clears the switch once the cooldown
    /// has elapsed, but only when this pipeline's own evaluator engaged it.
    /// Operator, panic-hook and cross-process engagements stay until an
    /// explicit disengage. Takes effect from the next tick.
    fn auto_recover(&self, eval: &EvaluationResult) {
        let kill_switch = &self.ctx.kill_switch;
        if self.ctx.limits.kill_switch_mode != KillSwitchMode::Auto
            || kill_switch.is_safe()
            || eval.alert_level != AlertLevel::Normal
        {
            return;
        }

        match kill_switch.disengage_if_engaged_by(self.evaluator.identity()) {
            Ok(true) => info!(symbol = %self.symbol, "Kill switch auto-recovered, account back within limits"),
            Ok(false) => {}
            Err(KillSwitchError::CooldownNotElapsed { remaining }) => {
                debug!(symbol = %self.symbol, ?remaining, "Auto recovery waiting for cooldown")
            }
            Err(e) => error!(symbol = %self.symbol, error = %e, "Auto recovery failed"),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn evaluator(&self) -> &RiskEvaluator {
        &self.evaluator
    }

    pub fn summary(&self) -> RiskSummary {
        self.evaluator.get_summary()
    }

    pub fn signals_mut(&mut self) -> &mut S {
        &mut self.signals
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}

fn engaged_reason(kill_switch: &KillSwitch) -> String {
    kill_switch
        .reason()
        .unwrap_or_else(|| "reason unavailable".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::core::{GatewayError, Signal};
    use std::collections::VecDeque;

    /// Replays a fixed list of per-tick signals
    struct ScriptedSignals {
        script: VecDeque<Option<Signal>>,
    }

    impl ScriptedSignals {
        fn new(script: Vec<Option<Signal>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl SignalSource for ScriptedSignals {
        fn next_signal(&mut self, _tick: &TickEvent, _account: &AccountState) -> Option<Signal> {
            self.script.pop_front().flatten()
        }

        fn name(&self) -> &'static str {
            "ScriptedSignals"
        }
    }

    /// Fills at the requested side's tick price, counting submissions
    #[derive(Default)]
    struct MockGateway {
        submitted: Vec<OrderIntent>,
        fail_with_timeout: bool,
    }

    impl OrderGateway for MockGateway {
        fn submit(&mut self, intent: &OrderIntent) -> Result<OrderResult, GatewayError> {
            self.submitted.push(intent.clone());
            if self.fail_with_timeout {
                return Err(GatewayError::CommandTimeout(Duration::from_millis(5)));
            }
            Ok(OrderResult::Filled {
                ticket: self.submitted.len() as u64,
                price: None,
            })
        }

        fn name(&self) -> &'static str {
            "MockGateway"
        }
    }

    fn pipeline(
        script: Vec<Option<Signal>>,
        gateway: MockGateway,
    ) -> (DispatchPipeline<ScriptedSignals, MockGateway>, ForensicLog) {
        let kill_switch = KillSwitch::in_memory(Duration::ZERO);
        let limits = Arc::new(RiskLimitsConfig {
            // generous budget so debug builds never trip it
            tick_processing_timeout_ms: 1_000,
            ..RiskLimitsConfig::default()
        });
        let forensic = ForensicLog::in_memory();
        let ctx = PipelineContext::new(kill_switch.clone(), limits.clone())
            .with_forensic(forensic.clone());
        let evaluator = RiskEvaluator::new(
            "EURUSD",
            limits,
            &AccountConfig::default(),
            kill_switch,
        );
        (
            DispatchPipeline::new(ctx, evaluator, ScriptedSignals::new(script), gateway),
            forensic,
        )
    }

    fn tick(seq: u64, bid: f64) -> TickEvent {
        TickEvent::new("EURUSD", bid, bid + 0.0002).with_sequence(seq)
    }

    #[test]
    fn test_signal_is_emitted_and_booked() {
        let (mut p, forensic) = pipeline(
            vec![Some(Signal::buy("EURUSD", 0.5)), None],
            MockGateway::default(),
        );

        let first = p.process_tick(&tick(1, 1.1000));
        assert_eq!(first.action, Action::Emitted);
        assert_eq!(first.ticket, Some(1));
        assert_eq!(p.evaluator().positions().len(), 1);
        assert_eq!(p.evaluator().positions()[0].entry_price, 1.1000 + 0.0002);

        let second = p.process_tick(&tick(2, 1.1000));
        assert_eq!(second.action, Action::NoSignal);
        assert_eq!(second.account.open_positions, 1);

        let records = forensic.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tick_id, Some(1));
        assert_eq!(records[1].action, Action::NoSignal);
    }

    #[test]
    fn test_engaged_switch_blocks_before_signal() {
        let (mut p, _) = pipeline(vec![Some(Signal::buy("EURUSD", 0.5))], MockGateway::default());
        p.ctx.kill_switch.engage("operator halt").unwrap();

        let outcome = p.process_tick(&tick(1, 1.1));
        assert_eq!(outcome.action, Action::BlockedPreSignal);
        assert!(outcome.reason.contains("operator halt"));
        assert!(p.gateway().submitted.is_empty());
        // the signal was never consumed
        assert_eq!(p.signals_mut().script.len(), 1);
    }

    /// Engages the switch while the signal is being built, as another
    /// pipeline's evaluator would
    struct EngagingSignals {
        kill_switch: KillSwitch,
    }

    impl SignalSource for EngagingSignals {
        fn next_signal(&mut self, _tick: &TickEvent, _account: &AccountState) -> Option<Signal> {
            self.kill_switch.engage("breach on another instrument").unwrap();
            Some(Signal::buy("EURUSD", 1.0))
        }

        fn name(&self) -> &'static str {
            "EngagingSignals"
        }
    }

    #[test]
    fn test_engage_during_signal_blocks_before_order() {
        let kill_switch = KillSwitch::in_memory(Duration::ZERO);
        let limits = Arc::new(RiskLimitsConfig::default());
        let ctx = PipelineContext::new(kill_switch.clone(), limits.clone());
        let evaluator =
            RiskEvaluator::new("EURUSD", limits, &AccountConfig::default(), kill_switch.clone());
        let signals = EngagingSignals {
            kill_switch: kill_switch.clone(),
        };
        let mut p = DispatchPipeline::new(ctx, evaluator, signals, MockGateway::default());

        let outcome = p.process_tick(&tick(1, 1.1));
        assert_eq!(outcome.action, Action::BlockedPreOrder);
        assert!(outcome.reason.contains("breach on another instrument"));
        assert!(p.gateway().submitted.is_empty());
        assert_eq!(p.stats().blocked_pre_order, 1);
    }

    #[test]
    fn test_evaluation_over_budget_blocks() {
        let (p, forensic) = pipeline(vec![Some(Signal::buy("EURUSD", 0.5))], MockGateway::default());
        let mut p = p.with_tick_budget(Duration::ZERO);

        let outcome = p.process_tick(&tick(1, 1.1));
        assert_eq!(outcome.action, Action::BlockedTimeout);
        assert!(outcome.reason.starts_with("risk evaluation took"));
        assert!(p.gateway().submitted.is_empty());
        assert_eq!(p.stats().evaluation_timeouts, 1);
        assert_eq!(forensic.records()[0].action, Action::BlockedTimeout);
    }

    #[test]
    fn test_submit_failure_not_retried() {
        let gateway = MockGateway {
            fail_with_timeout: true,
            ..Default::default()
        };
        let (mut p, _) = pipeline(vec![Some(Signal::buy("EURUSD", 0.5))], gateway);

        let outcome = p.process_tick(&tick(1, 1.1));
        assert_eq!(outcome.action, Action::SubmitFailed);
        assert_eq!(p.gateway().submitted.len(), 1);
        assert!(p.evaluator().positions().is_empty());
        assert_eq!(p.stats().submit_failures, 1);
    }

    #[test]
    fn test_invalid_signals_are_not_submitted() {
        let (mut p, _) = pipeline(
            vec![
                Some(Signal::buy("EURUSD", -1.0)),
                Some(Signal::buy("XAUUSD", 1.0)),
            ],
            MockGateway::default(),
        );
        assert_eq!(p.process_tick(&tick(1, 1.1)).action, Action::InvalidSignal);
        assert_eq!(p.process_tick(&tick(2, 1.1)).action, Action::InvalidSignal);
        assert!(p.gateway().submitted.is_empty());
        assert_eq!(p.stats().invalid_signals, 2);
    }

    #[test]
    fn test_stats_and_metrics() {
        let metrics = MetricsRegistry::new().unwrap();
        let (p, _) = pipeline(
            vec![Some(Signal::buy("EURUSD", 0.5)), None, None],
            MockGateway::default(),
        );
        let mut p = DispatchPipeline {
            ctx: p.ctx.clone().with_metrics(metrics.clone()),
            ..p
        };

        for seq in 1..=3 {
            p.process_tick(&tick(seq, 1.1));
        }

        let stats = p.stats();
        assert_eq!(stats.ticks_processed, 3);
        assert_eq!(stats.orders_emitted, 1);
        assert_eq!(stats.no_signal, 2);
        assert_eq!(stats.signals_received, 1);
        assert_eq!(
            metrics
                .pipeline()
                .decisions_total
                .with_label_values(&["EURUSD", "NO_SIGNAL"])
                .get(),
            2
        );
    }
}
