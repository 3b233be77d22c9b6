// Pipeline properties over generated tick sequences

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use warden_core::config::{AccountConfig, RiskLimitsConfig};
use warden_core::core::{Signal, TickEvent};
use warden_core::engine::{DispatchPipeline, PipelineContext, SignalSource};
use warden_core::forensic::{Action, ForensicLog};
use warden_core::gateway::{CommandClient, PaperTerminal};
use warden_core::resilience::KillSwitch;
use warden_core::risk::{AccountState, RiskEvaluator};

/// Alternates buy/sell of a fixed size whenever flat or long
struct FlipFlop {
    volume: f64,
    long: bool,
}

impl SignalSource for FlipFlop {
    fn next_signal(&mut self, tick: &TickEvent, _account: &AccountState) -> Option<Signal> {
        let signal = if self.long {
            Signal::sell(&tick.symbol, self.volume)
        } else {
            Signal::buy(&tick.symbol, self.volume)
        };
        self.long = !self.long;
        Some(signal)
    }

    fn name(&self) -> &'static str {
        "FlipFlop"
    }
}

fn pipeline(
    kill_switch: &KillSwitch,
    forensic: &ForensicLog,
    volume: f64,
) -> DispatchPipeline<FlipFlop, CommandClient<PaperTerminal>> {
    let limits = Arc::new(RiskLimitsConfig {
        tick_processing_timeout_ms: 1_000,
        // spread losses never count as a streak worth alerting on here
        max_consecutive_losses: u32::MAX,
        ..RiskLimitsConfig::default()
    });
    let ctx = PipelineContext::new(kill_switch.clone(), limits.clone()).with_forensic(forensic.clone());
    let evaluator = RiskEvaluator::new("EURUSD", limits, &AccountConfig::default(), kill_switch.clone());
    let gateway = CommandClient::new(PaperTerminal::new(None), Duration::from_millis(200));
    DispatchPipeline::new(ctx, evaluator, FlipFlop { volume, long: false }, gateway)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Small positions in a calm market never trip the switch; every signal
    /// becomes exactly one order.
    #[test]
    fn prop_no_breach_emits_every_signal(
        moves in prop::collection::vec(-0.0005f64..0.0005, 1..60),
        volume in 0.01f64..0.5,
    ) {
        let kill_switch = KillSwitch::in_memory(Duration::ZERO);
        let forensic = ForensicLog::in_memory();
        let mut p = pipeline(&kill_switch, &forensic, volume);

        let mut bid = 1.1000;
        for (i, delta) in moves.iter().enumerate() {
            bid += delta;
            let outcome = p.process_tick(&TickEvent::new("EURUSD", bid, bid + 0.0001).with_sequence(i as u64 + 1));
            prop_assert_eq!(outcome.action, Action::Emitted);
            prop_assert!(kill_switch.is_safe());
        }

        let stats = p.stats();
        prop_assert_eq!(stats.signals_received, moves.len() as u64);
        prop_assert_eq!(stats.orders_emitted, stats.signals_received);
        prop_assert_eq!(forensic.records().len(), moves.len());
    }

    /// Once a hard drawdown appears at tick N, ticks N.. are all blocked
    #[test]
    fn prop_hard_breach_blocks_from_that_tick(
        calm in 1usize..20,
        after in 1usize..20,
        crash in 0.03f64..0.2,
    ) {
        let kill_switch = KillSwitch::in_memory(Duration::from_secs(3600));
        let forensic = ForensicLog::in_memory();
        // 1 lot held long: the first signal buys, later ones never reach the terminal
        let mut p = pipeline(&kill_switch, &forensic, 1.0);

        let mut seq = 0;
        let mut tick = |bid: f64| {
            seq += 1;
            TickEvent::new("EURUSD", bid, bid + 0.0001).with_sequence(seq)
        };

        p.process_tick(&tick(1.1000));
        // sell back and buy again so a long is open while calm ticks pass
        for _ in 1..calm * 2 + 1 {
            let outcome = p.process_tick(&tick(1.1000));
            prop_assert_eq!(outcome.action, Action::Emitted);
        }
        prop_assert_eq!(p.evaluator().positions().len(), 1);

        let n = p.process_tick(&tick(1.1000 - crash));
        prop_assert_eq!(n.action, Action::BlockedPreSignal);

        for _ in 0..after {
            let outcome = p.process_tick(&tick(1.1000));
            prop_assert!(outcome.action.is_blocked());
        }
        prop_assert_eq!(p.stats().blocked_pre_signal, after as u64 + 1);
    }
}
