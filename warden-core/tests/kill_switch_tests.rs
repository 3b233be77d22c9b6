// Kill switch durability and cross-instance behaviour
//
// Two KillSwitch handles built on the same marker path stand in for two
// processes sharing one host.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use warden_core::config::{AccountConfig, RiskLimitsConfig};
use warden_core::core::{KillSwitchError, Signal, TickEvent};
use warden_core::engine::{ChannelSignals, DispatchPipeline, PipelineContext, Runtime};
use warden_core::forensic::{read_log, Action, ForensicLog};
use warden_core::gateway::{CommandClient, PaperTerminal, TickSink};
use warden_core::resilience::{KillSwitch, MarkerFile, SwitchStatus};
use warden_core::risk::RiskEvaluator;

#[test]
fn test_engaged_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("kill_switch.lock");

    {
        let ks = KillSwitch::with_marker(&path, Duration::from_secs(300), "run-1").unwrap();
        assert!(ks.is_safe());
        assert!(ks.engage("hard drawdown breach").unwrap());
        // second engage is a no-op and keeps the first reason
        assert!(!ks.engage("something else").unwrap());
        assert_eq!(ks.reason().as_deref(), Some("hard drawdown breach"));
    }

    // "Restart"
    let ks = KillSwitch::with_marker(&path, Duration::from_secs(300), "run-2").unwrap();
    assert!(!ks.is_safe());
    let state = ks.state();
    assert_eq!(state.status, SwitchStatus::Engaged);
    assert_eq!(state.reason.as_deref(), Some("hard drawdown breach"));
    assert_eq!(state.engaged_by.as_deref(), Some("run-1"));
    assert!(state.engaged_at_ns.is_some());

    // cooldown is measured from the original engagement
    assert!(matches!(
        ks.disengage(),
        Err(KillSwitchError::CooldownNotElapsed { .. })
    ));
    assert!(MarkerFile::new(&path).is_present());
}

#[test]
fn test_disengage_removes_marker() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kill_switch.lock");

    let ks = KillSwitch::with_marker(&path, Duration::ZERO, "ctl").unwrap();
    ks.engage("operator halt").unwrap();
    assert!(path.exists());

    ks.disengage().unwrap();
    assert!(ks.is_safe());
    assert!(!path.exists());

    let restarted = KillSwitch::with_marker(&path, Duration::ZERO, "ctl").unwrap();
    assert!(restarted.is_safe());
}

#[test]
fn test_pre_order_gate_sees_other_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kill_switch.lock");

    let ours = KillSwitch::with_marker(&path, Duration::ZERO, "warden").unwrap();
    let operator = KillSwitch::with_marker(&path, Duration::ZERO, "warden-ctl").unwrap();

    let limits = Arc::new(RiskLimitsConfig::default());
    let ctx = PipelineContext::new(ours.clone(), limits.clone());
    let evaluator = RiskEvaluator::new("EURUSD", limits, &AccountConfig::default(), ours.clone());
    let terminal = PaperTerminal::new(None);
    let (tx, rx) = crossbeam::channel::unbounded();
    let mut pipeline = DispatchPipeline::new(
        ctx,
        evaluator,
        ChannelSignals::new(rx),
        CommandClient::new(terminal.clone(), Duration::from_millis(200)),
    );

    // Operator engages from "another process"; our cached flag still says SAFE
    operator.engage("manual halt").unwrap();
    assert!(ours.is_safe());

    tx.send(Signal::buy("EURUSD", 1.0)).unwrap();
    let outcome = pipeline.process_tick(&TickEvent::new("EURUSD", 1.1, 1.1002).with_sequence(1));

    assert_eq!(outcome.action, Action::BlockedPreOrder);
    assert!(outcome.reason.contains("manual halt"));
    assert_eq!(terminal.received(), 0);
    assert!(!ours.is_safe());
}

#[test]
fn test_concurrent_engage_first_writer_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kill_switch.lock");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let path = path.clone();
            thread::spawn(move || {
                let ks = KillSwitch::with_marker(&path, Duration::ZERO, format!("proc-{}", i)).unwrap();
                ks.engage(&format!("breach from proc-{}", i)).unwrap();
                ks.reason().unwrap()
            })
        })
        .collect();

    let reasons: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Every instance ends ENGAGED; the marker holds exactly one writer's reason
    let on_disk = MarkerFile::new(&path).read().unwrap().unwrap();
    assert!(reasons.iter().any(|r| *r == on_disk.reason));
    assert!(on_disk.reason.starts_with("breach from proc-"));
}

#[test]
fn test_shared_switch_halts_every_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let forensic_path = dir.path().join("forensic.jsonl");
    let forensic = ForensicLog::open(&forensic_path).unwrap();

    let kill_switch = KillSwitch::in_memory(Duration::from_secs(300)).with_forensic(forensic.clone());
    let limits = Arc::new(RiskLimitsConfig::default());
    let mut runtime = Runtime::new();
    let mut senders = Vec::new();

    for symbol in ["EURUSD", "GBPUSD"] {
        let ctx = PipelineContext::new(kill_switch.clone(), limits.clone()).with_forensic(forensic.clone());
        let evaluator = RiskEvaluator::new(symbol, limits.clone(), &AccountConfig::default(), kill_switch.clone());
        let (tx, rx) = crossbeam::channel::unbounded();
        let gateway = CommandClient::new(PaperTerminal::new(None), Duration::from_millis(200));
        runtime
            .spawn_pipeline(DispatchPipeline::new(ctx, evaluator, ChannelSignals::new(rx), gateway))
            .unwrap();
        senders.push(tx);
    }

    kill_switch.engage("EURUSD breach").unwrap();

    // Signals for both instruments arrive after the engage
    for tx in &senders {
        tx.send(Signal::buy("EURUSD", 0.1)).unwrap();
    }
    let router = runtime.router();
    router.on_tick(TickEvent::new("EURUSD", 1.1, 1.1002).with_sequence(1));
    router.on_tick(TickEvent::new("GBPUSD", 1.3, 1.3002).with_sequence(2));

    let reports = runtime.shutdown();
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.stats.orders_emitted, 0);
        assert_eq!(report.stats.blocked_pre_signal, 1);
    }

    drop(kill_switch);
    drop(forensic);
    let records = read_log(&forensic_path).unwrap();
    assert_eq!(
        records.iter().filter(|r| r.action == Action::BlockedPreSignal).count(),
        2
    );
    assert_eq!(records[0].action, Action::KillSwitchEngaged);
}
