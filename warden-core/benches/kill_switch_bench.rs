// Kill switch hot-path benchmarks
//
// The pre-signal gate runs on every tick, so is_safe() must stay a single
// atomic load. confirm_safe() adds one stat of the marker file.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use warden_core::resilience::KillSwitch;

fn bench_is_safe(c: &mut Criterion) {
    let mut group = c.benchmark_group("kill_switch");
    group.measurement_time(Duration::from_secs(2));

    let in_memory = KillSwitch::in_memory(Duration::ZERO);
    group.bench_function("is_safe_in_memory", |b| {
        b.iter(|| black_box(in_memory.is_safe()))
    });

    let engaged = KillSwitch::in_memory(Duration::from_secs(3600));
    let _ = engaged.engage("bench");
    group.bench_function("is_safe_engaged", |b| b.iter(|| black_box(engaged.is_safe())));

    group.finish();
}

fn bench_confirm_safe(c: &mut Criterion) {
    let mut group = c.benchmark_group("kill_switch_marker");
    group.measurement_time(Duration::from_secs(2));

    let dir = tempfile::tempdir().unwrap();
    let marked = KillSwitch::with_marker(dir.path().join("kill_switch.lock"), Duration::ZERO, "bench")
        .unwrap();

    group.bench_function("is_safe_marker_backed", |b| {
        b.iter(|| black_box(marked.is_safe()))
    });
    group.bench_function("confirm_safe_no_marker", |b| {
        b.iter(|| black_box(marked.confirm_safe()))
    });

    group.finish();
}

criterion_group!(benches, bench_is_safe, bench_confirm_safe);
criterion_main!(benches);
