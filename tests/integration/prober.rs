//! End-to-end probe cycles against a faulty in-memory store

use std::sync::Arc;
use std::time::Duration;

use kvprober::config::PlanningConfig;
use kvprober::prober::ProbeOutcome;
use kvprober::store::{keys, MemStore, RangeId};
use tokio_util::sync::CancellationToken;

use crate::{enabled_settings, prober_for, quarantined};

#[tokio::test]
async fn test_read_probes_succeed_on_healthy_store() {
    let store = Arc::new(MemStore::with_range_count(4));
    let prober = prober_for(&store, PlanningConfig::default());
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    for _ in 0..8 {
        let outcome = prober.read_probe(&ctx, &settings).await;
        assert!(matches!(outcome, ProbeOutcome::Success { .. }));
    }

    let m = prober.metrics();
    assert_eq!(m.probe_plan_attempts.get(), 8);
    assert_eq!(m.probe_plan_failures.get(), 0);
    assert_eq!(m.read_probe_attempts.get(), 8);
    assert_eq!(m.read_probe_failures.get(), 0);
    assert_eq!(m.read_probe_latency.get_sample_count(), 8);
    assert_eq!(m.write_probe_attempts.get(), 0);
}

#[tokio::test]
async fn test_write_probes_leave_user_data_untouched() {
    let store = Arc::new(MemStore::with_range_count(4));
    store.insert(b"r0001/user".to_vec(), b"alice".to_vec()).unwrap();
    store.insert(b"r0003/user".to_vec(), b"bob".to_vec()).unwrap();
    let prober = prober_for(&store, PlanningConfig::default());
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    for _ in 0..8 {
        let outcome = prober.write_probe(&ctx, &settings).await;
        assert!(matches!(outcome, ProbeOutcome::Success { .. }));
    }

    assert_eq!(store.key_count(), 2);
    assert_eq!(store.raw_get(b"r0001/user"), Some(b"alice".to_vec()));
    assert_eq!(store.raw_get(b"r0003/user"), Some(b"bob".to_vec()));
    for range in store.ranges() {
        assert_eq!(store.raw_get(&range.probe_key()), None);
    }

    let m = prober.metrics();
    assert_eq!(m.write_probe_attempts.get(), 8);
    assert_eq!(m.write_probe_failures.get(), 0);
    assert_eq!(m.write_probe_latency.get_sample_count(), 8);
}

#[tokio::test]
async fn test_read_probe_sees_no_user_data() {
    let store = Arc::new(MemStore::with_range_count(2));
    store.insert(b"".to_vec(), b"root".to_vec()).unwrap();
    store.insert(b"r0001".to_vec(), b"first".to_vec()).unwrap();
    let prober = prober_for(&store, PlanningConfig::default());

    // Probe keys are range-local and never collide with user keys
    for range in store.ranges() {
        let key = range.probe_key();
        assert!(keys::is_range_local(&key));
        assert_ne!(key, range.start_key);
    }

    let outcome = prober
        .read_probe(&CancellationToken::new(), &enabled_settings())
        .await;
    assert!(matches!(outcome, ProbeOutcome::Success { .. }));
}

#[tokio::test]
async fn test_failing_range_is_quarantined() {
    let store = Arc::new(MemStore::with_range_count(4));
    store.fail_range(RangeId(2));
    let prober = prober_for(&store, PlanningConfig::default());
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    let mut failed = 0;
    for _ in 0..10 {
        if prober.read_probe(&ctx, &settings).await == ProbeOutcome::Failed {
            failed += 1;
        }
    }

    assert_eq!(failed, 1);
    let m = prober.metrics();
    assert_eq!(m.read_probe_attempts.get(), 10);
    assert_eq!(m.read_probe_failures.get(), 1);
    assert_eq!(m.read_probe_latency.get_sample_count(), 9);
    assert_eq!(quarantined(&prober, "read"), 1);
    // The write planner is independent and has seen nothing
    assert_eq!(quarantined(&prober, "write"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_quarantine_decays_and_healed_range_is_released() {
    let store = Arc::new(MemStore::with_range_count(4));
    store.fail_range(RangeId(2));
    let planning = PlanningConfig {
        quarantine_ms: 1_000,
        ..PlanningConfig::default()
    };
    let prober = prober_for(&store, planning);
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    for _ in 0..4 {
        prober.write_probe(&ctx, &settings).await;
    }
    assert_eq!(prober.metrics().write_probe_failures.get(), 1);
    assert_eq!(quarantined(&prober, "write"), 1);

    store.heal_range(RangeId(2));
    tokio::time::advance(Duration::from_secs(2)).await;

    for _ in 0..4 {
        let outcome = prober.write_probe(&ctx, &settings).await;
        assert!(matches!(outcome, ProbeOutcome::Success { .. }));
    }
    assert_eq!(prober.metrics().write_probe_failures.get(), 1);
    assert_eq!(quarantined(&prober, "write"), 0);
}

#[tokio::test]
async fn test_every_range_failing_still_probes_each_cycle() {
    let store = Arc::new(MemStore::with_range_count(3));
    for range in store.ranges() {
        store.fail_range(range.range_id);
    }
    let prober = prober_for(&store, PlanningConfig::default());
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    for _ in 0..9 {
        assert_eq!(prober.read_probe(&ctx, &settings).await, ProbeOutcome::Failed);
    }

    let m = prober.metrics();
    assert_eq!(m.probe_plan_failures.get(), 0);
    assert_eq!(m.read_probe_attempts.get(), 9);
    assert_eq!(m.read_probe_failures.get(), 9);
}

#[tokio::test]
async fn test_unavailable_topology_counts_plan_failures() {
    let store = Arc::new(MemStore::with_range_count(4));
    store.set_unavailable("cluster down");
    let prober = prober_for(&store, PlanningConfig::default());
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    assert_eq!(prober.read_probe(&ctx, &settings).await, ProbeOutcome::PlanFailed);
    assert_eq!(prober.write_probe(&ctx, &settings).await, ProbeOutcome::PlanFailed);

    let m = prober.metrics();
    assert_eq!(m.probe_plan_attempts.get(), 2);
    assert_eq!(m.probe_plan_failures.get(), 2);
    assert_eq!(m.read_probe_attempts.get(), 0);
    assert_eq!(m.write_probe_attempts.get(), 0);

    // Recovery needs no restart
    store.set_available();
    let outcome = prober.read_probe(&ctx, &settings).await;
    assert!(matches!(outcome, ProbeOutcome::Success { .. }));
    assert_eq!(m.probe_plan_failures.get(), 2);
}

#[tokio::test]
async fn test_outage_after_topology_cached_fails_probes_not_planning() {
    let store = Arc::new(MemStore::with_range_count(2));
    let prober = prober_for(&store, PlanningConfig::default());
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    assert!(matches!(
        prober.read_probe(&ctx, &settings).await,
        ProbeOutcome::Success { .. }
    ));

    store.set_unavailable("network partition");
    assert_eq!(prober.read_probe(&ctx, &settings).await, ProbeOutcome::Failed);

    let m = prober.metrics();
    assert_eq!(m.probe_plan_failures.get(), 0);
    assert_eq!(m.read_probe_failures.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_times_out() {
    let store = Arc::new(MemStore::with_range_count(2));
    let prober = prober_for(&store, PlanningConfig::default());
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    // Warm the topology cache before slowing the store down
    prober.read_probe(&ctx, &settings).await;
    prober.write_probe(&ctx, &settings).await;
    store.set_latency(Duration::from_secs(30));

    assert_eq!(prober.read_probe(&ctx, &settings).await, ProbeOutcome::Failed);
    assert_eq!(prober.write_probe(&ctx, &settings).await, ProbeOutcome::Failed);

    let m = prober.metrics();
    assert_eq!(m.read_probe_failures.get(), 1);
    assert_eq!(m.write_probe_failures.get(), 1);
    assert_eq!(m.read_probe_latency.get_sample_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_not_a_failure() {
    let store = Arc::new(MemStore::with_range_count(2));
    let prober = Arc::new(prober_for(&store, PlanningConfig::default()));
    let ctx = CancellationToken::new();
    let mut settings = enabled_settings();
    settings.read.timeout = Duration::ZERO;

    prober.read_probe(&ctx, &settings).await;
    store.set_latency(Duration::from_secs(60));

    let task = {
        let prober = prober.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { prober.read_probe(&ctx, &settings).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    ctx.cancel();

    assert_eq!(task.await.unwrap(), ProbeOutcome::Cancelled);
    let m = prober.metrics();
    assert_eq!(m.read_probe_attempts.get(), 2);
    assert_eq!(m.read_probe_failures.get(), 0);
    assert_eq!(quarantined(&prober, "read"), 0);
}

#[tokio::test]
async fn test_probes_follow_range_splits() {
    let store = Arc::new(MemStore::with_range_count(2));
    let planning = PlanningConfig {
        refresh_interval_ms: 0,
        ..PlanningConfig::default()
    };
    let prober = prober_for(&store, planning);
    let ctx = CancellationToken::new();
    let settings = enabled_settings();

    for _ in 0..2 {
        prober.read_probe(&ctx, &settings).await;
    }

    let new_range = store.split(b"r0000x").unwrap();
    store.fail_range(new_range);

    for _ in 0..6 {
        prober.read_probe(&ctx, &settings).await;
    }

    let m = prober.metrics();
    assert_eq!(m.read_probe_attempts.get(), 8);
    assert_eq!(m.read_probe_failures.get(), 1);
    assert_eq!(quarantined(&prober, "read"), 1);

    // Merging the failed range away drops its quarantine entry
    assert!(store.merge_left(b"r0000x"));
    prober.read_probe(&ctx, &settings).await;
    assert_eq!(quarantined(&prober, "read"), 0);
}
