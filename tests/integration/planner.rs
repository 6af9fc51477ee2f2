//! Range planner behaviour over a live in-memory topology

use std::collections::HashMap;
use std::sync::Arc;

use kvprober::planner::{Planner, PlannerConfig, RangePlanner, StepOutcome};
use kvprober::store::{KvStore, MemStore, RangeId};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_each_sweep_visits_every_range_once() {
    let store = Arc::new(MemStore::with_range_count(5));
    let planner = RangePlanner::new(store.clone(), PlannerConfig::default());
    let ctx = CancellationToken::new();

    let mut first_sweep = Vec::new();
    for _ in 0..5 {
        first_sweep.push(planner.next(&ctx).await.unwrap().range_id);
    }
    let mut second_sweep = Vec::new();
    for _ in 0..5 {
        second_sweep.push(planner.next(&ctx).await.unwrap().range_id);
    }

    let expected: Vec<RangeId> = store.ranges().iter().map(|r| r.range_id).collect();
    assert_eq!(first_sweep, expected);
    assert_eq!(second_sweep, expected);
}

#[tokio::test]
async fn test_planned_keys_are_served_by_their_range() {
    let store = Arc::new(MemStore::with_range_count(4));
    let planner = RangePlanner::new(store.clone(), PlannerConfig::default());
    let ctx = CancellationToken::new();

    for _ in 0..4 {
        let step = planner.next(&ctx).await.unwrap();
        store.fail_range(step.range_id);
        assert!(store.get(&ctx, &step.key).await.is_err());
        store.heal_range(step.range_id);
        assert_eq!(store.get(&ctx, &step.key).await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_shared_planner_hands_out_each_range_evenly() {
    let store = Arc::new(MemStore::with_range_count(4));
    let planner = Arc::new(RangePlanner::new(store, PlannerConfig::default()));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let planner = planner.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = CancellationToken::new();
            let mut planned = Vec::new();
            for _ in 0..5 {
                planned.push(planner.next(&ctx).await.unwrap().range_id);
            }
            planned
        }));
    }

    let mut counts: HashMap<RangeId, usize> = HashMap::new();
    for task in tasks {
        for range_id in task.await.unwrap() {
            *counts.entry(range_id).or_default() += 1;
        }
    }
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|&n| n == 5));
}

#[tokio::test]
async fn test_reported_failures_steer_planning() {
    let store = Arc::new(MemStore::with_range_count(3));
    let planner = RangePlanner::new(store, PlannerConfig::default());
    let ctx = CancellationToken::new();

    let first = planner.next(&ctx).await.unwrap();
    planner.report(&first, StepOutcome::Failure);
    assert_eq!(planner.quarantined(), 1);

    for _ in 0..4 {
        let step = planner.next(&ctx).await.unwrap();
        assert_ne!(step.range_id, first.range_id);
        planner.report(&step, StepOutcome::Success);
    }

    // Cancellation carries no health signal
    let step = planner.next(&ctx).await.unwrap();
    planner.report(&step, StepOutcome::Cancelled);
    assert_eq!(planner.quarantined(), 1);
}
