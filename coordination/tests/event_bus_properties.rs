//! Event bus property tests: invariants checked across varied capacities
//! and publish volumes.
//!
//! Tests verify:
//! - History never exceeds capacity and keeps the newest events
//! - `history` returns most recent first and honours limit and type filter
//! - `workflow_events` returns insertion order
//! - A full subscriber queue never affects other subscribers
//! - Unsubscribe is idempotent and lowers the subscriber count exactly once

use std::sync::Arc;

use workflow_coordination::events::{Event, EventBus, EventBusConfig, EventType};

fn bus(history_capacity: usize, subscriber_capacity: usize) -> EventBus {
    EventBus::with_config(EventBusConfig {
        history_capacity,
        subscriber_capacity,
    })
}

/// Alternate started/completed events across a handful of workflows.
fn publish_mixed(bus: &EventBus, count: usize) {
    for i in 0..count {
        let event_type = if i % 2 == 0 {
            EventType::WorkflowStarted
        } else {
            EventType::WorkflowCompleted
        };
        bus.publish(
            Event::new(event_type)
                .workflow(format!("wf-{}", i % 3))
                .with_id(format!("evt-{i}")),
        );
    }
}

// ── Property: history bounded, newest retained ──────────────────────

#[test]
fn prop_history_bounded_and_newest_kept() {
    for capacity in [1, 5, 16, 100] {
        for count in [0, capacity / 2, capacity, capacity * 3 + 1] {
            let bus = bus(capacity, 8);
            publish_mixed(&bus, count);

            assert_eq!(bus.history_len(), count.min(capacity));

            let history = bus.history(usize::MAX, &[]);
            let expected: Vec<String> = (count.saturating_sub(capacity)..count)
                .rev()
                .map(|i| format!("evt-{i}"))
                .collect();
            let actual: Vec<String> = history.into_iter().map(|e| e.id).collect();
            assert_eq!(actual, expected, "capacity={capacity} count={count}");
        }
    }
}

// ── Property: limit and type filter ─────────────────────────────────

#[test]
fn prop_history_limit_and_filter() {
    let bus = bus(1000, 8);
    publish_mixed(&bus, 40);

    for limit in [0, 1, 7, 20, 50] {
        let started = bus.history(limit, &[EventType::WorkflowStarted]);
        assert_eq!(started.len(), limit.min(20));
        assert!(started
            .iter()
            .all(|e| e.event_type == EventType::WorkflowStarted));
        let indices: Vec<usize> = started
            .iter()
            .map(|e| e.id.trim_start_matches("evt-").parse().unwrap())
            .collect();
        assert!(indices.windows(2).all(|w| w[0] > w[1]));
    }

    let none = bus.history(10, &[EventType::AgentHeartbeat]);
    assert!(none.is_empty());
}

// ── Property: per-workflow view is in publish order ─────────────────

#[test]
fn prop_workflow_events_in_insertion_order() {
    let bus = bus(1000, 8);
    publish_mixed(&bus, 30);

    for wf in 0..3 {
        let events = bus.workflow_events(&format!("wf-{wf}"));
        assert_eq!(events.len(), 10);
        let indices: Vec<usize> = events
            .iter()
            .map(|e| e.id.trim_start_matches("evt-").parse().unwrap())
            .collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        assert!(indices.iter().all(|i| i % 3 == wf));
    }

    assert!(bus.workflow_events("wf-unknown").is_empty());
}

// ── Property: drop-on-full is per subscriber ────────────────────────

#[test]
fn prop_full_queue_isolated() {
    for queue in [1, 4, 32] {
        let bus = bus(1000, queue);
        let mut stalled = bus.subscribe([]);
        let mut drained = bus.subscribe([]);

        let total = queue * 2 + 3;
        let mut drained_count = 0;
        for i in 0..total {
            bus.publish(Event::new(EventType::AgentHeartbeat).with_id(format!("hb-{i}")));
            while drained.try_recv().is_some() {
                drained_count += 1;
            }
        }
        assert_eq!(drained_count, total);

        let mut kept = Vec::new();
        while let Some(event) = stalled.try_recv() {
            kept.push(event.id);
        }
        let expected: Vec<String> = (0..queue).map(|i| format!("hb-{i}")).collect();
        assert_eq!(kept, expected, "queue={queue}");
    }
}

// ── Scenario: filtered subscription ─────────────────────────────────

#[tokio::test]
async fn filtered_subscription_receives_only_started() {
    let bus = EventBus::new();
    let mut sub = bus.subscribe([EventType::WorkflowStarted]);

    bus.publish(Event::new(EventType::WorkflowCompleted).workflow("wf-1"));
    bus.publish(Event::new(EventType::WorkflowStarted).workflow("wf-1"));

    let event = sub.recv().await.unwrap();
    assert_eq!(event.event_type, EventType::WorkflowStarted);
    assert!(sub.try_recv().is_none());
}

// ── Property: unsubscribe idempotent ────────────────────────────────

#[test]
fn prop_unsubscribe_idempotent() {
    for n in [1usize, 3, 10] {
        let bus = EventBus::new();
        let subs: Vec<_> = (0..n).map(|_| bus.subscribe([])).collect();
        assert_eq!(bus.subscriber_count(), n);

        for (i, sub) in subs.iter().enumerate() {
            bus.unsubscribe(sub.id());
            bus.unsubscribe(sub.id());
            assert_eq!(bus.subscriber_count(), n - i - 1);
        }
        bus.unsubscribe("sub-0");
        assert_eq!(bus.subscriber_count(), 0);
    }
}

// ── Concurrency: many publishers, one subscriber ────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_all_recorded() {
    let bus = Arc::new(bus(10_000, 10_000));
    let mut sub = bus.subscribe([]);

    let mut handles = Vec::new();
    for p in 0..8 {
        let bus = bus.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..100 {
                bus.publish(
                    Event::new(EventType::StepCompleted)
                        .workflow(format!("wf-{p}"))
                        .with_id(format!("{p}-{i}")),
                );
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(bus.history_len(), 800);
    let mut received = 0;
    while sub.try_recv().is_some() {
        received += 1;
    }
    assert_eq!(received, 800);

    // Each producer's own events stay in order.
    for p in 0..8 {
        let ids: Vec<usize> = bus
            .workflow_events(&format!("wf-{p}"))
            .into_iter()
            .map(|e| e.id.split('-').nth(1).unwrap().parse().unwrap())
            .collect();
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
    }
}
