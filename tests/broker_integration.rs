//! End-to-end behavior of the broker through its public API
//!
//! Every test drives a real `BatchBroker` (scheduler task included) against a
//! scripted send client, with tokio time paused so timer-driven flushes are
//! deterministic.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use sqs_batch_broker::{BatchBroker, BrokerConfig, BrokerError, SendClientError};

use common::{client, manual_config, ScriptedClient};

const KB: usize = 1024;

#[tokio::test(start_paused = true)]
async fn test_twelve_entries_dispatch_as_ten_and_two() {
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    for _ in 0..12 {
        broker.enqueue("orders", vec![b'a'; KB]).await.unwrap();
    }
    broker.force_flush_queue("orders").await;

    assert_eq!(client.batch_sizes(), vec![10, 2]);
    let metrics = broker.get_queue_status("orders").metrics;
    assert_eq!(metrics.batch_split_count, 1);
    assert_eq!(metrics.messages_sent, 12);
    assert_eq!(metrics.batches_sent, 2);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_oversized_entry_dropped_without_dispatch() {
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    broker.enqueue("orders", vec![b'x'; 300 * KB]).await.unwrap();
    let report = broker.force_flush_queue("orders").await;

    assert_eq!(report.oversized, 1);
    assert_eq!(client.call_count(), 0);
    let status = broker.get_queue_status("orders");
    assert_eq!(status.metrics.oversized_message_dropped, 1);
    assert_eq!(status.metrics.messages_failed, 0);
    assert_eq!(status.buffer_size, 0);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_oversized_entry_does_not_block_neighbors() {
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    let before = broker.enqueue("orders", "small-1").await.unwrap();
    broker.enqueue("orders", vec![b'x'; 300 * KB]).await.unwrap();
    let after = broker.enqueue("orders", "small-2").await.unwrap();
    broker.force_flush_queue("orders").await;

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].ids, vec![before, after]);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_rejects_then_recovers_after_drain() {
    let config = BrokerConfig {
        max_buffer_size_per_queue: 5,
        ..manual_config()
    };
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(config, client.clone()).unwrap();

    for i in 0..5 {
        broker.enqueue("orders", format!("m{}", i)).await.unwrap();
    }
    let rejected = broker.enqueue("orders", "m5").await;
    match rejected {
        Err(BrokerError::BackpressureRejected { queue, capacity }) => {
            assert_eq!(queue, "orders");
            assert_eq!(capacity, 5);
        }
        other => panic!("expected backpressure, got {:?}", other),
    }
    assert_eq!(broker.get_queue_status("orders").buffer_size, 5);
    assert_eq!(
        broker.get_queue_status("orders").metrics.buffer_overflow_count,
        1
    );

    broker.force_flush_queue("orders").await;
    broker.enqueue("orders", "m6").await.unwrap();
    assert_eq!(broker.get_queue_status("orders").buffer_size, 1);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_dropped_on_third_attempt() {
    let config = BrokerConfig {
        max_retry_attempts: 3,
        ..manual_config()
    };
    let client = client(ScriptedClient::failing("poison", "ThrottlingException"));
    let broker = BatchBroker::new(config, client.clone()).unwrap();

    let id = broker.enqueue("orders", "poison-pill").await.unwrap();

    // First failure parks the entry for 2s
    let report = broker.force_flush_queue("orders").await;
    assert_eq!(report.requeued, 1);
    assert_eq!(broker.get_queue_status("orders").failed_message_count, 1);

    // Nothing is due before the backoff elapses
    let report = broker.force_flush_queue("orders").await;
    assert_eq!(report.drained, 0);

    // Second failure parks it for 4s
    tokio::time::advance(Duration::from_secs(2)).await;
    let report = broker.force_flush_queue("orders").await;
    assert_eq!(report.requeued, 1);

    // Third failure reaches the limit
    tokio::time::advance(Duration::from_secs(4)).await;
    let report = broker.force_flush_queue("orders").await;
    assert_eq!(report.exhausted, 1);
    assert_eq!(report.requeued, 0);

    assert_eq!(client.attempts_by_id()[&id], 3);
    let status = broker.get_queue_status("orders");
    assert_eq!(status.metrics.messages_failed, 1);
    assert_eq!(status.metrics.retry_exhausted_count, 1);
    assert_eq!(status.metrics.retry_requeued_count, 2);
    assert_eq!(status.failed_message_count, 0);
    assert_eq!(status.buffer_size, 0);

    // Never offered a fourth time
    tokio::time::advance(Duration::from_secs(60)).await;
    broker.force_flush_queue("orders").await;
    assert_eq!(client.attempts_by_id()[&id], 3);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_flushes_every_queue_and_stops_scheduler() {
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    for i in 0..3 {
        broker.enqueue("orders", format!("o{}", i)).await.unwrap();
        broker.enqueue("invoices", format!("i{}", i)).await.unwrap();
    }
    assert!(broker.get_metrics().background_thread_alive);

    let report = broker.close().await;

    assert!(report.is_clean());
    let mut queues: Vec<_> = client.calls().into_iter().map(|c| c.queue_name).collect();
    queues.sort();
    queues.dedup();
    assert_eq!(queues, vec!["invoices".to_string(), "orders".to_string()]);
    assert_eq!(client.total_entries(), 6);

    let metrics = broker.get_metrics();
    assert!(!metrics.background_thread_alive);
    assert_eq!(metrics.buffer_sizes["orders"], 0);
    assert_eq!(metrics.buffer_sizes["invoices"], 0);
    assert_eq!(metrics.total(|m| m.messages_sent), 6);
}

#[tokio::test(start_paused = true)]
async fn test_close_gives_parked_retries_a_last_attempt() {
    let client = client(ScriptedClient::failing("flaky", "ServiceUnavailable"));
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    let id = broker.enqueue("orders", "flaky-entry").await.unwrap();
    broker.force_flush_queue("orders").await;
    assert_eq!(client.attempts_by_id()[&id], 1);

    let report = broker.close().await;
    assert_eq!(client.attempts_by_id()[&id], 2);
    assert_eq!(report.entries_lost, 1);
    assert!(!report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_flush_driven_by_scheduler() {
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(BrokerConfig::default(), client.clone()).unwrap();

    broker.enqueue("orders", "a").await.unwrap();
    broker.enqueue("orders", "b").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.call_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.batch_sizes(), vec![2]);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_batch_interval_caps_latency_under_steady_trickle() {
    let config = BrokerConfig {
        default_batch_interval: 0.5,
        default_idle_timeout: 0.2,
        ..Default::default()
    };
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(config, client.clone()).unwrap();

    // One entry every 100ms keeps the queue from ever going idle
    for i in 0..7 {
        broker.enqueue("orders", format!("tick-{}", i)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(client.call_count() >= 1);
    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_queue_flushes_on_enqueue() {
    let config = BrokerConfig {
        group_batch_intervals: HashMap::from([("urgent".to_string(), 0.0)]),
        ..manual_config()
    };
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(config, client.clone()).unwrap();

    broker.enqueue("urgent", "now").await.unwrap();
    broker.enqueue("routine", "later").await.unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].queue_name, "urgent");
    assert_eq!(broker.get_queue_status("routine").buffer_size, 1);
    assert_eq!(broker.get_queue_status("urgent").batch_interval, 0.0);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_namespace_applies_to_physical_queue_only() {
    let config = BrokerConfig {
        namespace: "staging-".to_string(),
        ..manual_config()
    };
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(config, client.clone()).unwrap();

    broker.enqueue("orders", "a").await.unwrap();
    broker.force_flush_queue("orders").await;

    assert_eq!(client.calls()[0].queue_name, "staging-orders");
    let metrics = broker.get_metrics();
    assert_eq!(metrics.metrics["orders"].messages_sent, 1);
    assert!(!metrics.metrics.contains_key("staging-orders"));

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_failure_routes_each_entry() {
    let client = client(
        ScriptedClient::new()
            .with_rule("bad", "InvalidMessageContents", true)
            .with_rule("slow", "ThrottlingException", false),
    );
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    broker.enqueue("orders", "ok-1").await.unwrap();
    broker.enqueue("orders", "bad-1").await.unwrap();
    broker.enqueue("orders", "slow-1").await.unwrap();
    broker.enqueue("orders", "ok-2").await.unwrap();

    let report = broker.force_flush_queue("orders").await;
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.requeued, 1);

    let status = broker.get_queue_status("orders");
    assert_eq!(status.metrics.messages_sent, 2);
    assert_eq!(status.metrics.messages_failed, 1);
    assert_eq!(status.failed_message_count, 1);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_retried_entry_lands_behind_newer_entries() {
    let client = client(ScriptedClient::new());
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    let old = broker.enqueue("orders", "old").await.unwrap();
    client.fail_next_call(SendClientError::Transport("connection reset".into()));
    broker.force_flush_queue("orders").await;

    let newer = broker.enqueue("orders", "newer").await.unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;
    broker.force_flush_queue("orders").await;

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].ids, vec![newer, old]);
    assert_eq!(broker.get_queue_status("orders").metrics.messages_sent, 2);

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_timeout_is_retried() {
    let config = BrokerConfig {
        send_timeout: 1.0,
        ..manual_config()
    };
    let client = client(ScriptedClient::new().with_delay(Duration::from_secs(10)));
    let broker = BatchBroker::new(config, client.clone()).unwrap();

    broker.enqueue("orders", "a").await.unwrap();
    let report = broker.force_flush_queue("orders").await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.requeued, 1);
    assert_eq!(broker.get_queue_status("orders").failed_message_count, 1);

    broker.clear_queue_buffer("orders");
    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_discards_buffered_and_parked_entries() {
    let client = client(ScriptedClient::failing("flaky", "ServiceUnavailable"));
    let broker = BatchBroker::new(manual_config(), client.clone()).unwrap();

    broker.enqueue("orders", "flaky-1").await.unwrap();
    broker.force_flush_queue("orders").await;
    broker.enqueue("orders", "ok-1").await.unwrap();
    broker.enqueue("orders", "ok-2").await.unwrap();

    assert_eq!(broker.clear_queue_buffer("orders"), 3);
    assert_eq!(broker.clear_queue_buffer("orders"), 0);
    assert_eq!(broker.clear_queue_buffer("never-used"), 0);

    let report = broker.close().await;
    assert_eq!(client.call_count(), 1);
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_queue_status_reports_resolved_policy() {
    let config = BrokerConfig {
        group_idle_timeouts: HashMap::from([("bulk".to_string(), 2.5)]),
        ..BrokerConfig::default()
    };
    let broker = BatchBroker::new(config, client(ScriptedClient::new())).unwrap();

    let status = broker.get_queue_status("bulk");
    assert_eq!(status.queue_name, "bulk");
    assert_eq!(status.idle_timeout, 2.5);
    assert_eq!(status.batch_interval, 1.0);
    assert_eq!(status.max_buffer_size_per_queue, 5000);
    assert_eq!(status.max_retry_attempts, 3);
    assert!(status.background_thread_alive);
    assert!(status.oldest_pending_age.is_none());

    broker.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_after_close_is_rejected() {
    let broker = BatchBroker::new(manual_config(), client(ScriptedClient::new())).unwrap();
    broker.close().await;

    let result = broker.enqueue("orders", "late").await;
    assert!(matches!(result, Err(BrokerError::ShutdownRejected { .. })));
    assert!(!broker.is_running());
}
