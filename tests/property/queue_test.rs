// tests/property/queue_test.rs

//! Queue invariants: FIFO order equals enqueue order, and retry bounds hold
//! for any retry limit.

use edgelink::core::sync::SyncQueue;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_flush_order_equals_enqueue_order(
        payloads in prop::collection::vec("[a-z0-9]{1,12}", 1..30),
        batch_size in 1usize..8,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let queue = SyncQueue::open_in_memory(100, 3, batch_size).unwrap();
            for payload in &payloads {
                queue
                    .enqueue("user_settings", &json!({ "v": payload }), None)
                    .unwrap();
            }

            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen_handler = seen.clone();
            let report = queue
                .flush(move |_, payload| {
                    let seen = seen_handler.clone();
                    async move {
                        seen.lock().push(payload["v"].as_str().unwrap().to_string());
                        true
                    }
                })
                .await;

            assert_eq!(report.sent, payloads.len());
            assert_eq!(report.remaining, 0);
            assert_eq!(*seen.lock(), payloads);
        });
    }

    #[test]
    fn prop_item_fails_after_exactly_max_retry_flushes(max_retry in 1u32..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let queue = SyncQueue::open_in_memory(10, max_retry, 5).unwrap();
            queue.enqueue("op", &json!({"n": 1}), None).unwrap();

            for round in 1..=max_retry {
                let before = queue.statistics();
                assert_eq!(before.failed, 0, "not failed before round {round}");
                queue.flush(|_, _| async { false }).await;
            }

            let stats = queue.statistics();
            assert_eq!(stats.failed, 1);
            assert_eq!(stats.pending, 0);
        });
    }

    #[test]
    fn prop_capacity_bounds_pending_rows(
        max_size in 1usize..10,
        attempts in 1usize..25,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let queue = SyncQueue::open_in_memory(max_size, 3, 5).unwrap();
            let mut accepted = 0;
            for n in 0..attempts {
                if queue.enqueue("op", &json!({"n": n}), None).is_some() {
                    accepted += 1;
                }
            }
            assert_eq!(accepted, attempts.min(max_size));
            assert_eq!(queue.size(), attempts.min(max_size));
        });
    }
}
