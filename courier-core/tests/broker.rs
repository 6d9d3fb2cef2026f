//! End-to-end tests for DurableBroker over the in-memory log store
//!
//! These cover the delivery contract:
//! - Every record reaches every group at least once
//! - Handler failures stay contained
//! - Replay and history are repeatable side reads

use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::{
    AuctionEnded, BidderRegistered, BrokerConfig, DurableBroker, Event, EventHandler,
    EventRegistry, HandlerResult, Payload, RecordId, TypedEvent, WorkerState, handler_fn,
};
use courier_log::{LogStore, MemoryLogStore};
use uuid::Uuid;

type Seen = Arc<Mutex<Vec<Event>>>;

fn fast_config() -> BrokerConfig {
    BrokerConfig::default()
        .with_block_timeout(Duration::from_millis(20))
        .with_error_backoff(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(1))
        .with_consumer_name("it-consumer")
}

async fn open(store: Arc<MemoryLogStore>) -> DurableBroker {
    DurableBroker::open(
        store,
        Arc::new(EventRegistry::with_auction_events()),
        fast_config(),
    )
    .await
    .unwrap()
}

fn recorder(name: &str, seen: Seen) -> Arc<dyn EventHandler> {
    handler_fn(name, move |event| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(event);
            HandlerResult::Ok(())
        }
    })
}

async fn always_fails(_event: Event) -> HandlerResult {
    Err("payment gateway down".into())
}

async fn always_panics(_event: Event) -> HandlerResult {
    panic!("handler bug")
}

/// Poll until `seen` holds `n` events or give up.
async fn wait_for_count(seen: &Seen, n: usize) {
    for _ in 0..200 {
        if seen.lock().unwrap().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} events, saw {}",
        n,
        seen.lock().unwrap().len()
    );
}

fn ended(price: f64) -> AuctionEnded {
    AuctionEnded {
        auction_id: Uuid::new_v4(),
        winning_bidder_id: Uuid::new_v4(),
        winning_price: price,
    }
}

#[tokio::test]
async fn history_returns_published_bidder() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let bidder = BidderRegistered {
        bidder_id: Uuid::new_v4(),
        name: "Alice".to_string(),
        credit_card_token: "tok_1".to_string(),
    };

    broker.publish_event(&bidder).await.unwrap();

    let history = broker.get_history("BidderRegistered", 1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, "BidderRegistered");
    assert_eq!(history[0].data.get_str("name"), Some("Alice"));
    assert_eq!(history[0].data.get_str("credit_card_token"), Some("tok_1"));

    broker.close().await.unwrap();
}

#[tokio::test]
async fn auction_ended_is_delivered_once_and_typed() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let seen: Seen = Arc::default();
    broker
        .subscribe_in_group("AuctionEnded", "g1", recorder("payments", Arc::clone(&seen)))
        .await
        .unwrap();

    let event = ended(99.99);
    broker.publish_event(&event).await.unwrap();

    wait_for_count(&seen, 1).await;
    // Give a duplicate delivery the chance to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*seen.lock().unwrap(), vec![Event::AuctionEnded(event)]);
    broker.close().await.unwrap();
}

#[tokio::test]
async fn failing_handlers_do_not_starve_siblings() {
    let store = Arc::new(MemoryLogStore::new());
    let broker = open(Arc::clone(&store)).await;
    let seen: Seen = Arc::default();

    broker
        .subscribe_in_group("AuctionEnded", "g1", handler_fn("fails", always_fails))
        .await
        .unwrap();
    broker
        .subscribe_in_group("AuctionEnded", "g1", handler_fn("panics", always_panics))
        .await
        .unwrap();
    broker
        .subscribe_in_group("AuctionEnded", "g1", recorder("records", Arc::clone(&seen)))
        .await
        .unwrap();

    broker.publish_event(&ended(1.0)).await.unwrap();
    broker.publish_event(&ended(2.0)).await.unwrap();

    wait_for_count(&seen, 2).await;
    broker.close().await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn every_group_gets_every_record() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let billing: Seen = Arc::default();
    let audit: Seen = Arc::default();

    // Published before anyone subscribed: groups start at the beginning.
    broker.publish_event(&ended(5.0)).await.unwrap();

    broker
        .subscribe_in_group("AuctionEnded", "billing", recorder("billing", Arc::clone(&billing)))
        .await
        .unwrap();
    broker
        .subscribe_in_group("AuctionEnded", "audit", recorder("audit", Arc::clone(&audit)))
        .await
        .unwrap();
    broker.publish_event(&ended(6.0)).await.unwrap();

    wait_for_count(&billing, 2).await;
    wait_for_count(&audit, 2).await;
    broker.close().await.unwrap();
}

#[tokio::test]
async fn records_are_acknowledged_after_dispatch() {
    let store = Arc::new(MemoryLogStore::new());
    let broker = open(Arc::clone(&store)).await;
    let seen: Seen = Arc::default();
    broker
        .subscribe_in_group("AuctionEnded", "g1", handler_fn("fails", always_fails))
        .await
        .unwrap();
    broker
        .subscribe_in_group("AuctionEnded", "g1", recorder("records", Arc::clone(&seen)))
        .await
        .unwrap();

    broker.publish_event(&ended(3.0)).await.unwrap();
    wait_for_count(&seen, 1).await;
    broker.close().await.unwrap();

    assert_eq!(store.pending_len("events:AuctionEnded", "g1").await, 0);
}

#[tokio::test]
async fn replay_is_ordered_complete_and_repeatable() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let seen: Seen = Arc::default();

    let prices = [10.0, 20.0, 30.0];
    for price in prices {
        broker.publish_event(&ended(price)).await.unwrap();
    }

    // Registered through a group whose loop consumes and acknowledges
    // everything; replay must still deliver the full history.
    broker
        .subscribe_in_group("AuctionEnded", "g1", recorder("live", Arc::clone(&seen)))
        .await
        .unwrap();
    wait_for_count(&seen, 3).await;
    seen.lock().unwrap().clear();

    let first = broker
        .replay("AuctionEnded", RecordId::MIN, None)
        .await
        .unwrap();
    let first_pass: Vec<Event> = seen.lock().unwrap().drain(..).collect();

    let second = broker
        .replay("AuctionEnded", RecordId::MIN, None)
        .await
        .unwrap();
    let second_pass: Vec<Event> = seen.lock().unwrap().drain(..).collect();

    assert_eq!(first.replayed, 3);
    assert!(first.failures.is_empty());
    assert_eq!(second, first);
    assert_eq!(first_pass, second_pass);

    let replayed_prices: Vec<f64> = first_pass
        .iter()
        .map(|e| match e {
            Event::AuctionEnded(a) => a.winning_price,
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(replayed_prices, prices.to_vec());

    broker.close().await.unwrap();
}

#[tokio::test]
async fn replay_from_id_and_count() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let seen: Seen = Arc::default();
    broker
        .subscribe_in_group("T", "g", recorder("r", Arc::clone(&seen)))
        .await
        .unwrap();
    let mut ids = Vec::new();
    for n in 0..4_i64 {
        ids.push(
            broker
                .publish("T", &Payload::new().with("n", n), None)
                .await
                .unwrap(),
        );
    }
    wait_for_count(&seen, 4).await;
    seen.lock().unwrap().clear();

    let report = broker.replay("T", ids[1], Some(2)).await.unwrap();
    assert_eq!(report.replayed, 2);

    let ns: Vec<f64> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.to_payload().get_f64("n").unwrap())
        .collect();
    assert_eq!(ns, vec![1.0, 2.0]);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn replay_reports_handler_failures() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    broker.publish("T", &Payload::new(), None).await.unwrap();
    broker
        .subscribe_in_group("T", "g", handler_fn("fails", always_fails))
        .await
        .unwrap();

    let report = broker.replay("T", RecordId::MIN, None).await.unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].handler, "fails");

    broker.close().await.unwrap();
}

#[tokio::test]
async fn history_is_newest_first_bounded_and_stable() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let mut ids = Vec::new();
    for n in 0..5_i64 {
        ids.push(
            broker
                .publish("T", &Payload::new().with("n", n), None)
                .await
                .unwrap(),
        );
    }

    let history = broker.get_history("T", 3).await.unwrap();
    let history_ids: Vec<RecordId> = history.iter().map(|h| h.id).collect();
    assert_eq!(history_ids, vec![ids[4], ids[3], ids[2]]);
    assert_eq!(broker.get_history("T", 3).await.unwrap(), history);

    assert_eq!(broker.get_history("T", 50).await.unwrap().len(), 5);
    assert!(broker.get_history("Other", 5).await.unwrap().is_empty());

    broker.close().await.unwrap();
}

#[tokio::test]
async fn ensure_group_twice_keeps_cursor() {
    let store = Arc::new(MemoryLogStore::new());
    let broker = open(Arc::clone(&store)).await;
    let seen: Seen = Arc::default();

    broker
        .subscribe_in_group("T", "g", recorder("r", Arc::clone(&seen)))
        .await
        .unwrap();
    broker.publish("T", &Payload::new(), None).await.unwrap();
    wait_for_count(&seen, 1).await;

    // Second subscription re-runs ensure_group on a consumed group.
    store.ensure_group("events:T", "g").await.unwrap();
    broker
        .subscribe_in_group("T", "g", recorder("r2", Arc::clone(&seen)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The first record is not delivered again.
    assert_eq!(seen.lock().unwrap().len(), 1);
    broker.close().await.unwrap();
}

#[tokio::test]
async fn consumers_recover_after_store_outage() {
    let store = Arc::new(MemoryLogStore::new());
    let broker = open(Arc::clone(&store)).await;
    let seen: Seen = Arc::default();
    broker
        .subscribe_in_group("T", "g", recorder("r", Arc::clone(&seen)))
        .await
        .unwrap();
    broker.publish("T", &Payload::new(), None).await.unwrap();
    wait_for_count(&seen, 1).await;

    store.set_available(false);
    assert!(broker.publish("T", &Payload::new(), None).await.is_err());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_ne!(broker.worker_state("T", "g").await, Some(WorkerState::Stopped));

    store.set_available(true);
    broker.publish("T", &Payload::new(), None).await.unwrap();
    wait_for_count(&seen, 2).await;

    broker.close().await.unwrap();
}

#[tokio::test]
async fn stream_info_tracks_publishes_and_groups() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let first = broker.publish("T", &Payload::new(), None).await.unwrap();
    let last = broker.publish("T", &Payload::new(), None).await.unwrap();
    broker
        .subscribe_in_group("T", "g", recorder("r", Arc::default()))
        .await
        .unwrap();

    let info = broker.get_stream_info("T").await.unwrap();
    assert_eq!(info.length, 2);
    assert_eq!(info.first_id, Some(first));
    assert_eq!(info.last_id, Some(last));
    assert_eq!(info.group_count, 1);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn unknown_shape_is_delivered_raw() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let seen: Seen = Arc::default();
    broker
        .subscribe_in_group("AuctionEnded", "g", recorder("r", Arc::clone(&seen)))
        .await
        .unwrap();

    // Missing winning_price, so no typed variant matches.
    let partial = Payload::new().with("auction_id", Uuid::new_v4());
    broker.publish("AuctionEnded", &partial, None).await.unwrap();

    wait_for_count(&seen, 1).await;
    assert_eq!(*seen.lock().unwrap(), vec![Event::Raw(partial)]);
    broker.close().await.unwrap();
}

#[tokio::test]
async fn typed_event_type_name_matches_stream() {
    let store = Arc::new(MemoryLogStore::new());
    let broker = open(Arc::clone(&store)).await;
    broker.publish_event(&ended(1.0)).await.unwrap();

    let stream = broker.config().stream_name(AuctionEnded::EVENT_TYPE);
    assert_eq!(store.stream_info(&stream).await.unwrap().length, 1);
    broker.close().await.unwrap();
}

#[tokio::test]
async fn replay_to_reaches_only_given_handlers() {
    let broker = open(Arc::new(MemoryLogStore::new())).await;
    let subscribed: Seen = Arc::default();
    let inspector: Seen = Arc::default();
    broker.publish("T", &Payload::new(), None).await.unwrap();
    broker
        .subscribe_in_group("T", "g", recorder("live", Arc::clone(&subscribed)))
        .await
        .unwrap();
    wait_for_count(&subscribed, 1).await;

    let report = broker
        .replay_to(
            "T",
            RecordId::MIN,
            None,
            &[recorder("inspector", Arc::clone(&inspector))],
        )
        .await
        .unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(inspector.lock().unwrap().len(), 1);
    assert_eq!(subscribed.lock().unwrap().len(), 1);
    broker.close().await.unwrap();
}

#[tokio::test]
async fn failed_subscribe_leaves_nothing_registered() {
    let store = Arc::new(MemoryLogStore::new());
    let broker = open(Arc::clone(&store)).await;
    let seen: Seen = Arc::default();
    let handler = recorder("payments", Arc::clone(&seen));

    store.set_available(false);
    let err = broker
        .subscribe_in_group("AuctionEnded", "g1", Arc::clone(&handler))
        .await
        .unwrap_err();
    assert!(matches!(err, courier_core::BrokerError::StoreUnavailable(_)));

    store.set_available(true);
    broker
        .subscribe_in_group("AuctionEnded", "g1", handler)
        .await
        .unwrap();
    broker.publish_event(&ended(4.0)).await.unwrap();

    wait_for_count(&seen, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    broker.close().await.unwrap();
}

#[test]
fn zero_read_count_in_toml_is_rejected() {
    let result = BrokerConfig::from_toml_str("read_count = 0\nblock_timeout = \"20ms\"");
    assert!(matches!(result, Err(courier_core::ConfigError::Parse(_))));
}

#[tokio::test]
async fn close_abandons_a_handler_that_outlives_the_timeout() {
    let store = Arc::new(MemoryLogStore::new());
    let broker = DurableBroker::open(
        store,
        Arc::new(EventRegistry::with_auction_events()),
        fast_config().with_shutdown_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    let seen: Seen = Arc::default();
    let entered = Arc::clone(&seen);
    broker
        .subscribe_in_group(
            "AuctionEnded",
            "g1",
            handler_fn("slow", move |event| {
                let entered = Arc::clone(&entered);
                async move {
                    entered.lock().unwrap().push(event);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    HandlerResult::Ok(())
                }
            }),
        )
        .await
        .unwrap();
    broker.publish_event(&ended(8.0)).await.unwrap();
    wait_for_count(&seen, 1).await;

    let begun = tokio::time::Instant::now();
    broker.close().await.unwrap();
    assert!(begun.elapsed() < Duration::from_secs(2));
    assert!(broker.is_closed());
    // The abandoned loop is still mid-dispatch, not killed.
    assert_eq!(
        broker.worker_state("AuctionEnded", "g1").await,
        Some(WorkerState::Dispatching)
    );

    let again = tokio::time::Instant::now();
    broker.close().await.unwrap();
    assert!(again.elapsed() < Duration::from_millis(50));
}
