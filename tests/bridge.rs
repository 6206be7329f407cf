//! Integration tests for the path from change feed to delivery.

mod helpers;

use enrollwatch::bridge::{forward_additions, watch_collection};
use enrollwatch::core::{ChangeEvent, ChatId, Document};
use enrollwatch::feed::MemoryStore;
use enrollwatch::notification::Dispatcher;
use enrollwatch::scheduler::{MainLoop, MainLoopHandle};
use helpers::{eventually, fields, MockMessenger};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const COLLECTION: &str = "students";
const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    store: MemoryStore,
    messenger: MockMessenger,
    dispatcher: Arc<Dispatcher>,
    main_loop: MainLoopHandle,
    shutdown_tx: watch::Sender<bool>,
    loop_task: tokio::task::JoinHandle<()>,
}

fn start(messenger: MockMessenger) -> Harness {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (main_loop, handle) = MainLoop::new();
    let loop_task = tokio::spawn(main_loop.run(shutdown_rx));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(messenger.clone()),
        ChatId::new("-100123"),
    ));
    Harness {
        store: MemoryStore::new(),
        messenger,
        dispatcher,
        main_loop: handle,
        shutdown_tx,
        loop_task,
    }
}

#[tokio::test]
async fn test_new_student_is_delivered_to_fixed_destination() {
    // Arrange
    let h = start(MockMessenger::new());
    let subscription =
        watch_collection(&h.store, COLLECTION, h.main_loop.clone(), h.dispatcher.clone()).unwrap();

    // Act
    h.store.insert(
        COLLECTION,
        "s1",
        fields(json!({ "name": "Ada", "phone": "555-1212" })),
    );

    // Assert
    assert!(eventually(WAIT, || h.messenger.attempt_count() == 1).await);
    let message = &h.messenger.attempts()[0];
    assert_eq!(message.destination().as_str(), "-100123");
    assert!(message.text().contains("Ada"));
    assert!(message.text().contains("555-1212"));
    assert!(message.text().contains("*Email:* N/A"));
    assert!(message.text().contains("*Telegram:* N/A"));
    assert!(message.text().contains("*Source:* N/A"));
    assert!(message.text().contains("*Partner ID:* `N/A`"));

    subscription.release();
}

#[tokio::test]
async fn test_existing_documents_are_delivered_on_subscribe() {
    let h = start(MockMessenger::new());
    h.store.insert(COLLECTION, "a", fields(json!({ "name": "First" })));
    h.store.insert(COLLECTION, "b", fields(json!({ "name": "Second" })));

    let subscription =
        watch_collection(&h.store, COLLECTION, h.main_loop.clone(), h.dispatcher.clone()).unwrap();

    assert!(eventually(WAIT, || h.messenger.attempt_count() == 2).await);
    subscription.release();
}

#[tokio::test]
async fn test_only_additions_are_delivered() {
    let h = start(MockMessenger::new());
    h.store.insert(COLLECTION, "kept", fields(json!({ "name": "Kept" })));
    let subscription =
        watch_collection(&h.store, COLLECTION, h.main_loop.clone(), h.dispatcher.clone()).unwrap();
    assert!(eventually(WAIT, || h.messenger.attempt_count() == 1).await);

    h.store.update(COLLECTION, "kept", fields(json!({ "name": "Kept", "phone": "1" })));
    h.store.remove(COLLECTION, "kept");
    h.store.insert(COLLECTION, "new", fields(json!({ "name": "Newcomer" })));

    assert!(eventually(WAIT, || h.messenger.attempt_count() == 2).await);
    // Give any stray modify/remove delivery a chance to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let attempts = h.messenger.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[1].text().contains("Newcomer"));

    subscription.release();
}

#[tokio::test]
async fn test_mixed_batch_schedules_one_delivery() {
    let h = start(MockMessenger::new());
    let batch = vec![
        ChangeEvent::Removed(Document::new("old", fields(json!({ "name": "Gone" })))),
        ChangeEvent::Added(Document::new("new", fields(json!({ "name": "Fresh" })))),
        ChangeEvent::Modified(Document::new("mid", fields(json!({ "name": "Edited" })))),
    ];

    let scheduled = forward_additions(batch, &h.main_loop, &h.dispatcher);

    assert_eq!(scheduled, 1);
    assert!(eventually(WAIT, || h.messenger.attempt_count() == 1).await);
    assert!(h.messenger.attempts()[0].text().contains("Fresh"));
}

#[tokio::test]
async fn test_failed_delivery_does_not_stop_later_ones() {
    // Arrange
    let messenger = MockMessenger::new();
    messenger.reject_containing("Unlucky");
    let h = start(messenger);
    let subscription =
        watch_collection(&h.store, COLLECTION, h.main_loop.clone(), h.dispatcher.clone()).unwrap();

    // Act
    h.store.insert(COLLECTION, "1", fields(json!({ "name": "Unlucky" })));
    h.store.insert(COLLECTION, "2", fields(json!({ "name": "Lucky" })));

    // Assert
    assert!(eventually(WAIT, || h.messenger.attempt_count() == 2).await);
    let attempts = h.messenger.attempts();
    assert!(attempts[0].text().contains("Unlucky"));
    assert!(attempts[1].text().contains("Lucky"));

    subscription.release();
}

#[tokio::test]
async fn test_failed_delivery_does_not_stop_rest_of_batch() {
    // Arrange
    let messenger = MockMessenger::new();
    messenger.reject_containing("Unlucky");
    let h = start(messenger);
    let batch = vec![
        ChangeEvent::Added(Document::new("1", fields(json!({ "name": "Unlucky" })))),
        ChangeEvent::Added(Document::new("2", fields(json!({ "name": "Lucky" })))),
    ];

    // Act
    let scheduled = forward_additions(batch, &h.main_loop, &h.dispatcher);

    // Assert
    assert_eq!(scheduled, 2);
    assert!(eventually(WAIT, || h.messenger.attempt_count() == 2).await);
    let attempts = h.messenger.attempts();
    assert!(attempts[0].text().contains("*Name:* Unlucky\n"));
    assert!(attempts[1].text().contains("*Name:* Lucky\n"));
}

#[tokio::test]
async fn test_deliveries_run_one_at_a_time_in_order() {
    let h = start(MockMessenger::with_delay(Duration::from_millis(20)));
    let subscription =
        watch_collection(&h.store, COLLECTION, h.main_loop.clone(), h.dispatcher.clone()).unwrap();

    for i in 0..5 {
        h.store.insert(
            COLLECTION,
            &format!("s{}", i),
            fields(json!({ "name": format!("Student {}", i) })),
        );
    }

    assert!(eventually(WAIT, || h.messenger.attempt_count() == 5).await);
    assert_eq!(h.messenger.max_in_flight(), 1);
    for (i, message) in h.messenger.attempts().iter().enumerate() {
        assert!(message.text().contains(&format!("Student {}", i)));
    }

    subscription.release();
}

#[tokio::test]
async fn test_released_subscription_delivers_nothing() {
    let h = start(MockMessenger::new());
    let subscription =
        watch_collection(&h.store, COLLECTION, h.main_loop.clone(), h.dispatcher.clone()).unwrap();

    assert_eq!(subscription.collection(), COLLECTION);
    assert!(subscription.is_active());
    subscription.release();
    subscription.release();
    assert!(!subscription.is_active());

    let receivers = h.store.insert(COLLECTION, "late", fields(json!({ "name": "Late" })));
    assert_eq!(receivers, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.messenger.attempt_count(), 0);
}

#[tokio::test]
async fn test_handoff_after_main_loop_stopped_is_dropped() {
    let h = start(MockMessenger::new());
    h.shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, h.loop_task).await.unwrap().unwrap();
    assert!(!h.main_loop.is_running());

    let batch = vec![ChangeEvent::Added(Document::new(
        "s1",
        fields(json!({ "name": "Nobody Home" })),
    ))];
    let scheduled = forward_additions(batch, &h.main_loop, &h.dispatcher);

    assert_eq!(scheduled, 0);
    assert_eq!(h.messenger.attempt_count(), 0);
}

#[tokio::test]
async fn test_unreachable_store_fails_subscription() {
    let h = start(MockMessenger::new());
    h.store.set_unreachable(true);

    let result = watch_collection(&h.store, COLLECTION, h.main_loop.clone(), h.dispatcher.clone());

    assert!(result.is_err());
}
