//! Tests for `EventRouter`: domain events published on the bus become
//! notifications and live channel messages.

mod common;

use std::time::Duration;

use common::Harness;
use herald_db::NotificationStore;
use herald_events::bus::EVENT_PAYMENT_COMPLETED;
use herald_events::{DispatchConfig, DomainEvent, EventBus, EventRouter, Frame};
use serde_json::json;

async fn next_message(rx: &mut tokio::sync::mpsc::Receiver<Frame>) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed");
    match frame {
        Frame::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn payment_event_notifies_and_streams() {
    let h = Harness::start(Vec::new(), DispatchConfig::default());
    let (_conn, mut rx) = h.registry.open(1);

    let bus = EventBus::default();
    let router = EventRouter::new(h.dispatcher.clone(), h.broadcaster.clone());
    let handle = tokio::spawn(router.run(bus.subscribe()));

    bus.publish(
        DomainEvent::new(EVENT_PAYMENT_COMPLETED, 1)
            .with_payload(json!({"amount": "$25.00", "payment_id": 77})),
    );

    let payment = next_message(&mut rx).await;
    assert_eq!(payment["type"], "payment");
    assert_eq!(payment["event"], "completed");
    assert_eq!(payment["payment_id"], 77);

    let notification = next_message(&mut rx).await;
    assert_eq!(notification["type"], "notification");
    assert_eq!(notification["category"], "payment_completed");
    assert_eq!(notification["message"], "Your payment of $25.00 was completed.");
    assert_eq!(notification["data"]["payment_id"], 77);

    let stored = h.store.list_notifications(1, false, 10, 0).await.unwrap();
    assert_eq!(stored.len(), 1);

    // Dropping the bus ends the router.
    drop(bus);
    handle.await.unwrap();
    h.shutdown().await;
}

#[tokio::test]
async fn unknown_events_are_ignored() {
    let h = Harness::start(Vec::new(), DispatchConfig::default());
    let router = EventRouter::new(h.dispatcher.clone(), h.broadcaster.clone());

    router.route(&DomainEvent::new("user.logged_in", 1)).await;

    assert_eq!(h.store.unread_count(1).await.unwrap(), 0);
    h.shutdown().await;
}
