//! Tests for `ConnectionRegistry` and `EventBroadcaster`.
//!
//! These exercise the registry directly through its outbound queues, without
//! any sockets.

use std::sync::Arc;

use herald_events::registry::Connection;
use herald_events::{ConnectionRegistry, EventBroadcaster, Frame};
use serde_json::json;

fn text(frame: Frame) -> serde_json::Value {
    match frame {
        Frame::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: send_to_user is false exactly when the user has no connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_user_reports_reachability() {
    let registry = ConnectionRegistry::default();
    let message = json!({"type": "notification"});

    assert!(!registry.send_to_user(1, &message));

    let (id, mut rx) = registry.open(1);
    assert!(registry.send_to_user(1, &message));
    assert_eq!(text(rx.recv().await.unwrap())["type"], "notification");

    registry.disconnect(1, id);
    assert!(!registry.send_to_user(1, &message));
    assert!(!registry.is_user_connected(1));
}

// ---------------------------------------------------------------------------
// Test: every connection of a user receives the message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multiple_connections_all_receive() {
    let registry = ConnectionRegistry::default();
    let (_a, mut rx_a) = registry.open(1);
    let (_b, mut rx_b) = registry.open(1);
    let (_c, mut rx_other) = registry.open(2);

    assert_eq!(registry.active_connection_count(), 3);
    assert!(registry.send_to_user(1, &json!({"n": 1})));

    assert_eq!(text(rx_a.recv().await.unwrap())["n"], 1);
    assert_eq!(text(rx_b.recv().await.unwrap())["n"], 1);
    assert!(rx_other.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: dead connections are pruned on write
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_connection_is_pruned() {
    let registry = ConnectionRegistry::default();
    let (_live, mut live_rx) = registry.open(1);
    let (_dead, dead_rx) = registry.open(1);
    drop(dead_rx);

    assert!(registry.send_to_user(1, &json!({"n": 1})));
    assert_eq!(registry.active_connection_count(), 1);
    assert!(live_rx.recv().await.is_some());
}

#[tokio::test]
async fn all_writes_failing_reports_false_and_forgets_user() {
    let registry = ConnectionRegistry::default();
    let (_id, rx) = registry.open(1);
    drop(rx);

    assert!(!registry.send_to_user(1, &json!({"n": 1})));
    assert!(!registry.is_user_connected(1));
    assert!(registry.active_users().is_empty());
}

#[tokio::test]
async fn full_outbound_queue_drops_the_connection() {
    let registry = ConnectionRegistry::new(1);
    let (conn, _rx) = Connection::new(1);
    registry.connect(1, conn);

    assert!(registry.send_to_user(1, &json!({"n": 1})));
    // Nobody drained the first frame.
    assert!(!registry.send_to_user(1, &json!({"n": 2})));
    assert_eq!(registry.active_connection_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: disconnect is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_twice_is_a_noop() {
    let registry = ConnectionRegistry::default();
    let (id, _rx) = registry.open(1);

    assert!(registry.disconnect(1, id));
    assert!(!registry.disconnect(1, id));
    assert_eq!(registry.active_connection_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: subscriptions are independent of connection state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscription_made_offline_applies_after_connect() {
    let registry = ConnectionRegistry::default();
    registry.subscribe(1, "payments").unwrap();

    assert_eq!(registry.broadcast_to_channel("payments", &json!({"n": 1})), 0);

    let (_id, mut rx) = registry.open(1);
    assert_eq!(registry.broadcast_to_channel("payments", &json!({"n": 2})), 1);
    assert_eq!(text(rx.recv().await.unwrap())["n"], 2);
    assert_eq!(registry.subscriptions_of(1), vec!["payments".to_string()]);
}

#[tokio::test]
async fn unsubscribe_stops_channel_delivery() {
    let registry = ConnectionRegistry::default();
    let (_id, _rx) = registry.open(1);
    registry.subscribe(1, "activities").unwrap();

    assert!(registry.unsubscribe(1, "activities"));
    assert!(!registry.unsubscribe(1, "activities"));
    assert_eq!(registry.broadcast_to_channel("activities", &json!({})), 0);
}

#[tokio::test]
async fn invalid_channel_names_are_rejected() {
    let registry = ConnectionRegistry::default();
    assert!(registry.subscribe(1, "").is_err());
    assert!(registry.subscribe(1, "has space").is_err());
}

// ---------------------------------------------------------------------------
// Test: heartbeat and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_and_shutdown_reach_every_connection() {
    let registry = ConnectionRegistry::default();
    let (_a, mut rx_a) = registry.open(1);
    let (_b, mut rx_b) = registry.open(2);

    registry.ping_all();
    assert_eq!(rx_a.recv().await, Some(Frame::Ping));
    assert_eq!(rx_b.recv().await, Some(Frame::Ping));

    assert_eq!(registry.shutdown_all(), 2);
    assert_eq!(rx_a.recv().await, Some(Frame::Close));
    assert_eq!(rx_b.recv().await, Some(Frame::Close));
    assert_eq!(registry.active_connection_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: broadcaster envelopes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn payment_event_uses_flat_envelope() {
    let registry = Arc::new(ConnectionRegistry::default());
    let broadcaster = EventBroadcaster::new(Arc::clone(&registry));
    let (_id, mut rx) = registry.open(4);

    assert!(broadcaster.payment_event(4, "completed", json!({"amount": "$10"})));
    let message = text(rx.recv().await.unwrap());
    assert_eq!(message["type"], "payment");
    assert_eq!(message["channel"], "payments");
    assert_eq!(message["event"], "completed");
    assert_eq!(message["amount"], "$10");
    assert!(message["timestamp"].is_string());

    assert!(!broadcaster.payment_event(5, "completed", json!({})));
}

#[tokio::test]
async fn broadcast_counts_connected_subscribers() {
    let registry = Arc::new(ConnectionRegistry::default());
    let broadcaster = EventBroadcaster::new(Arc::clone(&registry));
    let (_a, _rx_a) = registry.open(1);
    let (_b, _rx_b) = registry.open(2);
    registry.subscribe(1, "verifications").unwrap();
    registry.subscribe(2, "verifications").unwrap();
    registry.subscribe(3, "verifications").unwrap();

    assert_eq!(broadcaster.broadcast("verifications", "verification", json!({})), 2);
}
