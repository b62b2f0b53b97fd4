//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub through which domain code hands
//! [`DomainEvent`]s to the notification pipeline. It is shared via
//! `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use herald_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

pub const EVENT_VERIFICATION_STARTED: &str = "verification.started";
pub const EVENT_VERIFICATION_COMPLETED: &str = "verification.completed";
pub const EVENT_SMS_RECEIVED: &str = "sms.received";
pub const EVENT_PAYMENT_COMPLETED: &str = "payment.completed";
pub const EVENT_REFUND_COMPLETED: &str = "refund.completed";
pub const EVENT_BALANCE_LOW: &str = "balance.low";
pub const EVENT_SYSTEM_ANNOUNCEMENT: &str = "system.announcement";

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// Something that happened to a user's account and may warrant a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Dot-separated event name, e.g. `"payment.completed"`.
    pub kind: String,

    /// The user the event concerns.
    pub user_id: DbId,

    /// Event-specific fields (amounts, phone numbers, session ids, ...).
    pub payload: serde_json::Value,

    /// When the event was raised (UTC).
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    /// Create an event with an empty payload.
    pub fn new(kind: impl Into<String>, user_id: DbId) -> Self {
        Self {
            kind: kind.into(),
            user_id,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// A string field of the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// When the buffer is full the oldest un-consumed events are dropped and slow
/// receivers observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            DomainEvent::new(EVENT_PAYMENT_COMPLETED, 7)
                .with_payload(serde_json::json!({"amount": "12.50"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.kind, EVENT_PAYMENT_COMPLETED);
        assert_eq!(received.user_id, 7);
        assert_eq!(received.str_field("amount"), Some("12.50"));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(DomainEvent::new(EVENT_SMS_RECEIVED, 1));

        assert_eq!(rx1.recv().await.unwrap().kind, EVENT_SMS_RECEIVED);
        assert_eq!(rx2.recv().await.unwrap().kind, EVENT_SMS_RECEIVED);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::new("orphan.event", 1));
    }

    #[test]
    fn default_payload_is_an_empty_object() {
        let event = DomainEvent::new(EVENT_BALANCE_LOW, 3);
        assert!(event.payload.is_object());
        assert_eq!(event.str_field("missing"), None);
    }
}
