//! Domain-event to notification routing.
//!
//! [`EventRouter`] subscribes to the [`EventBus`](crate::EventBus), turns each
//! [`DomainEvent`] it understands into a notification via
//! [`Dispatcher::notify`], and mirrors payment and verification state changes
//! onto their live channels.

use herald_core::categories::{
    CATEGORY_LOW_BALANCE, CATEGORY_PAYMENT_COMPLETED, CATEGORY_REFUND_COMPLETED,
    CATEGORY_SMS_RECEIVED, CATEGORY_SYSTEM, CATEGORY_VERIFICATION_COMPLETED,
    CATEGORY_VERIFICATION_STARTED,
};
use tokio::sync::broadcast;

use crate::broadcaster::EventBroadcaster;
use crate::bus::{
    DomainEvent, EVENT_BALANCE_LOW, EVENT_PAYMENT_COMPLETED, EVENT_REFUND_COMPLETED,
    EVENT_SMS_RECEIVED, EVENT_SYSTEM_ANNOUNCEMENT, EVENT_VERIFICATION_COMPLETED,
    EVENT_VERIFICATION_STARTED,
};
use crate::dispatcher::{Dispatcher, NotificationExtra};

/// What a domain event becomes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedNotification {
    pub category: &'static str,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

/// Map an event to the notification it produces, or `None` for event kinds
/// that do not notify.
pub fn notification_for(event: &DomainEvent) -> Option<RoutedNotification> {
    let service = event.str_field("service").unwrap_or("your service");

    let (category, title, message) = match event.kind.as_str() {
        EVENT_VERIFICATION_STARTED => (
            CATEGORY_VERIFICATION_STARTED,
            "Verification started".to_string(),
            format!("Your verification for {service} has started."),
        ),
        EVENT_VERIFICATION_COMPLETED => (
            CATEGORY_VERIFICATION_COMPLETED,
            "Verification completed".to_string(),
            match event.str_field("code") {
                Some(code) => format!("Your code for {service} is {code}."),
                None => format!("Your verification for {service} is complete."),
            },
        ),
        EVENT_SMS_RECEIVED => (
            CATEGORY_SMS_RECEIVED,
            "New SMS received".to_string(),
            match event.str_field("from") {
                Some(from) => format!("You received a message from {from}."),
                None => "You received a new message.".to_string(),
            },
        ),
        EVENT_PAYMENT_COMPLETED => (
            CATEGORY_PAYMENT_COMPLETED,
            "Payment completed".to_string(),
            match event.str_field("amount") {
                Some(amount) => format!("Your payment of {amount} was completed."),
                None => "Your payment was completed.".to_string(),
            },
        ),
        EVENT_REFUND_COMPLETED => (
            CATEGORY_REFUND_COMPLETED,
            "Refund completed".to_string(),
            match event.str_field("amount") {
                Some(amount) => format!("A refund of {amount} was issued to your account."),
                None => "A refund was issued to your account.".to_string(),
            },
        ),
        EVENT_BALANCE_LOW => (
            CATEGORY_LOW_BALANCE,
            "Low balance".to_string(),
            match event.str_field("balance") {
                Some(balance) => format!("Your balance is down to {balance}."),
                None => "Your balance is running low.".to_string(),
            },
        ),
        EVENT_SYSTEM_ANNOUNCEMENT => (
            CATEGORY_SYSTEM,
            event.str_field("title").unwrap_or("Announcement").to_string(),
            event.str_field("message")?.to_string(),
        ),
        _ => return None,
    };

    Some(RoutedNotification {
        category,
        title,
        message,
        link: event.str_field("link").map(str::to_string),
    })
}

pub struct EventRouter {
    dispatcher: Dispatcher,
    broadcaster: EventBroadcaster,
}

impl EventRouter {
    pub fn new(dispatcher: Dispatcher, broadcaster: EventBroadcaster) -> Self {
        Self {
            dispatcher,
            broadcaster,
        }
    }

    /// Run the routing loop. Exits when the bus is dropped.
    pub async fn run(self, mut receiver: broadcast::Receiver<DomainEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.route(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event router shutting down");
                    break;
                }
            }
        }
    }

    /// Route a single event.
    pub async fn route(&self, event: &DomainEvent) {
        self.emit_live(event);

        let Some(routed) = notification_for(event) else {
            tracing::debug!(kind = %event.kind, user_id = event.user_id, "Event does not notify");
            return;
        };

        let extra = NotificationExtra {
            link: routed.link,
            icon: None,
            data: Some(event.payload.clone()),
        };
        if let Err(e) = self
            .dispatcher
            .notify(event.user_id, routed.category, &routed.title, &routed.message, extra)
            .await
        {
            tracing::error!(
                kind = %event.kind,
                user_id = event.user_id,
                error = %e,
                "Failed to create notification for event"
            );
        }
    }

    /// Live channel messages that accompany the notification.
    fn emit_live(&self, event: &DomainEvent) {
        let user_id = event.user_id;
        let payload = event.payload.clone();
        match event.kind.as_str() {
            EVENT_PAYMENT_COMPLETED => {
                self.broadcaster.payment_event(user_id, "completed", payload);
            }
            EVENT_REFUND_COMPLETED => {
                self.broadcaster.payment_event(user_id, "refunded", payload);
            }
            EVENT_VERIFICATION_STARTED => {
                self.broadcaster.verification_event(user_id, "started", payload);
            }
            EVENT_VERIFICATION_COMPLETED => {
                self.broadcaster.verification_event(user_id, "completed", payload);
            }
            EVENT_SMS_RECEIVED => {
                self.broadcaster.activity(user_id, "sms_received", payload);
            }
            _ => {}
        }
    }
}
