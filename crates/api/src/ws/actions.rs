//! Inbound client messages.
//!
//! Clients send JSON text frames tagged by `action`:
//!
//! ```text
//! {"action":"subscribe","channel":"payments"}
//! {"action":"unsubscribe","channel":"payments"}
//! {"action":"ack","notification_id":42,"event":"read"}
//! {"action":"ping"}
//! ```
//!
//! Every frame gets exactly one JSON reply.

use herald_core::channels::DeliveryMethod;
use herald_core::types::DbId;
use herald_db::models::analytics::AttemptKey;
use herald_events::TrackOutcome;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    /// The client reports what happened to an in-app notification.
    Ack {
        notification_id: DbId,
        event: AckEvent,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckEvent {
    Delivered,
    Read,
    Clicked,
}

impl AckEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckEvent::Delivered => "delivered",
            AckEvent::Read => "read",
            AckEvent::Clicked => "clicked",
        }
    }
}

/// Apply one inbound text frame from `user_id` and build the reply.
pub async fn handle_text(state: &AppState, user_id: DbId, text: &str) -> Value {
    let action: ClientAction = match serde_json::from_str(text) {
        Ok(action) => action,
        Err(e) => {
            tracing::debug!(user_id, error = %e, "Unrecognized client message");
            return error_reply(format!("Unrecognized message: {e}"));
        }
    };

    match action {
        ClientAction::Subscribe { channel } => match state.registry.subscribe(user_id, &channel) {
            Ok(()) => {
                tracing::debug!(user_id, channel = %channel, "Client subscribed");
                json!({ "type": "subscribed", "channel": channel })
            }
            Err(e) => error_reply(e.to_string()),
        },
        ClientAction::Unsubscribe { channel } => {
            let removed = state.registry.unsubscribe(user_id, &channel);
            json!({ "type": "unsubscribed", "channel": channel, "removed": removed })
        }
        ClientAction::Ack {
            notification_id,
            event,
        } => {
            let key = AttemptKey {
                notification_id,
                user_id,
                method: DeliveryMethod::InApp,
            };
            let tracker = state.dispatcher.tracker();
            let outcome = match event {
                AckEvent::Delivered => tracker.track_delivered(key).await,
                AckEvent::Read => tracker.track_read(key).await,
                AckEvent::Clicked => tracker.track_clicked(key).await,
            };
            json!({
                "type": "ack",
                "notification_id": notification_id,
                "event": event.as_str(),
                "result": outcome_label(&outcome),
            })
        }
        ClientAction::Ping => json!({ "type": "pong" }),
    }
}

fn outcome_label(outcome: &TrackOutcome) -> &'static str {
    match outcome {
        TrackOutcome::Applied => "applied",
        TrackOutcome::Unchanged => "unchanged",
        TrackOutcome::NotFound => "not_found",
        TrackOutcome::InvalidTransition(_) => "invalid_transition",
        TrackOutcome::StoreError(_) => "error",
    }
}

fn error_reply(message: String) -> Value {
    json!({ "type": "error", "message": message })
}
