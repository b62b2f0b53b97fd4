//! Live message envelopes.
//!
//! [`EventBroadcaster`] turns business occurrences into the flat envelope
//! `{type, channel, ...fields, timestamp}` and hands it to the
//! [`ConnectionRegistry`]. It never fails: problems are logged and reported
//! as `false` / `0`.

use std::sync::Arc;

use chrono::Utc;
use herald_core::channels::{
    validate_channel_name, CHANNEL_ACTIVITIES, CHANNEL_NOTIFICATIONS, CHANNEL_PAYMENTS,
    CHANNEL_VERIFICATIONS, MESSAGE_TYPE_ACTIVITY, MESSAGE_TYPE_NOTIFICATION, MESSAGE_TYPE_PAYMENT,
    MESSAGE_TYPE_VERIFICATION,
};
use herald_core::types::DbId;
use herald_db::models::notification::Notification;
use serde_json::{json, Map, Value};

use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Push a freshly created notification to its owner.
    pub fn notification_created(&self, notification: &Notification) -> bool {
        let fields = json!({
            "notification_id": notification.id,
            "category": notification.category,
            "title": notification.title,
            "message": notification.message,
            "link": notification.link,
            "icon": notification.icon,
            "data": notification.data,
            "is_read": notification.is_read,
            "created_at": notification.created_at,
        });
        self.send(
            notification.user_id,
            MESSAGE_TYPE_NOTIFICATION,
            CHANNEL_NOTIFICATIONS,
            fields,
        )
    }

    /// Push a generic activity-feed entry to a user.
    pub fn activity(&self, user_id: DbId, activity_type: &str, fields: Value) -> bool {
        match with_field(fields, "activity_type", activity_type) {
            Some(fields) => self.send(user_id, MESSAGE_TYPE_ACTIVITY, CHANNEL_ACTIVITIES, fields),
            None => false,
        }
    }

    /// Push a payment state change (`completed`, `refunded`, ...) to a user.
    pub fn payment_event(&self, user_id: DbId, event: &str, fields: Value) -> bool {
        match with_field(fields, "event", event) {
            Some(fields) => self.send(user_id, MESSAGE_TYPE_PAYMENT, CHANNEL_PAYMENTS, fields),
            None => false,
        }
    }

    /// Push a verification session status change to a user.
    pub fn verification_event(&self, user_id: DbId, status: &str, fields: Value) -> bool {
        match with_field(fields, "status", status) {
            Some(fields) => {
                self.send(user_id, MESSAGE_TYPE_VERIFICATION, CHANNEL_VERIFICATIONS, fields)
            }
            None => false,
        }
    }

    /// Broadcast an arbitrary message to every connected subscriber of
    /// `channel`. Returns the number of users reached.
    pub fn broadcast(&self, channel: &str, message_type: &str, fields: Value) -> usize {
        if let Err(e) = validate_channel_name(channel) {
            tracing::warn!(channel, error = %e, "Refusing to broadcast to invalid channel");
            return 0;
        }
        match envelope(message_type, channel, fields) {
            Some(message) => self.registry.broadcast_to_channel(channel, &message),
            None => 0,
        }
    }

    fn send(&self, user_id: DbId, message_type: &str, channel: &str, fields: Value) -> bool {
        match envelope(message_type, channel, fields) {
            Some(message) => self.registry.send_to_user(user_id, &message),
            None => false,
        }
    }
}

/// Build the flat live-message envelope. `fields` must be a JSON object; the
/// envelope keys take precedence over fields of the same name.
pub fn envelope(message_type: &str, channel: &str, fields: Value) -> Option<Value> {
    let mut map = match fields {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            tracing::warn!(
                message_type,
                kind = json_kind(&other),
                "Live message fields must be an object"
            );
            return None;
        }
    };
    map.insert("type".into(), Value::from(message_type));
    map.insert("channel".into(), Value::from(channel));
    map.insert("timestamp".into(), Value::from(Utc::now().to_rfc3339()));
    Some(Value::Object(map))
}

fn with_field(fields: Value, key: &str, value: &str) -> Option<Value> {
    let mut map = match fields {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            tracing::warn!(key, kind = json_kind(&other), "Live message fields must be an object");
            return None;
        }
    };
    map.insert(key.to_string(), Value::from(value));
    Some(Value::Object(map))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
