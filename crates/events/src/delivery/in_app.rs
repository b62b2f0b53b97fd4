//! Live in-app delivery through the connection registry.

use async_trait::async_trait;
use herald_core::channels::DeliveryMethod;
use herald_core::funnel::REASON_USER_OFFLINE;
use herald_db::models::notification::Notification;
use herald_db::models::recipient::Recipient;

use super::{ChannelAdapter, DeliveryOutcome};
use crate::broadcaster::EventBroadcaster;

pub struct InAppAdapter {
    broadcaster: EventBroadcaster,
}

impl InAppAdapter {
    pub fn new(broadcaster: EventBroadcaster) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl ChannelAdapter for InAppAdapter {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::InApp
    }

    async fn send(&self, _recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
        if self.broadcaster.notification_created(notification) {
            DeliveryOutcome::sent()
        } else {
            DeliveryOutcome::failed(REASON_USER_OFFLINE)
        }
    }
}
