//! Herald runtime services.
//!
//! - [`EventBus`]: in-process publish/subscribe hub for [`DomainEvent`]s.
//! - [`ConnectionRegistry`]: live WebSocket connections and channel
//!   subscriptions, with [`EventBroadcaster`] building the messages sent
//!   over them.
//! - [`PreferenceResolver`]: per-user, per-category delivery settings.
//! - [`delivery`]: the in-app, email, push and webhook channels.
//! - [`Dispatcher`]: creates notifications and fans them out through a
//!   bounded queue and worker pool.
//! - [`DeliveryFunnelTracker`]: sent/delivered/read/clicked bookkeeping and
//!   funnel metrics.
//! - [`EventRouter`]: turns domain events into notifications.
//! - [`DigestScheduler`]: periodic daily/weekly digest emails.

pub mod broadcaster;
pub mod bus;
pub mod delivery;
pub mod digest;
pub mod dispatcher;
pub mod preferences;
pub mod registry;
pub mod router;
pub mod tracker;

pub use broadcaster::EventBroadcaster;
pub use bus::{DomainEvent, EventBus};
pub use delivery::email::{EmailAdapter, EmailConfig, SmtpMailer};
pub use delivery::in_app::InAppAdapter;
pub use delivery::push::{HttpPushProvider, PushAdapter, PushConfig};
pub use delivery::webhook::{WebhookAdapter, WebhookConfig};
pub use delivery::{AdapterTable, ChannelAdapter, DeliveryOutcome};
pub use digest::DigestScheduler;
pub use dispatcher::{DispatchConfig, DispatchWorkers, Dispatcher, NotificationExtra};
pub use preferences::PreferenceResolver;
pub use registry::{ConnectionId, ConnectionRegistry, Frame};
pub use router::EventRouter;
pub use tracker::{DeliveryFunnelTracker, MetricsFilter, TrackOutcome};
