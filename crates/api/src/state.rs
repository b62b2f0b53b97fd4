use std::sync::Arc;

use herald_core::categories::CategoryRegistry;
use herald_db::{DbPool, SharedStore};
use herald_events::delivery::email::MailTransport;
use herald_events::delivery::push::PushProvider;
use herald_events::{
    AdapterTable, ConnectionRegistry, DispatchConfig, DispatchWorkers, Dispatcher, EmailAdapter,
    EventBroadcaster, EventBus, InAppAdapter, PushAdapter, WebhookAdapter,
};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    /// Present when running against PostgreSQL.
    pub pool: Option<DbPool>,
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: EventBroadcaster,
    pub dispatcher: Dispatcher,
    pub push: Arc<PushAdapter>,
    pub email: Arc<EmailAdapter>,
    pub event_bus: Arc<EventBus>,
}

/// External transports for the delivery channels. `None` leaves the channel
/// unconfigured: its attempts fail softly with a "not configured" reason.
#[derive(Default)]
pub struct ChannelSetup {
    pub mail: Option<Arc<dyn MailTransport>>,
    pub push: Option<Arc<dyn PushProvider>>,
    pub webhook: Option<Arc<WebhookAdapter>>,
}

impl AppState {
    /// Wire the registry, adapters and dispatcher together and spawn the
    /// dispatch workers. Workers stop once `cancel` fires.
    pub fn build(
        store: SharedStore,
        pool: Option<DbPool>,
        config: ServerConfig,
        dispatch: &DispatchConfig,
        channels: ChannelSetup,
        cancel: CancellationToken,
    ) -> (Self, DispatchWorkers) {
        let registry = Arc::new(ConnectionRegistry::new(config.registry.outbound_buffer));
        let broadcaster = EventBroadcaster::new(Arc::clone(&registry));

        let email = Arc::new(EmailAdapter::new(store.clone(), channels.mail));
        let push = Arc::new(PushAdapter::new(store.clone(), channels.push));

        let mut adapters = AdapterTable::new()
            .with(Arc::new(InAppAdapter::new(broadcaster.clone())))
            .with(email.clone())
            .with(push.clone());
        if let Some(webhook) = channels.webhook {
            adapters.register(webhook);
        }

        let (dispatcher, workers) = Dispatcher::start(
            store.clone(),
            Arc::new(CategoryRegistry::builtin()),
            adapters,
            dispatch,
            cancel,
        );

        let state = Self {
            store,
            pool,
            config: Arc::new(config),
            registry,
            broadcaster,
            dispatcher,
            push,
            email,
            event_bus: Arc::new(EventBus::default()),
        };
        (state, workers)
    }
}
