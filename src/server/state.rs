use std::sync::Arc;
use std::time::Instant;

use crate::broker::MessageBroker;
use crate::communication::TopicRouter;
use crate::config::Settings;
use crate::dispatch::{CommunicationEngine, DispatchBridge, PendingDeliveries};
use crate::error::Result;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: Arc<CommunicationEngine>,
    pub broker: Arc<dyn MessageBroker>,
    pub pending: Arc<PendingDeliveries>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the dispatch core around an already running broker and listener.
    ///
    /// Fails when the topic configuration is incomplete.
    pub fn new(
        settings: Settings,
        broker: Arc<dyn MessageBroker>,
        pending: Arc<PendingDeliveries>,
    ) -> Result<Self> {
        let router = Arc::new(TopicRouter::from_config(&settings.topics)?);
        let bridge = DispatchBridge::new(
            broker.clone(),
            router,
            pending.clone(),
            settings.dispatch.delivery_timeout(),
        );
        let engine = Arc::new(CommunicationEngine::new(
            bridge,
            settings.dispatch.bulk_failure_mode,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            engine,
            broker,
            pending,
            start_time: Instant::now(),
        })
    }
}
