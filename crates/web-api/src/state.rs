use std::sync::Arc;

use application::{Authenticator, Clock, HubHandle, MessageRepository};
use config::HubConfig;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub messages: Arc<dyn MessageRepository>,
    pub authenticator: Arc<dyn Authenticator>,
    pub clock: Arc<dyn Clock>,
    pub hub_config: HubConfig,
}

impl AppState {
    pub fn new(
        hub: HubHandle,
        messages: Arc<dyn MessageRepository>,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
        hub_config: HubConfig,
    ) -> Self {
        Self {
            hub,
            messages,
            authenticator,
            clock,
            hub_config,
        }
    }
}
