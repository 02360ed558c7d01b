use std::sync::Arc;

use crate::config::AppConfig;
use crate::providers::ProviderRegistry;
use crate::services::{
    queue::JobQueue, resolver::ImageResolver, state_store::StateStore, validator::ValidatorClient,
};

/// Shared application state passed to route handlers and worker tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub queue: Arc<JobQueue>,
    pub state_store: Arc<StateStore>,
    pub validator: Arc<ValidatorClient>,
    pub resolver: Arc<ImageResolver>,
    pub providers: Arc<ProviderRegistry>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        queue: JobQueue,
        state_store: StateStore,
        validator: ValidatorClient,
        resolver: ImageResolver,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            config: Arc::new(config),
            queue: Arc::new(queue),
            state_store: Arc::new(state_store),
            validator: Arc::new(validator),
            resolver: Arc::new(resolver),
            providers: Arc::new(providers),
        }
    }
}
