use std::sync::Arc;

use crate::config::settings::PipelineSettings;
use crate::infrastructure::notify::WsHub;
use crate::infrastructure::queue::JobDispatcher;
use crate::infrastructure::storage::ObjectStore;
use crate::modules::jobs::repository::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: PipelineSettings,
    pub jobs: Arc<dyn JobStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub hub: WsHub,
}

impl AppState {
    pub fn new(
        settings: PipelineSettings,
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        hub: WsHub,
    ) -> Self {
        Self {
            settings,
            jobs,
            storage,
            dispatcher,
            hub,
        }
    }
}
