use smilage_core::ModelManager;
use smilage_engine::{Config, Gallery};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared by every handler and WebSocket session.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub models: Arc<Mutex<ModelManager>>,
    pub gallery: Arc<Gallery>,
}

impl AppState {
    pub fn new(config: Config, models: ModelManager, gallery: Gallery) -> Self {
        Self {
            config: Arc::new(config),
            models: Arc::new(Mutex::new(models)),
            gallery: Arc::new(gallery),
        }
    }

    /// Lock the model manager. A capture thread that panicked mid-frame
    /// leaves the registry intact, so poisoning is ignored.
    pub fn models(&self) -> MutexGuard<'_, ModelManager> {
        self.models.lock().unwrap_or_else(|e| e.into_inner())
    }
}
