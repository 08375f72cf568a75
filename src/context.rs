use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::notifications::NotificationChannel;
use crate::core::profiles::ProfileRegistry;
use crate::core::session::SessionConnector;
use crate::core::storage::Storage;

/// Everything a batch run needs, constructed once and passed in.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ProfileRegistry>,
    pub connector: Arc<dyn SessionConnector>,
    pub storage: Arc<dyn Storage>,
    pub notifier: Option<Arc<dyn NotificationChannel>>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        registry: ProfileRegistry,
        connector: Arc<dyn SessionConnector>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            connector,
            storage,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn NotificationChannel>>) -> Self {
        self.notifier = notifier;
        self
    }
}
