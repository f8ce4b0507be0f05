//! Application state shared by all connections: config, word service client and
//! the process-wide level catalog.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::catalog::LevelCatalog;
use crate::config::EngineConfig;
use crate::error::DrillError;
use crate::remote::RemoteApi;

pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub backend: Arc<RemoteApi>,
    pub catalog: LevelCatalog<RemoteApi>,
}

impl AppState {
    /// Build state from config: the HTTP client and an empty catalog (loaded on first use).
    #[instrument(level = "info", skip_all)]
    pub fn new(config: EngineConfig) -> Result<Self, DrillError> {
        let backend = Arc::new(RemoteApi::from_config(&config)?);
        info!(
            target: "drill_backend",
            base_url = %backend.base_url,
            scoring_mode = ?config.scoring_mode,
            level_source = ?config.level_source,
            selection = ?config.selection,
            authenticated = config.api_token.is_some(),
            "Word service client ready"
        );
        let catalog = LevelCatalog::new(backend.clone(), config.level_source);
        Ok(Self { config: Arc::new(config), backend, catalog })
    }
}
