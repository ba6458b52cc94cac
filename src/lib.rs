pub mod api;
pub mod build_log;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod payload;
pub mod registry;
pub mod sanitize;
pub mod signature;

use std::sync::Arc;

use config::Config;
use dispatch::BuildDispatcher;
use registry::BuildRegistry;

/// Everything the request handlers need, built once from the configuration.
pub struct AppState {
    pub token: String,
    pub host_marker: String,
    pub webhook_secret: Option<String>,
    pub dispatcher: Arc<BuildDispatcher>,
    pub registry: Arc<BuildRegistry>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            token: config.token.clone(),
            host_marker: config.host_marker.clone(),
            webhook_secret: config.webhook_secret.clone(),
            dispatcher: Arc::new(BuildDispatcher::from_config(config)),
            registry: Arc::new(BuildRegistry::new(config.max_tracked_builds)),
        }
    }
}

pub type SharedState = Arc<AppState>;
