pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod services;

use std::sync::Arc;

use gateway::preferences::PreferenceCache;
use gateway::registry::ConnectionRegistry;
use services::Services;

/// Shared state available to every connection task.
///
/// The registry and preference cache are in-process maps, so all sockets of
/// a deployment must terminate on one gateway process. Scaling out requires
/// replacing both with a shared backplane.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub registry: Arc<ConnectionRegistry>,
    pub preferences: Arc<PreferenceCache>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            registry: Arc::new(ConnectionRegistry::new()),
            preferences: Arc::new(PreferenceCache::new()),
        }
    }
}
