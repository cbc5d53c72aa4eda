//! Service initialization and dependency injection

use std::sync::Arc;
use std::time::Duration;

use hiqty_media_providers::SoundCloudClient;
use tracing::{info, warn};

use crate::keys::KeyBuilder;
use crate::media::{BackendRegistry, SoundCloudBackend};
use crate::store::{RedisStore, Store};
use crate::Config;

/// Container for the shared, process-wide services
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub keys: KeyBuilder,
    /// Read-only after startup
    pub backends: Arc<BackendRegistry>,
}

/// Register every resolution backend that has credentials configured
pub fn init_backends(config: &Config) -> anyhow::Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();

    match config.services.soundcloud.client_id.as_deref() {
        Some(client_id) if !client_id.is_empty() => {
            let client = match config.services.soundcloud.api_base.as_deref() {
                Some(base) => SoundCloudClient::with_api_base(base, client_id)?,
                None => SoundCloudClient::new(client_id)?,
            };
            registry.register(Arc::new(SoundCloudBackend::new(client)));
        }
        _ => warn!("services.soundcloud.client_id not set, SoundCloud unavailable"),
    }

    if registry.is_empty() {
        warn!("No resolution backends available, queued tracks cannot be played");
    }
    Ok(registry)
}

/// Connect to the store and register backends
pub async fn init_services(config: &Config) -> anyhow::Result<Services> {
    info!("Initializing services...");

    let store = RedisStore::connect(
        &config.redis.url,
        Duration::from_secs(config.redis.connect_timeout_seconds),
    )
    .await?;

    let backends = init_backends(config)?;
    info!(backends = ?backends.ids(), "Services initialized");

    Ok(Services {
        store: Arc::new(store),
        keys: KeyBuilder::from_config(config),
        backends: Arc::new(backends),
    })
}
