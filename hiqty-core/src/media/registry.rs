// Backend Registry
//
// Immutable mapping from service id to backend, filled once during startup

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use super::{ResolutionBackend, TrackEnvelope};
use crate::{Error, Result};

/// Registered resolution backends.
///
/// Built mutably at startup, then shared behind an `Arc` without locking.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<&'static str, Arc<dyn ResolutionBackend>>,
    /// Registration order, used when sniffing URLs
    order: Vec<&'static str>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one with the same id
    pub fn register(&mut self, backend: Arc<dyn ResolutionBackend>) {
        let id = backend.id();
        if self.backends.insert(id, backend).is_none() {
            self.order.push(id);
        }
        tracing::info!(service = %id, "Registered resolution backend");
    }

    #[must_use]
    pub fn get(&self, service: &str) -> Option<Arc<dyn ResolutionBackend>> {
        self.backends.get(service).cloned()
    }

    /// First registered backend that claims `url`
    #[must_use]
    pub fn sniff(&self, url: &Url) -> Option<Arc<dyn ResolutionBackend>> {
        self.order
            .iter()
            .filter_map(|id| self.backends.get(id))
            .find(|backend| backend.sniff(url))
            .cloned()
    }

    /// Decode a raw queue entry and find its backend.
    ///
    /// An entry naming an unregistered service is as unplayable as a
    /// structurally broken one.
    pub fn decode(&self, raw: &str) -> Result<(Arc<dyn ResolutionBackend>, TrackEnvelope)> {
        let envelope = TrackEnvelope::decode(raw)?;
        let backend = self
            .get(&envelope.service)
            .ok_or_else(|| Error::UnknownService(envelope.service.clone()))?;
        Ok((backend, envelope))
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
