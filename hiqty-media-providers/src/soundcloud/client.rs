//! SoundCloud HTTP Client

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Client;

use super::types::{KindEnvelope, Playlist, Resolved, Track, PLAYLIST_KIND, TRACK_KIND};
use crate::error::{body_with_limit, check_response, ProviderClientError};

pub const DEFAULT_API_BASE: &str = "https://api.soundcloud.com";

/// Shared HTTP client for all SoundCloud requests (connection pooling)
static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_default()
});

/// SoundCloud API client authenticated by a public client ID.
#[derive(Clone)]
pub struct SoundCloudClient {
    client: Client,
    client_id: String,
    api_base: String,
}

impl SoundCloudClient {
    /// Create a client against the public API (reuses shared connection pool)
    pub fn new(client_id: impl Into<String>) -> Result<Self, ProviderClientError> {
        Self::with_api_base(DEFAULT_API_BASE, client_id)
    }

    /// Create a client against a custom API base (mirrors, tests)
    pub fn with_api_base(
        api_base: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, ProviderClientError> {
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(ProviderClientError::InvalidConfig(
                "SoundCloud client ID is empty".to_string(),
            ));
        }
        Ok(Self {
            client: SHARED_CLIENT.clone(),
            client_id,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a public soundcloud.com URL into a track or playlist.
    pub async fn resolve(&self, url: &str) -> Result<Resolved, ProviderClientError> {
        let endpoint = format!("{}/resolve", self.api_base);
        tracing::debug!(url = %url, "Resolving SoundCloud URL");

        let response = self
            .client
            .get(&endpoint)
            .query(&[("client_id", self.client_id.as_str()), ("url", url)])
            .send()
            .await?;
        let body = body_with_limit(check_response(response)?).await?;

        // Two passes: the kind decides which shape the rest has.
        let envelope: KindEnvelope = serde_json::from_slice(&body)?;
        match envelope.kind.as_str() {
            TRACK_KIND => Ok(Resolved::Track(serde_json::from_slice::<Track>(&body)?)),
            PLAYLIST_KIND => Ok(Resolved::Playlist(serde_json::from_slice::<Playlist>(&body)?)),
            other => Err(ProviderClientError::UnsupportedKind(other.to_string())),
        }
    }

    /// URL of the audio stream for a track.
    #[must_use]
    pub fn stream_url(&self, track_id: &str) -> String {
        format!(
            "{}/tracks/{}/stream?client_id={}",
            self.api_base,
            url::form_urlencoded::byte_serialize(track_id.as_bytes()).collect::<String>(),
            self.client_id
        )
    }
}
