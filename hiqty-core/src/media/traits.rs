// Resolution Backend Traits
//
// Core interfaces for turning URLs into queue entries and queue entries into audio

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use url::Url;

use super::{BackendError, TrackEnvelope, TrackInfo};

/// Raw media bytes as they arrive from the backend
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// Shared HTTP client for media downloads (connection pooling)
static MEDIA_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_default()
});

/// A request that yields the media bytes of one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub url: Url,
    /// HTTP headers required for playback
    pub headers: Vec<(String, String)>,
}

impl MediaRequest {
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send the request and stream the response body.
    pub async fn open(&self) -> Result<ByteStream, BackendError> {
        let mut request = MEDIA_CLIENT.get(self.url.clone());
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(BackendError::NotFound);
        }
        if !status.is_success() {
            return Err(BackendError::Api(format!("HTTP {status} for {}", self.url)));
        }

        Ok(response.bytes_stream().map_err(BackendError::from).boxed())
    }
}

/// Outcome of resolving one track from a URL.
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub envelope: TrackEnvelope,
    pub info: TrackInfo,
    /// Reason the track cannot be played, if it cannot
    pub unplayable: Option<String>,
}

/// Service attribution, shown next to resolved tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

/// A streaming service that can resolve URLs and produce audio.
///
/// Implementations are registered once at startup and then shared read-only.
#[async_trait]
pub trait ResolutionBackend: Send + Sync {
    /// Discriminator stored in queue entries
    fn id(&self) -> &'static str;

    fn attribution(&self) -> Option<Attribution> {
        None
    }

    /// Whether this backend wants to handle `url`
    fn sniff(&self, url: &Url) -> bool;

    /// Resolve a sniffed URL into one or more tracks, in order.
    async fn resolve(&self, url: &Url) -> Result<Vec<ResolvedTrack>, BackendError>;

    /// Second decode pass: the backend's payload into display metadata.
    fn track_info(&self, track: &Value) -> Result<TrackInfo, BackendError>;

    fn build_media_request(&self, track: &Value) -> Result<MediaRequest, BackendError>;

    /// Open the byte stream for a queued track.
    async fn open_stream(&self, track: &Value) -> Result<ByteStream, BackendError> {
        self.build_media_request(track)?.open().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn test_open_streams_body_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media"))
            .and(header("authorization", "OAuth t"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/media", server.uri())).unwrap();
        let request = MediaRequest::new(url).header("authorization", "OAuth t");
        let chunks: Vec<Bytes> = request.open().await.unwrap().try_collect().await.unwrap();

        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_open_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gone = MediaRequest::new(Url::parse(&format!("{}/gone", server.uri())).unwrap());
        assert!(matches!(gone.open().await, Err(BackendError::NotFound)));

        let broken = MediaRequest::new(Url::parse(&format!("{}/broken", server.uri())).unwrap());
        assert!(matches!(broken.open().await, Err(BackendError::Api(_))));
    }
}
