// SoundCloud resolution backend

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;

use hiqty_media_providers::soundcloud::{SoundCloudClient, Track};

use super::{
    Attribution, BackendError, MediaRequest, ResolutionBackend, ResolvedTrack, TrackEnvelope,
    TrackInfo, TrackUser,
};

pub const SOUNDCLOUD_ID: &str = "soundcloud";

/// Queue payload for a SoundCloud track.
///
/// Only `id` is needed to play; the rest is display metadata captured at
/// resolve time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundCloudTrack {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

/// Accept numeric or string ids.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid track id: {other}"))),
    }
}

impl From<Track> for SoundCloudTrack {
    fn from(track: Track) -> Self {
        Self {
            id: track.id.to_string(),
            title: track.title,
            description: track.description,
            author: track.user.username,
            author_url: Some(track.user.permalink_url).filter(|u| !u.is_empty()),
            url: Some(track.permalink_url).filter(|u| !u.is_empty()),
            artwork_url: track.artwork_url,
        }
    }
}

impl SoundCloudTrack {
    fn info(&self) -> TrackInfo {
        TrackInfo {
            title: self.title.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
            cover_url: self.artwork_url.clone(),
            user: TrackUser {
                name: self.author.clone(),
                url: self.author_url.clone(),
                avatar_url: None,
            },
        }
    }
}

pub struct SoundCloudBackend {
    client: SoundCloudClient,
}

impl SoundCloudBackend {
    #[must_use]
    pub const fn new(client: SoundCloudClient) -> Self {
        Self { client }
    }

    fn decode(track: &Value) -> Result<SoundCloudTrack, BackendError> {
        SoundCloudTrack::deserialize(track).map_err(|e| BackendError::InvalidTrack(e.to_string()))
    }
}

#[async_trait]
impl ResolutionBackend for SoundCloudBackend {
    fn id(&self) -> &'static str {
        SOUNDCLOUD_ID
    }

    fn attribution(&self) -> Option<Attribution> {
        Some(Attribution {
            name: "SoundCloud".to_string(),
            url: "https://soundcloud.com".to_string(),
        })
    }

    fn sniff(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| {
            host == "soundcloud.com" || host.ends_with(".soundcloud.com")
        })
    }

    async fn resolve(&self, url: &Url) -> Result<Vec<ResolvedTrack>, BackendError> {
        let tracks = self.client.resolve(url.as_str()).await?.into_tracks();
        tracks
            .into_iter()
            .map(|track| {
                let unplayable = (!track.streamable).then(|| "not streamable".to_string());
                let payload = SoundCloudTrack::from(track);
                let info = payload.info();
                let track = serde_json::to_value(&payload)
                    .map_err(|e| BackendError::InvalidTrack(e.to_string()))?;
                Ok(ResolvedTrack {
                    envelope: TrackEnvelope::new(SOUNDCLOUD_ID, track),
                    info,
                    unplayable,
                })
            })
            .collect()
    }

    fn track_info(&self, track: &Value) -> Result<TrackInfo, BackendError> {
        Ok(Self::decode(track)?.info())
    }

    fn build_media_request(&self, track: &Value) -> Result<MediaRequest, BackendError> {
        let track = Self::decode(track)?;
        let url = Url::parse(&self.client.stream_url(&track.id))
            .map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        Ok(MediaRequest::new(url))
    }
}
