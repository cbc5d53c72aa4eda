//! Queue entries
//!
//! A queue entry is `{"service": <backend id>, "track": <backend payload>}`.
//! Decoding happens in two passes: this module only checks the outer shape
//! and extracts the discriminator, the backend decodes `track`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEnvelope {
    pub service: String,
    pub track: Value,
}

impl TrackEnvelope {
    pub fn new(service: impl Into<String>, track: Value) -> Self {
        Self {
            service: service.into(),
            track,
        }
    }

    /// First decode pass. Any structural problem is `MalformedEnvelope`.
    pub fn decode(raw: &str) -> Result<Self> {
        let envelope: Self =
            serde_json::from_str(raw).map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
        if envelope.service.is_empty() {
            return Err(Error::MalformedEnvelope("empty service".to_string()));
        }
        if envelope.track.is_null() {
            return Err(Error::MalformedEnvelope("missing track payload".to_string()));
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackUser {
    pub name: String,
    pub url: Option<String>,
    pub avatar_url: Option<String>,
}

/// Display metadata for a track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub cover_url: Option<String>,
    pub user: TrackUser,
}

impl fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.user.name.is_empty(), &self.url) {
            (true, None) => write!(f, "{}", self.title),
            (true, Some(url)) => write!(f, "{} <{url}>", self.title),
            (false, None) => write!(f, "{} by {}", self.title, self.user.name),
            (false, Some(url)) => write!(f, "{} by {} <{url}>", self.title, self.user.name),
        }
    }
}
