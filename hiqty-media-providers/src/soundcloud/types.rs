//! SoundCloud API Data Structures

use serde::{Deserialize, Serialize};

pub const USER_KIND: &str = "user";
pub const TRACK_KIND: &str = "track";
pub const PLAYLIST_KIND: &str = "playlist";

/// First-pass view of a `/resolve` response: only the discriminator.
#[derive(Debug, Clone, Deserialize)]
pub struct KindEnvelope {
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub permalink_url: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permalink_url: String,
    #[serde(default)]
    pub artwork_url: Option<String>,
    /// Track length in milliseconds
    #[serde(default)]
    pub duration: u64,
    #[serde(default = "default_streamable")]
    pub streamable: bool,
    #[serde(default)]
    pub user: User,
}

const fn default_streamable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub user: User,
}

/// Result of resolving a public SoundCloud URL.
#[derive(Debug, Clone)]
pub enum Resolved {
    Track(Track),
    Playlist(Playlist),
}

impl Resolved {
    /// Flatten into the tracks it contains, in playlist order.
    #[must_use]
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Self::Track(track) => vec![track],
            Self::Playlist(list) => list.tracks,
        }
    }
}
