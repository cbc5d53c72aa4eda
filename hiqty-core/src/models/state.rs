use std::fmt;

use serde::Serialize;

/// Externally requested playback state of a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Playing,
    #[default]
    Stopped,
}

impl DesiredState {
    pub const PLAYING: &'static str = "playing";
    pub const STOPPED: &'static str = "stopped";

    /// Interpret the raw `state` value. Absent or unrecognised means stopped.
    #[must_use]
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(Self::PLAYING) => Self::Playing,
            _ => Self::Stopped,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Playing => Self::PLAYING,
            Self::Stopped => Self::STOPPED,
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a guild's keys, as printed by `hiqty status`.
#[derive(Debug, Clone, Serialize)]
pub struct GuildStatus {
    pub guild_id: String,
    pub state: DesiredState,
    pub channel: Option<String>,
    pub queue_length: usize,
    /// Current lease token, if some node holds the lease
    pub lease_holder: Option<String>,
}
