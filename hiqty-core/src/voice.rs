//! Voice collaborator
//!
//! The chat platform's gateway and voice transport live outside this crate.
//! The player only needs to join a channel, move, push encoded frames and
//! leave, plus hear about guilds appearing and disappearing.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Guild lifecycle events from the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildEvent {
    /// The bot is in this guild (startup or join)
    Create(String),
    /// The bot was removed from this guild for good
    Delete(String),
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, guild_id: &str, channel_id: &str) -> Result<Box<dyn VoiceConnection>>;
}

/// A joined voice connection for one guild
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn channel_id(&self) -> &str;

    async fn change_channel(&mut self, channel_id: &str) -> Result<()>;

    /// Send one encoded audio frame, waiting for its playout slot
    async fn send_frame(&mut self, frame: Bytes) -> Result<()>;

    async fn set_speaking(&mut self, speaking: bool) -> Result<()>;

    async fn disconnect(self: Box<Self>) -> Result<()>;
}
