//! Dry-run voice transport
//!
//! Stands in for a chat platform's voice gateway: joins are logged and frames
//! are paced at the Opus frame rate and discarded.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hiqty_core::voice::{VoiceConnection, VoiceTransport};
use tracing::{debug, info};

const FRAME_DURATION: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
pub struct DryRunVoice;

#[async_trait]
impl VoiceTransport for DryRunVoice {
    async fn join(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> hiqty_core::Result<Box<dyn VoiceConnection>> {
        info!(guild_id = %guild_id, channel_id = %channel_id, "Joined voice channel (dry run)");
        Ok(Box::new(DryRunConnection {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            frames: 0,
            bytes: 0,
        }))
    }
}

struct DryRunConnection {
    guild_id: String,
    channel_id: String,
    frames: u64,
    bytes: u64,
}

#[async_trait]
impl VoiceConnection for DryRunConnection {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn change_channel(&mut self, channel_id: &str) -> hiqty_core::Result<()> {
        info!(
            guild_id = %self.guild_id,
            from = %self.channel_id,
            to = %channel_id,
            "Moved voice channel (dry run)"
        );
        self.channel_id = channel_id.to_string();
        Ok(())
    }

    async fn send_frame(&mut self, frame: Bytes) -> hiqty_core::Result<()> {
        tokio::time::sleep(FRAME_DURATION).await;
        self.frames += 1;
        self.bytes += frame.len() as u64;
        Ok(())
    }

    async fn set_speaking(&mut self, speaking: bool) -> hiqty_core::Result<()> {
        debug!(guild_id = %self.guild_id, speaking, "Speaking state (dry run)");
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> hiqty_core::Result<()> {
        info!(
            guild_id = %self.guild_id,
            channel_id = %self.channel_id,
            frames = self.frames,
            bytes = self.bytes,
            "Left voice channel (dry run)"
        );
        Ok(())
    }
}
