//! Playback session
//!
//! One session per guild this process holds the lease for. It drains the
//! guild's queue head-first until the queue is empty, its cancel token fires,
//! the process shuts down or the lease is lost.
//!
//! Cancel (desired state went to stopped) lets the in-flight track play out
//! what is already buffered and leaves it at the queue head. Shutdown is only
//! observed between tracks, so the current track finishes and is popped. Lease
//! loss aborts immediately.

mod keeper;
pub mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use hiqty_core::config::PlayerConfig;
use hiqty_core::media::{BackendRegistry, ResolutionBackend, TrackEnvelope, TrackInfo};
use hiqty_core::voice::{VoiceConnection, VoiceTransport};
use hiqty_core::{KeyBuilder, Lease, LeaseManager, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use keeper::LeaseKeeper;
pub use pipeline::{run_pipeline, PipelineConfig, PipelineEnd};

/// Everything a session needs from the process
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn Store>,
    pub keys: KeyBuilder,
    pub leases: LeaseManager,
    pub backends: Arc<BackendRegistry>,
    pub voice: Arc<dyn VoiceTransport>,
    pub settings: PlayerConfig,
}

/// Why a session's run loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Queue empty, desired state cleared
    QueueDrained,
    /// Cancelled by the controller (stopped or guild removed)
    Cancelled,
    /// Lease extension failed; nothing after that was played
    LeaseLost,
    /// Process shutdown observed between tracks
    Drained,
}

enum TrackOutcome {
    /// Played to the end
    Finished,
    /// Could not be played; skip it
    Failed,
    /// Stopped early; stays at the queue head
    Interrupted,
    /// Voice connection broke; retry the track after rejoining
    VoiceFailed,
    LeaseLost,
}

pub struct PlaybackSession {
    ctx: SessionContext,
    guild_id: String,
    lease: Lease,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    voice: Option<Box<dyn VoiceConnection>>,
}

impl PlaybackSession {
    /// `cancel` is this session's own scope; `shutdown` is the process-wide
    /// admission scope and must not be a parent of `cancel`.
    pub fn new(
        ctx: SessionContext,
        guild_id: impl Into<String>,
        lease: Lease,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            guild_id: guild_id.into(),
            lease,
            cancel,
            shutdown,
            voice: None,
        }
    }

    #[must_use]
    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Play until an exit condition, then leave voice and release the lease
    /// (unless it was lost).
    pub async fn run(mut self) -> SessionExit {
        let keeper = LeaseKeeper::spawn(
            self.ctx.leases.clone(),
            self.lease.clone(),
            self.ctx.settings.lease_renew_interval(),
        );
        let lost = keeper.lost();

        info!(lease_key = %self.lease.key(), "Session started");
        let exit = self.play_queue(&lost).await;

        if let Some(conn) = self.voice.take() {
            if let Err(e) = conn.disconnect().await {
                warn!(error = %e, "Voice disconnect failed");
            }
        }
        keeper.stop().await;
        if exit != SessionExit::LeaseLost {
            self.ctx.leases.release(self.lease).await;
        }

        info!(exit = ?exit, "Session ended");
        exit
    }

    async fn play_queue(&mut self, lost: &CancellationToken) -> SessionExit {
        let playlist = self.ctx.keys.playlist(&self.guild_id);

        loop {
            if lost.is_cancelled() {
                return SessionExit::LeaseLost;
            }
            if self.cancel.is_cancelled() {
                return SessionExit::Cancelled;
            }
            if self.shutdown.is_cancelled() {
                return SessionExit::Drained;
            }

            let head = match self.ctx.store.list_range(&playlist, 0, 0).await {
                Ok(entries) => entries.into_iter().next(),
                Err(e) => {
                    error!(error = %e, "Failed to read queue head");
                    self.pause(lost, self.ctx.settings.voice_retry_interval()).await;
                    continue;
                }
            };

            let Some(raw) = head else {
                match self.finish_if_empty(&playlist).await {
                    Ok(true) => return SessionExit::QueueDrained,
                    Ok(false) => continue,
                    Err(e) => {
                        error!(error = %e, "Failed to clear desired state");
                        self.pause(lost, self.ctx.settings.voice_retry_interval()).await;
                        continue;
                    }
                }
            };

            let (backend, envelope, info) = match decode_entry(&self.ctx.backends, &raw) {
                Ok(decoded) => decoded,
                Err(reason) => {
                    warn!(reason = %reason, "Discarding malformed queue entry");
                    self.pop_head(&playlist).await;
                    continue;
                }
            };

            if let Err(e) = self.ensure_voice().await {
                warn!(error = %e, "Voice not ready, retrying");
                self.pause(lost, self.ctx.settings.voice_retry_interval()).await;
                continue;
            }

            info!(service = %envelope.service, track = %info, "Now playing");
            match self.play_track(backend.as_ref(), &envelope, lost).await {
                TrackOutcome::Finished => {
                    debug!(track = %info, "Track finished");
                    self.pop_head(&playlist).await;
                }
                TrackOutcome::Failed => {
                    self.pop_head(&playlist).await;
                }
                TrackOutcome::Interrupted => {
                    debug!(track = %info, "Track interrupted, left at queue head");
                }
                TrackOutcome::VoiceFailed => {
                    if let Some(conn) = self.voice.take() {
                        let _ = conn.disconnect().await;
                    }
                    self.pause(lost, self.ctx.settings.voice_retry_interval()).await;
                }
                TrackOutcome::LeaseLost => return SessionExit::LeaseLost,
            }
        }
    }

    /// Clear the desired state if the queue is still empty. `Ok(false)`
    /// means an entry arrived in the meantime.
    async fn finish_if_empty(&self, playlist: &str) -> hiqty_core::Result<bool> {
        let state = self.ctx.keys.state(&self.guild_id);
        if self.ctx.store.clear_if_list_empty(playlist, &state).await? {
            info!("Queue drained");
            return Ok(true);
        }
        // state already absent counts as cleared
        Ok(self.ctx.store.list_len(playlist).await? == 0)
    }

    async fn pop_head(&self, playlist: &str) {
        if let Err(e) = self.ctx.store.list_pop_head(playlist).await {
            error!(error = %e, "Failed to pop queue head");
        }
    }

    /// Join the configured channel, moving if it changed since the last check
    async fn ensure_voice(&mut self) -> hiqty_core::Result<()> {
        let channel = self
            .ctx
            .store
            .get(&self.ctx.keys.channel(&self.guild_id))
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| hiqty_core::Error::Voice("no voice channel set".to_string()))?;

        match self.voice.as_mut() {
            Some(conn) if conn.channel_id() == channel => Ok(()),
            Some(conn) => {
                info!(channel_id = %channel, "Moving to voice channel");
                if let Err(e) = conn.change_channel(&channel).await {
                    if let Some(conn) = self.voice.take() {
                        let _ = conn.disconnect().await;
                    }
                    return Err(e);
                }
                Ok(())
            }
            None => {
                info!(channel_id = %channel, "Joining voice channel");
                self.voice = Some(self.ctx.voice.join(&self.guild_id, &channel).await?);
                Ok(())
            }
        }
    }

    async fn play_track(
        &mut self,
        backend: &dyn ResolutionBackend,
        envelope: &TrackEnvelope,
        lost: &CancellationToken,
    ) -> TrackOutcome {
        let stream = tokio::select! {
            biased;
            () = lost.cancelled() => return TrackOutcome::LeaseLost,
            () = self.cancel.cancelled() => return TrackOutcome::Interrupted,
            opened = backend.open_stream(&envelope.track) => opened,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(service = %envelope.service, error = %e, "Skipping track: cannot open stream");
                return TrackOutcome::Failed;
            }
        };

        let Some(conn) = self.voice.as_mut() else {
            return TrackOutcome::VoiceFailed;
        };

        // lease loss aborts every stage; a stop only cuts the source
        let pipeline = lost.child_token();
        let source = pipeline.child_token();
        let config = PipelineConfig {
            chunk_buffer: self.ctx.settings.chunk_buffer,
            frame_buffer: self.ctx.settings.frame_buffer,
        };

        let run = run_pipeline(stream, &mut **conn, config, source.clone(), pipeline);
        tokio::pin!(run);
        let end = loop {
            tokio::select! {
                end = &mut run => break end,
                () = self.cancel.cancelled(), if !source.is_cancelled() => {
                    debug!("Stop requested, finishing buffered audio");
                    source.cancel();
                }
            }
        };

        if lost.is_cancelled() {
            return TrackOutcome::LeaseLost;
        }
        match end {
            PipelineEnd::Completed => TrackOutcome::Finished,
            PipelineEnd::Stopped | PipelineEnd::Aborted => TrackOutcome::Interrupted,
            PipelineEnd::Failed(reason) => {
                warn!(service = %envelope.service, reason = %reason, "Skipping track: playback failed");
                TrackOutcome::Failed
            }
            PipelineEnd::SinkFailed(reason) => {
                warn!(reason = %reason, "Voice connection failed mid-track");
                TrackOutcome::VoiceFailed
            }
        }
    }

    /// Wait out a retry interval, waking early on any exit condition
    async fn pause(&self, lost: &CancellationToken, period: Duration) {
        tokio::select! {
            () = tokio::time::sleep(period) => {}
            () = lost.cancelled() => {}
            () = self.cancel.cancelled() => {}
            () = self.shutdown.cancelled() => {}
        }
    }
}

/// Both decode passes; any failure makes the entry unplayable.
fn decode_entry(
    backends: &BackendRegistry,
    raw: &str,
) -> Result<(Arc<dyn ResolutionBackend>, TrackEnvelope, TrackInfo), String> {
    let (backend, envelope) = backends.decode(raw).map_err(|e| e.to_string())?;
    let info = backend
        .track_info(&envelope.track)
        .map_err(|e| format!("{}: {e}", envelope.service))?;
    Ok((backend, envelope, info))
}
