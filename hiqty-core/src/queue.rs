//! Producer-side queue operations
//!
//! These are what a command handler does on behalf of a user: resolve URLs
//! into queue entries, point the guild at a voice channel and flip its
//! desired state. The player only ever observes the results through the store.

use url::Url;

use crate::keys::KeyBuilder;
use crate::media::{BackendError, BackendRegistry, TrackInfo};
use crate::models::{DesiredState, GuildStatus};
use crate::store::Store;
use crate::{Error, Result};

/// Outcome of an enqueue request
#[derive(Debug, Default)]
pub struct EnqueueReport {
    pub queued: Vec<TrackInfo>,
    /// Tracks left out, with the reason
    pub skipped: Vec<(TrackInfo, String)>,
    pub queue_length: usize,
}

/// Resolve every URL and append the playable tracks to the guild's queue.
///
/// Nothing is written unless every URL resolves. The state is set last so a
/// watcher reacting to it already sees the new entries and channel.
pub async fn enqueue_tracks(
    store: &dyn Store,
    keys: &KeyBuilder,
    backends: &BackendRegistry,
    guild_id: &str,
    channel_id: &str,
    urls: &[String],
) -> Result<EnqueueReport> {
    if channel_id.is_empty() {
        return Err(Error::Voice("must be in a voice channel to queue".to_string()));
    }

    let mut report = EnqueueReport::default();
    let mut entries = Vec::new();

    for raw in urls {
        let url = Url::parse(raw).map_err(|e| BackendError::InvalidUrl(format!("{raw}: {e}")))?;
        let backend = backends
            .sniff(&url)
            .ok_or_else(|| BackendError::InvalidUrl(format!("no service recognises {raw}")))?;

        for track in backend.resolve(&url).await? {
            if let Some(reason) = track.unplayable {
                tracing::info!(
                    guild_id = %guild_id,
                    service = %backend.id(),
                    track = %track.info,
                    reason = %reason,
                    "Skipping unplayable track"
                );
                report.skipped.push((track.info, reason));
                continue;
            }
            entries.push(track.envelope.encode()?);
            report.queued.push(track.info);
        }
    }

    report.queue_length = if entries.is_empty() {
        store.list_len(&keys.playlist(guild_id)).await?
    } else {
        store.list_push_tail(&keys.playlist(guild_id), &entries).await?
    };

    if !entries.is_empty() {
        store.set(&keys.channel(guild_id), channel_id).await?;
        store
            .set(&keys.state(guild_id), DesiredState::Playing.as_str())
            .await?;
    }

    tracing::info!(
        guild_id = %guild_id,
        channel_id = %channel_id,
        queued = report.queued.len(),
        skipped = report.skipped.len(),
        queue_length = report.queue_length,
        "Enqueued tracks"
    );
    Ok(report)
}

/// Request playback to stop. The queue and channel are left intact.
pub async fn stop(store: &dyn Store, keys: &KeyBuilder, guild_id: &str) -> Result<()> {
    store
        .set(&keys.state(guild_id), DesiredState::Stopped.as_str())
        .await
}

/// Read everything known about a guild
pub async fn status(store: &dyn Store, keys: &KeyBuilder, guild_id: &str) -> Result<GuildStatus> {
    let state = store.get(&keys.state(guild_id)).await?;
    Ok(GuildStatus {
        guild_id: guild_id.to_string(),
        state: DesiredState::from_value(state.as_deref()),
        channel: store.get(&keys.channel(guild_id)).await?,
        queue_length: store.list_len(&keys.playlist(guild_id)).await?,
        lease_holder: store.get(&keys.player_lock(guild_id)).await?,
    })
}
