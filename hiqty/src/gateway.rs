//! Static gateway
//!
//! Announces a fixed guild list once at startup. A real gateway would also
//! report joins and removals as they happen.

use hiqty_core::voice::GuildEvent;
use tokio::sync::mpsc;

/// Channel pre-filled with a create event per guild. The sender is dropped,
/// so the receiver closes after the last event.
pub fn static_guilds(guilds: &[String]) -> mpsc::Receiver<GuildEvent> {
    let (tx, rx) = mpsc::channel(guilds.len().max(1));
    for guild_id in guilds {
        // capacity covers every guild
        let _ = tx.try_send(GuildEvent::Create(guild_id.clone()));
    }
    rx
}
