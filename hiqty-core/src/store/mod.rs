//! Queue and state store adapter
//!
//! `Store` is the only seam between the player and the shared key-value store.
//! `RedisStore` talks to Redis through a pooled `ConnectionManager`; every
//! subscription gets its own dedicated pub/sub connection. `MemoryStore` is an
//! in-process stand-in with the same semantics (TTLs, keyspace notifications).

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::keys::KeyBuilder;
use crate::{Error, Result};

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Low-level event from a subscription connection.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// Subscription to a topic was confirmed
    Subscribed(String),
    /// A notification arrived on a topic
    Message(String),
    Error(Error),
}

/// Events of one subscription connection. Ends when the connection is lost.
pub type SubscriptionStream = BoxStream<'static, SubscriptionEvent>;

/// Control half of a subscription connection.
///
/// Not safe for concurrent use; callers serialize access.
#[async_trait]
pub trait SubscriptionSink: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<()>;
    async fn unsubscribe(&mut self, topic: &str) -> Result<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Inclusive range, negative indexes count from the tail
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn list_len(&self, key: &str) -> Result<usize>;
    /// Returns the new list length
    async fn list_push_tail(&self, key: &str, values: &[String]) -> Result<usize>;
    async fn list_pop_head(&self, key: &str) -> Result<Option<String>>;

    /// One incremental scan step; a returned cursor of 0 ends the iteration
    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)>;
    async fn delete_many(&self, keys: &[String]) -> Result<usize>;

    /// Delete `key` only if `list_key` is empty, atomically.
    async fn clear_if_list_empty(&self, list_key: &str, key: &str) -> Result<bool>;

    /// Set `key = token` with a TTL unless the key exists
    async fn lease_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;
    /// Reset the TTL if `key` still holds `token`
    async fn lease_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;
    /// Delete `key` if it still holds `token`
    async fn lease_release(&self, key: &str, token: &str) -> Result<bool>;

    /// Turn on keyspace notifications for all event classes
    async fn enable_keyspace_events(&self) -> Result<()>;

    /// Open a dedicated subscription connection
    async fn open_subscription(&self) -> Result<(Box<dyn SubscriptionSink>, SubscriptionStream)>;
}

/// Delete every key of a guild with an incremental scan.
pub async fn purge_guild(
    store: &dyn Store,
    keys: &KeyBuilder,
    guild_id: &str,
    batch: usize,
) -> Result<usize> {
    let pattern = keys.guild_pattern(guild_id);
    let mut cursor = 0;
    let mut removed = 0;

    loop {
        let (next, found) = store.scan(&pattern, cursor, batch).await?;
        if !found.is_empty() {
            removed += store.delete_many(&found).await?;
        }
        if next == 0 {
            break;
        }
        cursor = next;
    }

    tracing::info!(guild_id = %guild_id, removed, "Purged guild keys");
    Ok(removed)
}

/// Merge confirmation events with a connection's message stream.
///
/// The merged stream ends as soon as `messages` ends, even while acks can
/// still be produced.
pub(crate) fn merge_with_acks<M, A>(messages: M, acks: A) -> SubscriptionStream
where
    M: futures::Stream<Item = SubscriptionEvent> + Send + 'static,
    A: futures::Stream<Item = SubscriptionEvent> + Send + 'static,
{
    use futures::StreamExt;

    let messages = messages.map(Some).chain(futures::stream::once(async { None }));
    futures::stream::select(messages, acks.map(Some))
        .take_while(|event| futures::future::ready(event.is_some()))
        .filter_map(futures::future::ready)
        .boxed()
}
