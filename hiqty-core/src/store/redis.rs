use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::{AsyncCommands, Script};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{merge_with_acks, Store, SubscriptionEvent, SubscriptionSink, SubscriptionStream};
use crate::{Error, Result};

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const CLEAR_IF_EMPTY_SCRIPT: &str = r#"
if redis.call("LLEN", KEYS[1]) == 0 then
    return redis.call("DEL", KEYS[2])
else
    return 0
end
"#;

/// Redis-backed store
///
/// Commands go through a shared `ConnectionManager`; subscriptions open their
/// own connection from the client and never touch the pool.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    connect_timeout: Duration,
    extend_script: Script,
    release_script: Script,
    clear_script: Script,
}

impl RedisStore {
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| Error::Closed(format!("Timed out connecting to Redis at {url}")))??;

        tracing::info!(url = %url, "Connected to Redis");
        Ok(Self {
            client,
            conn,
            connect_timeout,
            extend_script: Script::new(EXTEND_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            clear_script: Script::new(CLEAR_IF_EMPTY_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _: () = self.conn().set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: usize = self.conn().del(key).await?;
        Ok(removed > 0)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        Ok(self.conn().lrange(key, start, stop).await?)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        Ok(self.conn().llen(key).await?)
    }

    async fn list_push_tail(&self, key: &str, values: &[String]) -> Result<usize> {
        if values.is_empty() {
            return self.list_len(key).await;
        }
        Ok(self.conn().rpush(key, values).await?)
    }

    async fn list_pop_head(&self, key: &str) -> Result<Option<String>> {
        Ok(self.conn().lpop(key, None).await?)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn())
            .await?;
        Ok((next, keys))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.conn().del(keys).await?)
    }

    async fn clear_if_list_empty(&self, list_key: &str, key: &str) -> Result<bool> {
        let removed: i64 = self
            .clear_script
            .key(list_key)
            .key(key)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(removed == 1)
    }

    async fn lease_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        // SET key token NX PX ttl
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut self.conn())
            .await?;
        Ok(result.is_some())
    }

    async fn lease_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let result: i64 = self
            .extend_script
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut self.conn())
            .await?;
        Ok(result == 1)
    }

    async fn lease_release(&self, key: &str, token: &str) -> Result<bool> {
        let result: i64 = self
            .release_script
            .key(key)
            .arg(token)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(result == 1)
    }

    async fn enable_keyspace_events(&self) -> Result<()> {
        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("AKE")
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn open_subscription(&self) -> Result<(Box<dyn SubscriptionSink>, SubscriptionStream)> {
        let pubsub = timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| Error::Closed("Timed out opening Redis Pub/Sub connection".to_string()))??;
        let (sink, stream) = pubsub.split();

        let messages =
            stream.map(|msg| SubscriptionEvent::Message(msg.get_channel_name().to_string()));
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let events = merge_with_acks(messages, UnboundedReceiverStream::new(ack_rx));

        Ok((Box::new(RedisSubscriptionSink { sink, acks: ack_tx }), events))
    }
}

struct RedisSubscriptionSink {
    sink: PubSubSink,
    acks: mpsc::UnboundedSender<SubscriptionEvent>,
}

#[async_trait]
impl SubscriptionSink for RedisSubscriptionSink {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.sink.subscribe(topic).await?;
        // The message stream does not surface confirmations, so report them here.
        let _ = self.acks.send(SubscriptionEvent::Subscribed(topic.to_string()));
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.sink.unsubscribe(topic).await?;
        Ok(())
    }
}
