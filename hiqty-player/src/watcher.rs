//! Change watcher over keyspace notifications
//!
//! Owns one dedicated subscription connection. `run` turns the connection's
//! low-level events into a plain stream of changed keys.

use std::collections::HashSet;

use futures::future::ready;
use futures::stream::BoxStream;
use futures::StreamExt;
use hiqty_core::store::{Store, SubscriptionEvent, SubscriptionSink, SubscriptionStream};
use hiqty_core::KeyBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Keys that were created, modified or deleted. At-least-once, unordered
/// across keys.
pub type KeyStream = BoxStream<'static, String>;

/// Subscription handle plus its pending event stream.
///
/// `subscribe`/`unsubscribe` are not safe for concurrent use; callers hold an
/// external mutex around the watcher.
pub struct Watcher {
    sink: Box<dyn SubscriptionSink>,
    events: Option<SubscriptionStream>,
    keys: KeyBuilder,
    watched: HashSet<String>,
}

impl Watcher {
    /// Open a dedicated subscription connection
    pub async fn open(store: &dyn Store, keys: KeyBuilder) -> Result<Self> {
        let (sink, events) = store.open_subscription().await?;
        Ok(Self {
            sink,
            events: Some(events),
            keys,
            watched: HashSet::new(),
        })
    }

    /// Watch a key. Subscribing again re-confirms, which yields the key once more.
    pub async fn subscribe(&mut self, key: &str) -> Result<()> {
        self.sink.subscribe(&self.keys.keyspace_topic(key)).await?;
        if self.watched.insert(key.to_string()) {
            debug!(key = %key, "Watching key");
        }
        Ok(())
    }

    pub async fn unsubscribe(&mut self, key: &str) -> Result<()> {
        if self.watched.remove(key) {
            self.sink.unsubscribe(&self.keys.keyspace_topic(key)).await?;
            debug!(key = %key, "Stopped watching key");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_watching(&self, key: &str) -> bool {
        self.watched.contains(key)
    }

    /// Take the changed-key stream. Can only be taken once per connection.
    ///
    /// Confirmations and notifications both yield their key. Receive errors
    /// are logged and skipped unless `token` is already cancelled, which ends
    /// the stream, as does cancellation itself or the connection dropping.
    pub fn run(&mut self, token: CancellationToken) -> Result<KeyStream> {
        let events = self
            .events
            .take()
            .ok_or_else(|| Error::Watcher("change stream already taken".to_string()))?;

        let keys = self.keys.clone();
        let shutdown = token.clone();
        let stream = events
            .take_until(token.cancelled_owned())
            .take_while(move |event| {
                ready(!(matches!(event, SubscriptionEvent::Error(_)) && shutdown.is_cancelled()))
            })
            .filter_map(move |event| {
                let key = match event {
                    SubscriptionEvent::Subscribed(topic) | SubscriptionEvent::Message(topic) => {
                        keys.key_from_topic(&topic).map(str::to_string)
                    }
                    SubscriptionEvent::Error(e) => {
                        warn!(error = %e, "Subscription receive error");
                        None
                    }
                };
                ready(key)
            });

        Ok(stream.boxed())
    }
}
