use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;

use super::{merge_with_acks, Store, SubscriptionEvent, SubscriptionSink, SubscriptionStream};
use crate::{Error, Result};

const NOTIFY_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct Faults {
    lease_extends: AtomicBool,
    reads: AtomicBool,
}

/// In-process store with Redis semantics
///
/// TTLs are measured on the tokio clock, so paused-time tests control expiry.
/// Once keyspace events are enabled every mutation is announced on
/// `__keyspace@{db}__:{key}` to the open subscriptions. Clones share state,
/// which lets several simulated nodes use one "cluster".
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: i64,
    entries: Mutex<BTreeMap<String, Entry>>,
    notify: broadcast::Sender<String>,
    keyspace_events: AtomicBool,
    connections: Mutex<CancellationToken>,
    writes: AtomicU64,
    /// Open scan cursors, each resuming after the last key it returned
    scans: Mutex<HashMap<u64, String>>,
    next_scan: AtomicU64,
    faults: Faults,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_db(0)
    }

    #[must_use]
    pub fn with_db(db: i64) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                db,
                entries: Mutex::new(BTreeMap::new()),
                notify,
                keyspace_events: AtomicBool::new(false),
                connections: Mutex::new(CancellationToken::new()),
                writes: AtomicU64::new(0),
                scans: Mutex::new(HashMap::new()),
                next_scan: AtomicU64::new(1),
                faults: Faults::default(),
            }),
        }
    }

    /// Number of mutating commands that changed something
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Remaining time to live of a key, `None` if absent or persistent
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Make every lease extension fail as if the store were unreachable
    pub fn fail_lease_extends(&self, fail: bool) {
        self.inner.faults.lease_extends.store(fail, Ordering::SeqCst);
    }

    /// Make every read fail as if the store were unreachable
    pub fn fail_reads(&self, fail: bool) {
        self.inner.faults.reads.store(fail, Ordering::SeqCst);
    }

    /// End every open subscription stream, like a dropped connection
    pub fn disconnect_subscriptions(&self) {
        let mut token = self.inner.connections.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    fn check_reads(&self) -> Result<()> {
        if self.inner.faults.reads.load(Ordering::SeqCst) {
            return Err(Error::Closed("injected read failure".to_string()));
        }
        Ok(())
    }

    fn changed(&self, key: &str) {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if self.inner.keyspace_events.load(Ordering::SeqCst) {
            let _ = self
                .inner
                .notify
                .send(format!("__keyspace@{}__:{}", self.inner.db, key));
        }
    }

    /// Run `f` on the live entries map with expired keys dropped first.
    fn with_entries<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Entry>) -> T) -> T {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        entries.retain(|_, e| e.is_live(now));
        f(&mut entries)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::Internal(format!("WRONGTYPE operation against key {key}"))
}

/// Glob match supporting `*` and `?`, as used by SCAN MATCH.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// Resolve a Redis-style inclusive range against a list length.
fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_reads()?;
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: None,
                },
            );
        });
        self.changed(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.with_entries(|entries| entries.remove(key).is_some());
        if existed {
            self.changed(key);
        }
        Ok(existed)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.check_reads()?;
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::List(list), .. }) => Ok(range_bounds(list.len(), start, stop)
                .map(|(from, to)| list.range(from..=to).cloned().collect())
                .unwrap_or_default()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        self.check_reads()?;
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry { value: Value::List(list), .. }) => Ok(list.len()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn list_push_tail(&self, key: &str, values: &[String]) -> Result<usize> {
        let len = self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::List(list) => {
                    list.extend(values.iter().cloned());
                    Ok(list.len())
                }
                Value::Str(_) => Err(wrong_type(key)),
            }
        })?;
        if !values.is_empty() {
            self.changed(key);
        }
        Ok(len)
    }

    async fn list_pop_head(&self, key: &str) -> Result<Option<String>> {
        let popped = self.with_entries(|entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(None);
            };
            let Value::List(list) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            let head = list.pop_front();
            // Redis removes a list once it is empty
            if list.is_empty() {
                entries.remove(key);
            }
            Ok(head)
        })?;
        if popped.is_some() {
            self.changed(key);
        }
        Ok(popped)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        self.check_reads()?;
        // Cursors resume by key, so deletes between steps never skip a key.
        // An unknown cursor restarts the iteration.
        let resume = match cursor {
            0 => None,
            id => self.inner.scans.lock().remove(&id),
        };
        let count = count.max(1);
        let (last, more, found) = self.with_entries(|entries| {
            let lower = match resume.as_deref() {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };
            let visited: Vec<&String> = entries
                .range::<str, _>((lower, Bound::Unbounded))
                .take(count)
                .map(|(k, _)| k)
                .collect();
            let last = visited.last().map(|k| (*k).clone());
            let more = last.as_deref().is_some_and(|key| {
                entries
                    .range::<str, _>((Bound::Excluded(key), Bound::Unbounded))
                    .next()
                    .is_some()
            });
            let found: Vec<String> = visited
                .into_iter()
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect();
            (last, more, found)
        });

        let next = match last {
            Some(key) if more => {
                let id = self.inner.next_scan.fetch_add(1, Ordering::SeqCst);
                self.inner.scans.lock().insert(id, key);
                id
            }
            _ => 0,
        };
        Ok((next, found))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let removed: Vec<String> = self.with_entries(|entries| {
            keys.iter()
                .filter(|k| entries.remove(k.as_str()).is_some())
                .cloned()
                .collect()
        });
        for key in &removed {
            self.changed(key);
        }
        Ok(removed.len())
    }

    async fn clear_if_list_empty(&self, list_key: &str, key: &str) -> Result<bool> {
        let cleared = self.with_entries(|entries| {
            let empty = match entries.get(list_key) {
                None => true,
                Some(Entry { value: Value::List(list), .. }) => list.is_empty(),
                Some(_) => return Err(wrong_type(list_key)),
            };
            Ok(empty && entries.remove(key).is_some())
        })?;
        if cleared {
            self.changed(key);
        }
        Ok(cleared)
    }

    async fn lease_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let acquired = self.with_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(token.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            true
        });
        if acquired {
            self.changed(key);
        }
        Ok(acquired)
    }

    async fn lease_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        if self.inner.faults.lease_extends.load(Ordering::SeqCst) {
            return Err(Error::Closed("injected lease extend failure".to_string()));
        }
        let extended = self.with_entries(|entries| match entries.get_mut(key) {
            Some(entry) if matches!(&entry.value, Value::Str(v) if v == token) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        });
        if extended {
            self.changed(key);
        }
        Ok(extended)
    }

    async fn lease_release(&self, key: &str, token: &str) -> Result<bool> {
        let released = self.with_entries(|entries| {
            let owned = matches!(
                entries.get(key),
                Some(Entry { value: Value::Str(v), .. }) if v == token
            );
            owned && entries.remove(key).is_some()
        });
        if released {
            self.changed(key);
        }
        Ok(released)
    }

    async fn enable_keyspace_events(&self) -> Result<()> {
        self.inner.keyspace_events.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn open_subscription(&self) -> Result<(Box<dyn SubscriptionSink>, SubscriptionStream)> {
        let topics = Arc::new(Mutex::new(HashSet::new()));
        let closed = self.inner.connections.lock().clone();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let subscribed = topics.clone();
        let messages = BroadcastStream::new(self.inner.notify.subscribe())
            .take_until(closed.cancelled_owned())
            .filter_map(move |item| {
                let event = match item {
                    Ok(topic) if subscribed.lock().contains(&topic) => {
                        Some(SubscriptionEvent::Message(topic))
                    }
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(n)) => Some(SubscriptionEvent::Error(
                        Error::Internal(format!("subscription lagged by {n} notifications")),
                    )),
                };
                futures::future::ready(event)
            });

        let sink = MemorySubscriptionSink {
            topics,
            acks: ack_tx,
        };
        Ok((
            Box::new(sink),
            merge_with_acks(messages, UnboundedReceiverStream::new(ack_rx)),
        ))
    }
}

struct MemorySubscriptionSink {
    topics: Arc<Mutex<HashSet<String>>>,
    acks: mpsc::UnboundedSender<SubscriptionEvent>,
}

#[async_trait]
impl SubscriptionSink for MemorySubscriptionSink {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.topics.lock().insert(topic.to_string());
        let _ = self.acks.send(SubscriptionEvent::Subscribed(topic.to_string()));
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.topics.lock().remove(topic);
        Ok(())
    }
}
