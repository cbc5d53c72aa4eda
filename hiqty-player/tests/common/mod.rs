// Shared fakes for the player integration tests
//
// - RecordingVoice: voice transport that paces frames like a real sink and
//   records every join, move, frame and disconnect
// - ScriptedBackend: resolution backend registered as "soundcloud" whose
//   streams are scripted per track id

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use hiqty_core::bootstrap::Services;
use hiqty_core::config::PlayerConfig;
use hiqty_core::media::{
    BackendError, BackendRegistry, ByteStream, MediaRequest, ResolutionBackend, ResolvedTrack,
    TrackEnvelope, TrackInfo,
};
use hiqty_core::voice::{VoiceConnection, VoiceTransport};
use hiqty_core::{KeyBuilder, MemoryStore, Store};
use hiqty_player::codec::encode_frames;
use hiqty_player::PlayerController;
use parking_lot::Mutex;
use serde_json::{json, Value};
use url::Url;

pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    Join { guild: String, channel: String },
    Move { guild: String, channel: String },
    Frame { guild: String, payload: Bytes },
    Disconnect { guild: String },
}

#[derive(Default)]
pub struct RecordingVoice {
    events: Arc<Mutex<Vec<VoiceEvent>>>,
    fail_joins: AtomicBool,
    disconnect_delay: Mutex<Duration>,
}

impl RecordingVoice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<VoiceEvent> {
        self.events.lock().clone()
    }

    pub fn fail_joins(&self, fail: bool) {
        self.fail_joins.store(fail, Ordering::SeqCst);
    }

    /// Make every later connection take `delay` to disconnect
    pub fn slow_disconnect(&self, delay: Duration) {
        *self.disconnect_delay.lock() = delay;
    }

    pub fn joins(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                VoiceEvent::Join { channel, .. } => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }

    /// Frame payloads as strings, in send order
    pub fn frames(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                VoiceEvent::Frame { payload, .. } => {
                    Some(String::from_utf8_lossy(payload).into_owned())
                }
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, VoiceEvent::Disconnect { .. }))
            .count()
    }
}

#[async_trait]
impl VoiceTransport for RecordingVoice {
    async fn join(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> hiqty_core::Result<Box<dyn VoiceConnection>> {
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(hiqty_core::Error::Voice("gateway unavailable".to_string()));
        }
        self.events.lock().push(VoiceEvent::Join {
            guild: guild_id.to_string(),
            channel: channel_id.to_string(),
        });
        Ok(Box::new(RecordingConnection {
            guild: guild_id.to_string(),
            channel: channel_id.to_string(),
            events: self.events.clone(),
            disconnect_delay: *self.disconnect_delay.lock(),
        }))
    }
}

struct RecordingConnection {
    guild: String,
    channel: String,
    events: Arc<Mutex<Vec<VoiceEvent>>>,
    disconnect_delay: Duration,
}

#[async_trait]
impl VoiceConnection for RecordingConnection {
    fn channel_id(&self) -> &str {
        &self.channel
    }

    async fn change_channel(&mut self, channel_id: &str) -> hiqty_core::Result<()> {
        self.channel = channel_id.to_string();
        self.events.lock().push(VoiceEvent::Move {
            guild: self.guild.clone(),
            channel: channel_id.to_string(),
        });
        Ok(())
    }

    async fn send_frame(&mut self, frame: Bytes) -> hiqty_core::Result<()> {
        tokio::time::sleep(FRAME_INTERVAL).await;
        self.events.lock().push(VoiceEvent::Frame {
            guild: self.guild.clone(),
            payload: frame,
        });
        Ok(())
    }

    async fn set_speaking(&mut self, _speaking: bool) -> hiqty_core::Result<()> {
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> hiqty_core::Result<()> {
        if !self.disconnect_delay.is_zero() {
            tokio::time::sleep(self.disconnect_delay).await;
        }
        self.events.lock().push(VoiceEvent::Disconnect { guild: self.guild });
        Ok(())
    }
}

/// What the stream of a given track id does
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// `n` frames with payloads `{id}:{i}`, then EOF
    Frames(usize),
    /// Opening the stream fails
    Fail,
    /// Never ends
    Endless,
}

#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, Script>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, id: &str, script: Script) {
        self.scripts.lock().insert(id.to_string(), script);
    }

    /// Track ids whose streams were opened, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    fn track_id(track: &Value) -> Result<String, BackendError> {
        track["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidTrack("missing id".to_string()))
    }
}

#[async_trait]
impl ResolutionBackend for ScriptedBackend {
    fn id(&self) -> &'static str {
        "soundcloud"
    }

    fn sniff(&self, url: &Url) -> bool {
        url.host_str() == Some("soundcloud.com")
    }

    async fn resolve(&self, url: &Url) -> Result<Vec<ResolvedTrack>, BackendError> {
        let id = url.path().trim_start_matches('/').to_string();
        Ok(vec![ResolvedTrack {
            envelope: TrackEnvelope::new("soundcloud", json!({ "id": id })),
            info: TrackInfo {
                title: id,
                ..TrackInfo::default()
            },
            unplayable: None,
        }])
    }

    fn track_info(&self, track: &Value) -> Result<TrackInfo, BackendError> {
        Ok(TrackInfo {
            title: Self::track_id(track)?,
            ..TrackInfo::default()
        })
    }

    fn build_media_request(&self, _track: &Value) -> Result<MediaRequest, BackendError> {
        Err(BackendError::Unplayable("scripted".to_string()))
    }

    async fn open_stream(&self, track: &Value) -> Result<ByteStream, BackendError> {
        let id = Self::track_id(track)?;
        self.opened.lock().push(id.clone());

        let script = self
            .scripts
            .lock()
            .get(&id)
            .copied()
            .unwrap_or(Script::Frames(3));
        match script {
            Script::Fail => Err(BackendError::NotFound),
            Script::Frames(n) => {
                let chunks: Vec<Result<Bytes, BackendError>> = (0..n)
                    .map(|i| Ok(encode_frames([format!("{id}:{i}").as_bytes()])))
                    .collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            Script::Endless => Ok(futures::stream::unfold(0usize, move |i| {
                let frame = encode_frames([format!("{id}:{i}").as_bytes()]);
                async move { Some((Ok(frame), i + 1)) }
            })
            .boxed()),
        }
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub keys: KeyBuilder,
    pub backend: Arc<ScriptedBackend>,
    pub services: Services,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Several nodes can share one store
    pub fn with_store(store: MemoryStore) -> Self {
        let backend = ScriptedBackend::new();
        let mut registry = BackendRegistry::new();
        registry.register(backend.clone());

        let keys = KeyBuilder::default();
        let services = Services {
            store: Arc::new(store.clone()),
            keys: keys.clone(),
            backends: Arc::new(registry),
        };
        Self {
            store,
            keys,
            backend,
            services,
        }
    }

    pub fn controller(&self, node_id: &str, voice: Arc<RecordingVoice>) -> Arc<PlayerController> {
        Arc::new(PlayerController::new(
            &self.services,
            voice,
            node_id,
            PlayerConfig::default(),
        ))
    }

    /// Controller whose guild purge scans `scan_batch` keys per step
    pub fn controller_with_scan_batch(
        &self,
        node_id: &str,
        voice: Arc<RecordingVoice>,
        scan_batch: usize,
    ) -> Arc<PlayerController> {
        Arc::new(
            PlayerController::new(&self.services, voice, node_id, PlayerConfig::default())
                .with_scan_batch(scan_batch),
        )
    }

    /// Queue tracks, set the channel and request playback, like a producer
    pub async fn play(&self, guild: &str, channel: &str, ids: &[&str]) {
        self.push(guild, ids).await;
        self.store
            .set(&self.keys.channel(guild), channel)
            .await
            .unwrap();
        self.store
            .set(&self.keys.state(guild), "playing")
            .await
            .unwrap();
    }

    pub async fn push(&self, guild: &str, ids: &[&str]) {
        let entries: Vec<String> = ids.iter().map(|id| envelope(id)).collect();
        self.store
            .list_push_tail(&self.keys.playlist(guild), &entries)
            .await
            .unwrap();
    }

    pub async fn push_raw(&self, guild: &str, raw: &str) {
        self.store
            .list_push_tail(&self.keys.playlist(guild), &[raw.to_string()])
            .await
            .unwrap();
    }

    pub async fn queue_ids(&self, guild: &str) -> Vec<String> {
        self.store
            .list_range(&self.keys.playlist(guild), 0, -1)
            .await
            .unwrap()
            .iter()
            .map(|raw| {
                TrackEnvelope::decode(raw)
                    .map(|e| e.track["id"].as_str().unwrap_or_default().to_string())
                    .unwrap_or_else(|_| raw.clone())
            })
            .collect()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.store.get(key).await.unwrap()
    }

    /// Poll until `key` is gone, failing after a minute of (possibly paused) time
    pub async fn wait_gone(&self, key: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
        while self.get(key).await.is_some() {
            assert!(tokio::time::Instant::now() < deadline, "{key} still present");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn envelope(id: &str) -> String {
    json!({ "service": "soundcloud", "track": { "id": id } }).to_string()
}

/// Poll `cond` until it holds, failing after a minute of (possibly paused) time
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
