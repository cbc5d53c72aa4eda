use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stable identity of this process; generated at startup when unset
    pub node_id: Option<String>,
    pub redis: RedisConfig,
    pub player: PlayerConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
    /// Guilds announced by the static gateway
    pub guilds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Logical database index, part of every keyspace notification topic
    pub db: i64,
    pub key_prefix: String,
    pub connect_timeout_seconds: u64,
    /// COUNT hint for incremental SCAN during guild teardown
    pub scan_batch: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            key_prefix: "hiqty".to_string(),
            connect_timeout_seconds: 5,
            scan_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub lease_ttl_seconds: u64,
    pub lease_renew_interval_seconds: u64,
    pub lock_retry_interval_seconds: u64,
    pub voice_retry_interval_seconds: u64,
    /// Periodic re-check of every known guild, covers lost notifications
    pub resync_interval_seconds: u64,
    pub watcher_reconnect_max_seconds: u64,
    /// Capacity of the fetch -> demux channel
    pub chunk_buffer: usize,
    /// Capacity of the demux -> emit channel
    pub frame_buffer: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: 15,
            lease_renew_interval_seconds: 10,
            lock_retry_interval_seconds: 2,
            voice_retry_interval_seconds: 5,
            resync_interval_seconds: 60,
            watcher_reconnect_max_seconds: 30,
            chunk_buffer: 4,
            frame_buffer: 8,
        }
    }
}

impl PlayerConfig {
    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }

    #[must_use]
    pub const fn lease_renew_interval(&self) -> Duration {
        Duration::from_secs(self.lease_renew_interval_seconds)
    }

    #[must_use]
    pub const fn lock_retry_interval(&self) -> Duration {
        Duration::from_secs(self.lock_retry_interval_seconds)
    }

    #[must_use]
    pub const fn voice_retry_interval(&self) -> Duration {
        Duration::from_secs(self.voice_retry_interval_seconds)
    }

    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    #[must_use]
    pub const fn watcher_reconnect_max(&self) -> Duration {
        Duration::from_secs(self.watcher_reconnect_max_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Resolution backend credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub soundcloud: SoundCloudConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundCloudConfig {
    pub client_id: Option<String>,
    /// Overrides the public API base (mirrors, tests)
    pub api_base: Option<String>,
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // HIQTY_REDIS__URL, HIQTY_PLAYER__LEASE_TTL_SECONDS, HIQTY_GUILDS=1,2
        builder = builder.add_source(
            Environment::with_prefix("HIQTY")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("guilds")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check cross-field constraints, collecting every violation.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let player = &self.player;

        if self.redis.url.trim().is_empty() {
            errors.push("redis.url must not be empty".to_string());
        }
        if self.redis.key_prefix.is_empty() || self.redis.key_prefix.contains(':') {
            errors.push("redis.key_prefix must be non-empty and contain no ':'".to_string());
        }
        if self.redis.scan_batch == 0 {
            errors.push("redis.scan_batch must be greater than 0".to_string());
        }
        if player.lease_ttl_seconds == 0 {
            errors.push("player.lease_ttl_seconds must be greater than 0".to_string());
        }
        if player.lease_renew_interval_seconds == 0
            || player.lease_renew_interval_seconds >= player.lease_ttl_seconds
        {
            errors.push(format!(
                "player.lease_renew_interval_seconds ({}) must be in 1..{}",
                player.lease_renew_interval_seconds, player.lease_ttl_seconds
            ));
        }
        if player.lock_retry_interval_seconds == 0 {
            errors.push("player.lock_retry_interval_seconds must be greater than 0".to_string());
        }
        if player.voice_retry_interval_seconds == 0 {
            errors.push("player.voice_retry_interval_seconds must be greater than 0".to_string());
        }
        if player.resync_interval_seconds == 0 {
            errors.push("player.resync_interval_seconds must be greater than 0".to_string());
        }
        if player.chunk_buffer == 0 || player.frame_buffer == 0 {
            errors.push("player.chunk_buffer and player.frame_buffer must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Configured node identity, or `{hostname}-{nanoid}`.
    #[must_use]
    pub fn node_id(&self) -> String {
        self.node_id.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "hiqty".to_string());
            format!("{host}-{}", nanoid::nanoid!(6))
        })
    }

    /// Get Redis URL
    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis.url
    }
}
