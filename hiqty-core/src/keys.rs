//! Redis key namespace
//!
//! Every per-guild key has the shape `{prefix}:server:{guild_id}:{subkey}`.
//! Keyspace notifications wrap a key as `__keyspace@{db}__:{key}`.

use crate::Config;

pub const PLAYLIST: &str = "playlist";
pub const STATE: &str = "state";
pub const CHANNEL: &str = "channel";
pub const PLAYER_LOCK: &str = "player_lock";

/// A per-guild key split back into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuildKey<'a> {
    pub guild_id: &'a str,
    pub subkey: &'a str,
}

/// Builds and decomposes guild keys and their notification topics.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    db: i64,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new("hiqty")
    }
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            db: 0,
        }
    }

    /// Set the logical database used in keyspace topics
    #[must_use]
    pub const fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.redis.key_prefix.clone()).with_db(config.redis.db)
    }

    #[must_use]
    pub const fn db(&self) -> i64 {
        self.db
    }

    #[must_use]
    pub fn guild_key(&self, guild_id: &str, subkey: &str) -> String {
        format!("{}:server:{}:{}", self.prefix, guild_id, subkey)
    }

    /// Queue of JSON track envelopes (List)
    #[must_use]
    pub fn playlist(&self, guild_id: &str) -> String {
        self.guild_key(guild_id, PLAYLIST)
    }

    /// Desired state: `"playing"`, `"stopped"` or absent (String)
    #[must_use]
    pub fn state(&self, guild_id: &str) -> String {
        self.guild_key(guild_id, STATE)
    }

    /// Voice channel to join (String)
    #[must_use]
    pub fn channel(&self, guild_id: &str) -> String {
        self.guild_key(guild_id, CHANNEL)
    }

    /// Playback lease (String + TTL)
    #[must_use]
    pub fn player_lock(&self, guild_id: &str) -> String {
        self.guild_key(guild_id, PLAYER_LOCK)
    }

    /// SCAN pattern matching every key of a guild
    #[must_use]
    pub fn guild_pattern(&self, guild_id: &str) -> String {
        format!("{}:server:{}:*", self.prefix, guild_id)
    }

    /// Keyspace notification topic for a key
    #[must_use]
    pub fn keyspace_topic(&self, key: &str) -> String {
        format!("__keyspace@{}__:{}", self.db, key)
    }

    /// Strip the keyspace wrapper from a notification topic.
    #[must_use]
    pub fn key_from_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix("__keyspace@")?;
        let (db, key) = rest.split_once("__:")?;
        (db.parse::<i64>().ok()? == self.db).then_some(key)
    }

    #[must_use]
    pub fn parse_key<'a>(&self, key: &'a str) -> Option<GuildKey<'a>> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix(":server:")?;
        let (guild_id, subkey) = rest.split_once(':')?;
        if guild_id.is_empty() || subkey.is_empty() {
            return None;
        }
        Some(GuildKey { guild_id, subkey })
    }

    #[must_use]
    pub fn guild_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        self.parse_key(key).map(|k| k.guild_id)
    }

    #[must_use]
    pub fn guild_from_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.key_from_topic(topic).and_then(|key| self.guild_from_key(key))
    }

    /// Guild whose desired state this key holds, if it is a state key.
    #[must_use]
    pub fn state_guild<'a>(&self, key: &'a str) -> Option<&'a str> {
        self.parse_key(key)
            .filter(|k| k.subkey == STATE)
            .map(|k| k.guild_id)
    }
}
