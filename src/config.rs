//! Configuration Module
//!
//! Engine options and server settings, with defaults and environment
//! loading.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::parse_duration;
use crate::error::{CacheError, Result};
use crate::storage::StorageKind;

// == Cache Config ==
/// Options recognized by the cache engine.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries; 0 disables capacity eviction
    pub max_size: usize,
    /// TTL applied when a write doesn't specify one; zero = never expire
    pub default_ttl: Duration,
    /// Renew an entry's lifetime on every successful read
    pub sliding_ttl: bool,
    /// Period of the expired-entry sweep; zero disables the sweep
    pub check_interval: Duration,
    /// Whether counters are maintained
    pub enable_stats: bool,
    /// Per-tag membership caps
    pub max_entries_per_tag: HashMap<String, usize>,
    /// Backend selection
    pub storage: StorageKind,
    /// Events buffered per subscriber before it lags
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::ZERO,
            sliding_ttl: false,
            check_interval: Duration::from_secs(60),
            enable_stats: true,
            max_entries_per_tag: HashMap::new(),
            storage: StorageKind::Memory,
            event_capacity: 1024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_sliding_ttl(mut self, enabled: bool) -> Self {
        self.sliding_ttl = enabled;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.enable_stats = enabled;
        self
    }

    pub fn with_tag_limit(mut self, tag: impl Into<String>, max: usize) -> Self {
        self.max_entries_per_tag.insert(tag.into(), max);
        self
    }

    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Loads options from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - capacity (default: 1000)
    /// - `CACHE_DEFAULT_TTL` - duration string or ms (default: 0, never)
    /// - `CACHE_SLIDING_TTL` - bool (default: false)
    /// - `CACHE_CHECK_INTERVAL` - duration string or ms (default: 60s)
    /// - `CACHE_ENABLE_STATS` - bool (default: true)
    /// - `CACHE_TAG_LIMITS` - `tag=n,tag=n`
    /// - `CACHE_STORAGE` - `memory`, `file`, `json` or `redis` (default: memory)
    /// - `CACHE_STORAGE_PATH` - file for the file backends
    /// - `CACHE_REDIS_URL`, `CACHE_REDIS_PREFIX`
    ///
    /// Malformed durations and unknown backends are errors; other
    /// unparsable values fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let storage = match env::var("CACHE_STORAGE") {
            Ok(name) => StorageKind::from_name(
                &name,
                env::var("CACHE_STORAGE_PATH").ok().map(PathBuf::from),
                env::var("CACHE_REDIS_URL").ok(),
                env::var("CACHE_REDIS_PREFIX").ok(),
            )?,
            Err(_) => defaults.storage,
        };

        Ok(Self {
            max_size: env_parse("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            default_ttl: env_duration("CACHE_DEFAULT_TTL")?.unwrap_or(defaults.default_ttl),
            sliding_ttl: env_parse("CACHE_SLIDING_TTL").unwrap_or(defaults.sliding_ttl),
            check_interval: env_duration("CACHE_CHECK_INTERVAL")?
                .unwrap_or(defaults.check_interval),
            enable_stats: env_parse("CACHE_ENABLE_STATS").unwrap_or(defaults.enable_stats),
            max_entries_per_tag: match env::var("CACHE_TAG_LIMITS") {
                Ok(spec) => parse_tag_limits(&spec)?,
                Err(_) => defaults.max_entries_per_tag,
            },
            storage,
            event_capacity: defaults.event_capacity,
        })
    }
}

// == Server Config ==
/// Settings for the HTTP server binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Loads engine options plus `SERVER_PORT` (default: 3000).
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cache: CacheConfig::from_env()?,
            server_port: env_parse("SERVER_PORT").unwrap_or(3000),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            server_port: 3000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    env::var(name).ok().map(|v| parse_duration(&v)).transpose()
}

/// Parses `tag=n,tag=n`.
pub fn parse_tag_limits(spec: &str) -> Result<HashMap<String, usize>> {
    spec.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (tag, max) = part
                .split_once('=')
                .ok_or_else(|| CacheError::Config(format!("bad tag limit '{}'", part)))?;
            let max = max
                .trim()
                .parse()
                .map_err(|_| CacheError::Config(format!("bad tag limit '{}'", part)))?;
            Ok((tag.trim().to_string(), max))
        })
        .collect()
}
