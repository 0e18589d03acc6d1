//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::cache::{parse_duration, SetOptions};
use crate::error::Result;

/// A TTL given either as milliseconds or as a duration string (`"5m"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TtlInput {
    Millis(u64),
    Text(String),
}

impl TtlInput {
    pub fn to_duration(&self) -> Result<Duration> {
        match self {
            TtlInput::Millis(ms) => Ok(Duration::from_millis(*ms)),
            TtlInput::Text(text) => parse_duration(text),
        }
    }
}

fn resolve(ttl: Option<&TtlInput>) -> Result<Option<Duration>> {
    ttl.map(TtlInput::to_duration).transpose()
}

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL (uses the engine default if not specified)
/// - `tags`: Tags to attach; replaces any previous tags of the key
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub ttl: Option<TtlInput>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.tags.iter().any(String::is_empty) {
            return Some("Tags cannot be empty".to_string());
        }
        None
    }

    /// Builds engine write options, parsing the TTL.
    pub fn options(&self) -> Result<SetOptions> {
        let mut options = SetOptions::new().tags(self.tags.iter().cloned());
        options.ttl = resolve(self.ttl.as_ref())?;
        Ok(options)
    }
}

/// Request body for POST /touch/:key. An absent TTL keeps the entry's own.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TouchRequest {
    #[serde(default)]
    pub ttl: Option<TtlInput>,
}

impl TouchRequest {
    pub fn ttl(&self) -> Result<Option<Duration>> {
        resolve(self.ttl.as_ref())
    }
}
