//! Per-write options for `CacheEngine::set`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

type Condition = dyn Fn(&str, &Value) -> bool + Send + Sync;

// == Set Options ==
/// TTL, tags and an optional write condition.
///
/// A `ttl` of `None` or zero falls back to the engine's default TTL; if
/// that is zero too the entry never expires.
#[derive(Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
    condition: Option<Arc<Condition>>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ttl_ms(self, millis: u64) -> Self {
        self.ttl(Duration::from_millis(millis))
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Only write when `condition(key, value)` holds.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Whether the write should proceed.
    pub fn permits(&self, key: &str, value: &Value) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |condition| condition(key, value))
    }
}

impl fmt::Debug for SetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetOptions")
            .field("ttl", &self.ttl)
            .field("tags", &self.tags)
            .field("condition", &self.condition.is_some())
            .finish()
    }
}
