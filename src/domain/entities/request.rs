//! Load requests and cache key derivation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::errors::LoadError;
use crate::domain::ports::Transform;

/// Separator placed between the URL and each transform identifier.
pub const KEY_SEPARATOR: char = '|';

/// Deterministic identifier of a (resource, transform pipeline) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key from a URL and the ordered transform identifiers.
    ///
    /// Each identifier is length-prefixed (`|{len}:{id}`), so identifiers
    /// that contain the separator cannot alias a longer pipeline.
    #[must_use]
    pub fn new<I, S>(url: &str, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::from(url);
        for id in identifiers {
            let id = id.as_ref();
            key.push(KEY_SEPARATOR);
            key.push_str(&id.len().to_string());
            key.push(':');
            key.push_str(id);
        }
        Self(key)
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe name for this key: hex-encoded SHA-256 of the key.
    #[must_use]
    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Scheduling hint for network fetches. Does not affect the cache key.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    /// Lowest priority.
    VeryLow,
    /// Below normal, used for prefetching.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Above normal.
    High,
    /// Highest priority.
    VeryHigh,
}

/// How a request may use the caches. Does not affect the cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Use cached data when present, otherwise load from the network.
    #[default]
    CacheThenLoad,
    /// Skip the disk cache and always hit the network.
    BypassCache,
    /// Never touch the network; fail with `NoData` on a miss.
    CacheOnly,
}

impl CachePolicy {
    /// Whether the disk cache may be consulted.
    #[must_use]
    pub const fn reads_disk(self) -> bool {
        !matches!(self, Self::BypassCache)
    }

    /// Whether the network may be used.
    #[must_use]
    pub const fn allows_network(self) -> bool {
        !matches!(self, Self::CacheOnly)
    }
}

/// An immutable image load request.
#[derive(Clone)]
pub struct Request {
    url: String,
    transforms: Vec<Arc<dyn Transform>>,
    priority: Priority,
    cache_policy: CachePolicy,
    timeout: Option<Duration>,
}

impl Request {
    /// Creates a request for an absolute `http`/`https` URL.
    ///
    /// # Errors
    /// Returns `LoadError::InvalidUrl` if the URL cannot be parsed or uses
    /// another scheme.
    pub fn new(url: &str) -> Result<Self, LoadError> {
        let parsed = reqwest::Url::parse(url).map_err(|_| LoadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(LoadError::invalid_url(url));
        }

        Ok(Self {
            url: parsed.to_string(),
            transforms: Vec::new(),
            priority: Priority::default(),
            cache_policy: CachePolicy::default(),
            timeout: None,
        })
    }

    /// Appends a transform to the pipeline.
    #[must_use]
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Sets the priority hint.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub const fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets the fetch timeout; otherwise the loader default applies.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Normalized URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Transforms in application order.
    #[must_use]
    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    /// Priority hint.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Cache policy.
    #[must_use]
    pub const fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Explicit fetch timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Derives the cache key from the URL and transform identifiers.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.url, self.transforms.iter().map(|t| t.identifier()))
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transforms: Vec<String> = self.transforms.iter().map(|t| t.identifier()).collect();
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("transforms", &transforms)
            .field("priority", &self.priority)
            .field("cache_policy", &self.cache_policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}
