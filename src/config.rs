use crate::core::{Result, SyncError};
use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_MAX_CACHED_OWNERS: NonZeroUsize = NonZeroUsize::MIN.saturating_add(63);

/// Cache and commit configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on a single remote fetch
    pub fetch_timeout: Option<Duration>,

    /// Upper bound on a single remote commit
    pub commit_timeout: Option<Duration>,

    /// How many owners' carts stay cached before the least recently used is evicted
    pub max_cached_owners: NonZeroUsize,

    /// Authoritative values older than this are refetched on read
    pub stale_after: Option<Duration>,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self {
            fetch_timeout: Some(Duration::from_secs(30)),
            commit_timeout: Some(Duration::from_secs(30)),
            max_cached_owners: DEFAULT_MAX_CACHED_OWNERS,
            stale_after: None,
        }
    }

    /// Set fetch timeout
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Set commit timeout
    pub fn commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = Some(timeout);
        self
    }

    /// Wait on remote calls indefinitely
    pub fn no_timeouts(mut self) -> Self {
        self.fetch_timeout = None;
        self.commit_timeout = None;
        self
    }

    pub fn max_cached_owners(mut self, max: NonZeroUsize) -> Self {
        self.max_cached_owners = max;
        self
    }

    pub fn stale_after(mut self, age: Duration) -> Self {
        self.stale_after = Some(age);
        self
    }

    /// Read overrides from `CARTSYNC_*` environment variables.
    ///
    /// Durations are in milliseconds; `0` disables the timeout.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(ms) = parse_u64(&lookup, "CARTSYNC_FETCH_TIMEOUT_MS")? {
            config.fetch_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = parse_u64(&lookup, "CARTSYNC_COMMIT_TIMEOUT_MS")? {
            config.commit_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(max) = parse_u64(&lookup, "CARTSYNC_MAX_CACHED_OWNERS")? {
            config.max_cached_owners = usize::try_from(max)
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or_else(|| {
                    SyncError::InvalidConfig(format!(
                        "CARTSYNC_MAX_CACHED_OWNERS must be between 1 and {}, got {}",
                        usize::MAX,
                        max
                    ))
                })?;
        }
        if let Some(ms) = parse_u64(&lookup, "CARTSYNC_STALE_AFTER_MS")? {
            config.stale_after = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout == Some(Duration::ZERO) || self.commit_timeout == Some(Duration::ZERO) {
            return Err(SyncError::InvalidConfig(
                "timeouts must be non-zero when set".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_u64<F>(lookup: &F, name: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::InvalidConfig(format!("{} must be an integer, got '{}'", name, raw))),
        None => Ok(None),
    }
}
