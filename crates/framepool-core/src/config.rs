use serde::{Deserialize, Serialize};

/// Frames a free entry may sit unused before [`crate::ResourcePool::gc`] destroys it.
pub const DEFAULT_EVICTION_THRESHOLD: u64 = 10;

/// Streaming allocations are sized to this multiple of the logical buffer size,
/// so that several writes can be packed into one allocation.
pub const DEFAULT_STREAM_GROWTH_FACTOR: u64 = 4;

/// Tuning knobs for a single [`crate::ResourcePool`].
///
/// Different pools (e.g vertex staging vs. uniform staging) can be given different
/// configurations to trade memory for reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct PoolConfig {
    pub eviction_threshold: u64,
    pub stream_growth_factor: u64,
    /// If false, entries are destroyed as soon as their last reference is released,
    /// instead of being kept around for reuse.
    pub allow_reuse: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            stream_growth_factor: DEFAULT_STREAM_GROWTH_FACTOR,
            allow_reuse: true,
        }
    }
}

impl PoolConfig {
    pub const EVICTION_THRESHOLD_VAR: &'static str = "FRAMEPOOL_EVICTION_THRESHOLD";
    pub const STREAM_GROWTH_VAR: &'static str = "FRAMEPOOL_STREAM_GROWTH";
    pub const DEBUG_VAR: &'static str = "FRAMEPOOL_DEBUG";

    /// Defaults, overridden by any `FRAMEPOOL_*` environment variables that are set.
    ///
    /// `FRAMEPOOL_DEBUG` disables reuse entirely, which makes use-after-release bugs
    /// show up as validation errors rather than silent corruption.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(threshold) = Self::parse_var(Self::EVICTION_THRESHOLD_VAR) {
            config.eviction_threshold = threshold;
        }
        if let Some(factor) = Self::parse_var(Self::STREAM_GROWTH_VAR) {
            config.stream_growth_factor = factor.max(1);
        }
        if std::env::var(Self::DEBUG_VAR).is_ok() {
            log::warn!("{} set, pooled buffers will not be reused", Self::DEBUG_VAR);
            config.allow_reuse = false;
        }
        config
    }

    fn parse_var(name: &str) -> Option<u64> {
        let raw = std::env::var(name).ok()?;
        match raw.trim().parse::<u64>() {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring {}={:?}: {}", name, raw, e);
                None
            }
        }
    }

    pub fn with_eviction_threshold(mut self, eviction_threshold: u64) -> Self {
        self.eviction_threshold = eviction_threshold;
        self
    }

    pub fn with_stream_growth_factor(mut self, stream_growth_factor: u64) -> Self {
        self.stream_growth_factor = stream_growth_factor.max(1);
        self
    }

    pub fn with_reuse(mut self, allow_reuse: bool) -> Self {
        self.allow_reuse = allow_reuse;
        self
    }
}
