use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Content cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCacheConfig {
    /// Disabled caches answer every lookup with a miss
    pub enabled: bool,

    /// Maximum number of (provider, content hash) entries
    pub max_entries: usize,

    /// Whether successful runs with no findings are cached. Failed runs are
    /// never cached either way.
    pub cache_empty_results: bool,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 2048,
            cache_empty_results: true,
        }
    }
}

impl ContentCacheConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            max_entries: config.cache_capacity,
            ..Self::default()
        }
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }
}
