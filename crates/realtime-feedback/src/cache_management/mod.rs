// src/cache_management/mod.rs

//! Content-addressed caching of provider results

pub mod cache_config;
pub mod content_cache;

// Re-exports
pub use cache_config::ContentCacheConfig;
pub use content_cache::{CacheStats, ContentCache, ContentHash, HashScope};
