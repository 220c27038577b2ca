// realtime-feedback/src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Process-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub instant_deadline_ms: u64,
    pub deferred_deadline_ms: u64,
    pub default_debounce_ms: u64,
    pub default_max_history: usize,
    pub cache_capacity: usize,
    pub idle_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub notification_capacity: usize,
    pub max_content_bytes: usize,
    pub max_concurrent_deferred: usize,
    pub llm_backend_url: Option<String>,
    pub llm_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instant_deadline_ms: 50,
            deferred_deadline_ms: 5_000,
            default_debounce_ms: 500,
            default_max_history: 1_000,
            cache_capacity: 2_048,
            idle_timeout_seconds: 1_800,
            sweep_interval_seconds: 60,
            notification_capacity: 64,
            max_content_bytes: 1024 * 1024,
            max_concurrent_deferred: Self::auto_detect_deferred_concurrency(),
            llm_backend_url: None,
            llm_timeout_seconds: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let llm_backend_url = env::var("FEEDBACK_LLM_BACKEND_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let config = Self {
            instant_deadline_ms: env_or("FEEDBACK_INSTANT_DEADLINE_MS", defaults.instant_deadline_ms)?,
            deferred_deadline_ms: env_or("FEEDBACK_DEFERRED_DEADLINE_MS", defaults.deferred_deadline_ms)?,
            default_debounce_ms: env_or("FEEDBACK_DEBOUNCE_MS", defaults.default_debounce_ms)?,
            default_max_history: env_or("FEEDBACK_MAX_HISTORY", defaults.default_max_history)?,
            cache_capacity: env_or("FEEDBACK_CACHE_CAPACITY", defaults.cache_capacity)?,
            idle_timeout_seconds: env_or("FEEDBACK_IDLE_TIMEOUT_SECONDS", defaults.idle_timeout_seconds)?,
            sweep_interval_seconds: env_or("FEEDBACK_SWEEP_INTERVAL_SECONDS", defaults.sweep_interval_seconds)?,
            notification_capacity: env_or("FEEDBACK_NOTIFICATION_CAPACITY", defaults.notification_capacity)?,
            max_content_bytes: env_or("FEEDBACK_MAX_CONTENT_BYTES", defaults.max_content_bytes)?,
            max_concurrent_deferred: env_or("FEEDBACK_MAX_CONCURRENT_DEFERRED", defaults.max_concurrent_deferred)?,
            llm_backend_url,
            llm_timeout_seconds: env_or("FEEDBACK_LLM_TIMEOUT_SECONDS", defaults.llm_timeout_seconds)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instant_deadline_ms == 0 || self.deferred_deadline_ms == 0 {
            anyhow::bail!("provider deadlines must be greater than zero");
        }
        if self.instant_deadline_ms >= self.deferred_deadline_ms {
            anyhow::bail!(
                "instant deadline ({}ms) must be below the deferred deadline ({}ms)",
                self.instant_deadline_ms,
                self.deferred_deadline_ms
            );
        }
        if self.default_max_history == 0 {
            anyhow::bail!("history capacity must be greater than zero");
        }
        if self.cache_capacity == 0 {
            anyhow::bail!("cache capacity must be greater than zero");
        }
        if self.notification_capacity == 0 {
            anyhow::bail!("notification capacity must be greater than zero");
        }
        if self.max_concurrent_deferred == 0 {
            anyhow::bail!("deferred concurrency must be greater than zero");
        }
        if self.sweep_interval_seconds == 0 {
            anyhow::bail!("sweep interval must be greater than zero");
        }
        Ok(())
    }

    fn auto_detect_deferred_concurrency() -> usize {
        num_cpus::get().clamp(2, 8)
    }

    pub fn instant_deadline(&self) -> Duration {
        Duration::from_millis(self.instant_deadline_ms)
    }

    pub fn deferred_deadline(&self) -> Duration {
        Duration::from_millis(self.deferred_deadline_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Instant Deadline: {}ms", self.instant_deadline_ms);
        info!("- Deferred Deadline: {}ms", self.deferred_deadline_ms);
        info!("- Debounce Delay: {}ms", self.default_debounce_ms);
        info!("- History Capacity: {}", self.default_max_history);
        info!("- Cache Capacity: {}", self.cache_capacity);
        info!("- Idle Timeout: {}s", self.idle_timeout_seconds);
        info!("- Sweep Interval: {}s", self.sweep_interval_seconds);
        info!("- Notification Capacity: {}", self.notification_capacity);
        info!("- Max Content: {} bytes", self.max_content_bytes);
        info!("- Deferred Concurrency: {}", self.max_concurrent_deferred);
        match &self.llm_backend_url {
            Some(url) => info!("- LLM Backend: {} (timeout {}s)", url, self.llm_timeout_seconds),
            None => info!("- LLM Backend: disabled"),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}

/// Verbosity applied to a session's findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLevel {
    Minimal,
    #[default]
    Normal,
    Verbose,
}

impl FromStr for FeedbackLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "normal" => Ok(Self::Normal),
            "verbose" => Ok(Self::Verbose),
            other => Err(format!("unknown feedback level '{}'", other)),
        }
    }
}

/// Per-session configuration; every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// `None` enables every registered provider.
    pub enabled_providers: Option<BTreeSet<String>>,
    pub feedback_level: FeedbackLevel,
    /// When off, deferred analysis only runs on an explicit trigger.
    pub auto_triggers: bool,
    pub debounce_delay_ms: Option<u64>,
    pub max_history_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled_providers: None,
            feedback_level: FeedbackLevel::Normal,
            auto_triggers: true,
            debounce_delay_ms: None,
            max_history_size: None,
        }
    }
}

impl SessionConfig {
    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_level(mut self, level: FeedbackLevel) -> Self {
        self.feedback_level = level;
        self
    }

    pub fn with_debounce_ms(mut self, delay_ms: u64) -> Self {
        self.debounce_delay_ms = Some(delay_ms);
        self
    }

    pub fn with_max_history(mut self, size: usize) -> Self {
        self.max_history_size = Some(size);
        self
    }

    pub fn with_auto_triggers(mut self, enabled: bool) -> Self {
        self.auto_triggers = enabled;
        self
    }

    pub fn is_enabled(&self, provider_id: &str) -> bool {
        self.enabled_providers
            .as_ref()
            .map_or(true, |set| set.contains(provider_id))
    }

    pub fn debounce_delay(&self, engine: &EngineConfig) -> Duration {
        Duration::from_millis(self.debounce_delay_ms.unwrap_or(engine.default_debounce_ms))
    }

    /// Zero is treated as "use the engine default".
    pub fn history_capacity(&self, engine: &EngineConfig) -> usize {
        self.max_history_size
            .filter(|size| *size > 0)
            .unwrap_or(engine.default_max_history)
    }
}
