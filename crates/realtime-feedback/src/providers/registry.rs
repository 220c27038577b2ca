//! Provider registry, built once at startup and frozen inside the engine

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{EngineConfig, SessionConfig};
use crate::feedback::Phase;
use crate::providers::{
    CompletionProvider, FeedbackProvider, GasProvider, LlmProvider, PatternProvider,
    ProviderMetadata, SecurityProvider, SyntaxProvider,
};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn FeedbackProvider>>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the reference providers. The LLM provider is only
    /// added when a backend URL is configured.
    pub fn with_builtin(config: &EngineConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(SyntaxProvider::new()))?;
        registry.register(Arc::new(PatternProvider::new()))?;
        registry.register(Arc::new(CompletionProvider::new()))?;
        registry.register(Arc::new(SecurityProvider::new()))?;
        registry.register(Arc::new(GasProvider::new()))?;

        if let Some(url) = &config.llm_backend_url {
            let provider = LlmProvider::new(url, Duration::from_secs(config.llm_timeout_seconds))?;
            registry.register(Arc::new(provider))?;
        }

        info!("Provider registry initialized with {} providers", registry.len());
        Ok(registry)
    }

    /// Registration order is the order results appear in a partition.
    pub fn register(&mut self, provider: Arc<dyn FeedbackProvider>) -> Result<()> {
        let id = provider.id().to_string();
        if id.trim().is_empty() {
            anyhow::bail!("provider id must not be empty");
        }
        if self.index.contains_key(&id) {
            anyhow::bail!("provider '{}' is already registered", id);
        }

        self.index.insert(id, self.providers.len());
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn FeedbackProvider>> {
        self.index.get(id).map(|&idx| &self.providers[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn metadata(&self) -> Vec<ProviderMetadata> {
        self.providers.iter().map(|p| p.metadata()).collect()
    }

    /// Providers of `phase` enabled by the session, in registration order.
    pub fn select(&self, phase: Phase, session: &SessionConfig) -> Vec<Arc<dyn FeedbackProvider>> {
        self.providers
            .iter()
            .filter(|p| p.phase() == phase && session.is_enabled(p.id()))
            .cloned()
            .collect()
    }

    pub fn has_enabled(&self, phase: Phase, session: &SessionConfig) -> bool {
        self.providers
            .iter()
            .any(|p| p.phase() == phase && session.is_enabled(p.id()))
    }
}
