//! Feedback providers
//!
//! Every analyzer implements [`FeedbackProvider`] and declares the phase it
//! runs in. The engine only ever sees providers through a frozen
//! [`ProviderRegistry`].
//!
//! Built-in reference providers:
//! - `syntax`, `patterns`, `completion`: instant phase
//! - `security`, `gas`: deferred phase
//! - `llm`: deferred phase, registered only when a backend URL is configured
pub mod provider_trait;
pub mod registry;
pub mod syntax_provider;
pub mod pattern_provider;
pub mod completion_provider;
pub mod security_provider;
pub mod gas_provider;
pub mod llm_provider;
pub use provider_trait::{FeedbackProvider, ProviderInput, ProviderMetadata};
pub use registry::ProviderRegistry;
pub use syntax_provider::SyntaxProvider;
pub use pattern_provider::PatternProvider;
pub use completion_provider::CompletionProvider;
pub use security_provider::SecurityProvider;
pub use gas_provider::GasProvider;
pub use llm_provider::LlmProvider;
