//! Utilities module - Common text helpers

pub mod text_utils;

// Re-export commonly used utilities
pub use text_utils::TextUtils;
