//! Engine limits and cooperative cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Limits applied while interpreting a schema
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Hard ceiling on iterations of a single `repeat`
    pub max_repeat: usize,
    /// Maximum user-type nesting depth
    pub max_depth: usize,
    /// Encoding for strings that declare none
    pub default_encoding: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_repeat: 100_000,
            max_depth: 256,
            default_encoding: "UTF-8".to_string(),
        }
    }
}

impl EngineOptions {
    /// Set the repeat ceiling
    #[must_use]
    pub fn with_max_repeat(mut self, max_repeat: usize) -> Self {
        self.max_repeat = max_repeat;
        self
    }

    /// Set the nesting ceiling
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the fallback string encoding
    #[must_use]
    pub fn with_default_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.default_encoding = encoding.into();
        self
    }
}

/// Shared cancellation flag, checked between repeat iterations and fields
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_builder() {
        let options = EngineOptions::default().with_max_repeat(10).with_max_depth(4);
        assert_eq!(options.max_repeat, 10);
        assert_eq!(options.max_depth, 4);
        assert_eq!(options.default_encoding, "UTF-8");
    }
}
