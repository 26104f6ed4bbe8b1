#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # bytescope-pipeline
//!
//! Caching, viewport parsing and off-thread request handling on top of the
//! registry and the engine.
//!
//! [`Bytescope`] is the entry point most callers want: it detects formats,
//! parses whole buffers or byte ranges, and memoizes results in an LRU
//! [`ResultCache`]. [`ParseService`] runs the same operations on a bounded
//! worker pool with request ids, timeouts and cancellation.

pub mod cache;
pub mod config;
pub mod facade;
pub mod service;
pub mod viewport;

pub use cache::{CacheKey, CacheStats, ResultCache};
pub use config::{BytescopeConfig, CacheConfig, LimitsConfig, WorkerConfig};
pub use facade::Bytescope;
pub use service::{ParseOutput, ParseRequest, ParseResponse, ParseService, RequestId};
pub use viewport::{RangeResult, ViewportConfig, ViewportPlan};

use thiserror::Error;

/// Errors that can occur in the pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] bytescope_registry::Error),

    #[error(transparent)]
    Stream(#[from] bytescope_stream::Error),

    #[error("No format could be detected for the input")]
    NoFormat,

    #[error("Invalid range {start}..{end}")]
    InvalidRange { start: usize, end: usize },

    #[error("Configuration error in '{path}': {message}")]
    Config { path: String, message: String },

    #[error("Request {id} timed out after {after_ms} ms")]
    Timeout { id: u64, after_ms: u64 },

    #[error("Request {0} is already pending")]
    DuplicateRequest(u64),

    #[error("Request {0} was cancelled")]
    Cancelled(u64),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error for the file or source at `path`
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_keeps_path_context() {
        let error = Error::config("bytescope.yaml", "unknown field `cahce`");
        match error {
            Error::Config { path, message } => {
                assert_eq!(path, "bytescope.yaml");
                assert!(message.contains("cahce"));
            }
            _ => panic!("expected config variant"),
        }
    }

    #[test]
    fn registry_errors_pass_through() {
        let error = Error::from(bytescope_registry::Error::unknown_format("bmp"));
        assert_eq!(error.to_string(), "Unknown format: bmp");
    }
}
