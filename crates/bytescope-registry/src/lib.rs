#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # bytescope-registry
//!
//! Registry of compiled schemas and format detection.
//!
//! Schemas are indexed by id, by signature (magic bytes at a fixed offset)
//! and by declared file extension. Documents registered lazily are compiled
//! on first use. Detection tries signatures within a bounded prefix first,
//! then the file extension, then a small heuristic table.
//!
//! Raw documents can be persisted through a [`SchemaStore`]: an in-memory
//! [`MemoryStore`] or a [`DirectoryStore`] of `.ksy` files.

pub mod detect;
pub mod format;
pub mod presets;
pub mod registry;
pub mod store;

pub use detect::{Detection, DetectionMethod};
pub use format::{Category, FormatFilter, FormatInfo};
pub use registry::{FormatRegistry, RegistryOptions, RegistryStats};
pub use store::{DirectoryStore, MemoryStore, SchemaStore};

use thiserror::Error;

/// Errors that can occur in the registry
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Invalid format id '{0}'")]
    InvalidId(String),

    #[error("Unknown category '{0}': expected system, user or community")]
    InvalidCategory(String),

    #[error(transparent)]
    Schema(#[from] bytescope_schema::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn unknown_format(id: impl Into<String>) -> Self {
        Self::UnknownFormat(id.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, Error>;
