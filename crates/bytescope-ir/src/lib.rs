#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # bytescope-ir
//!
//! Parsed node tree produced by the interpretation engine.
//!
//! Every node carries the absolute byte offset and length it was read from,
//! a resolved value, ordered children and the non-fatal findings recorded
//! while it was built. Trees are created fresh per parse call and are never
//! mutated after they are handed to a caller.

/// Parse result container and document-level metadata.
pub mod document;
/// Non-fatal findings recorded while parsing.
pub mod finding;
/// Core tree node model.
pub mod node;
/// Cursor-based navigation and visitor walks over parsed trees.
pub mod traversal;

/// Primary parse result type.
pub use document::{Document, DocumentMetadata};
/// Findings attached to nodes.
pub use finding::{Finding, FindingKind, Severity};
/// Node primitives for tree structure and value typing.
pub use node::{Node, NodeType, Value};
/// Traversal entry points.
pub use traversal::{Cursor, Traversal, walk};

use thiserror::Error;

/// Errors that can occur when navigating a parsed tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Node not found at path: {path}")]
    NodeNotFound { path: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl Error {
    /// Build a node-not-found error with path context.
    pub fn node_not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }

    /// Build an invalid-path error with input path and parsing reason.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-local result type for tree navigation.
pub type Result<T> = std::result::Result<T, Error>;
