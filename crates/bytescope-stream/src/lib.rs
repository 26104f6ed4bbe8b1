#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # bytescope-stream
//!
//! Read-only access to binary data.
//!
//! This crate provides the [`ByteSource`] abstraction over random-access
//! buffers, the positioned [`Stream`] reader the interpretation engine parses
//! through, byte-array processing (`xor`, `rol`, `ror`) and text decoding.

pub mod encoding;
pub mod process;
pub mod reader;
pub mod source;

pub use process::Process;
pub use reader::{Checkpoint, Endian, Stream};
pub use source::ByteSource;

use thiserror::Error;

/// Errors raised by stream reads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Read of {requested} bytes at offset {offset} exceeds stream end ({available} available)")]
    OutOfBounds {
        offset: usize,
        requested: usize,
        available: usize,
    },

    #[error("Invalid bit count {0}: expected 1..=64")]
    InvalidBitCount(u32),

    #[error("Seek to {pos} outside stream of size {size}")]
    Seek { pos: usize, size: usize },

    #[error("Unknown process '{0}'")]
    UnknownProcess(String),

    #[error("Slice {start}..{end} outside source of length {len}")]
    Slice { start: usize, end: usize, len: usize },
}

impl Error {
    /// Build an out-of-bounds error
    pub fn out_of_bounds(offset: usize, requested: usize, available: usize) -> Self {
        Self::OutOfBounds {
            offset,
            requested,
            available,
        }
    }

    /// Build an unknown-process error
    pub fn unknown_process(name: impl Into<String>) -> Self {
        Self::UnknownProcess(name.into())
    }
}

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, Error>;
