#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # bytescope-engine
//!
//! Interprets a compiled schema against a byte buffer.
//!
//! The engine never fails outright: out-of-bounds reads, unmatched magic,
//! unresolved expressions and runaway repetition all become findings on the
//! node where they happened, and the partial tree is returned.
//!
//! ```ignore
//! use bytescope_engine::Interpreter;
//!
//! let schema = bytescope_schema::compile(source)?.schema;
//! let document = Interpreter::new(&schema).parse(&bytes);
//! for finding in document.findings() {
//!     println!("{finding}");
//! }
//! ```

mod eval;
pub mod interpreter;
pub mod options;
pub mod value;

pub use interpreter::{Interpreter, parse};
pub use options::{CancelToken, EngineOptions};
pub use value::EvalValue;

use bytescope_ir::FindingKind;
use thiserror::Error;

/// Errors that abort the current field's sequence
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Stream(#[from] bytescope_stream::Error),

    #[error("Type '{type_name}' recursed at offset {offset} without progress or past the depth limit")]
    Recursion { type_name: String, offset: usize },
}

impl Error {
    pub fn recursion(type_name: impl Into<String>, offset: usize) -> Self {
        Self::Recursion {
            type_name: type_name.into(),
            offset,
        }
    }

    /// Finding category recorded for this error
    pub fn finding_kind(&self) -> FindingKind {
        match self {
            Error::Stream(
                bytescope_stream::Error::UnknownProcess(_)
                | bytescope_stream::Error::InvalidBitCount(_),
            ) => FindingKind::UnknownType,
            Error::Stream(_) => FindingKind::OutOfBounds,
            Error::Recursion { .. } => FindingKind::RecursionLimit,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_kinds() {
        let oob = Error::from(bytescope_stream::Error::out_of_bounds(4, 2, 1));
        assert_eq!(oob.finding_kind(), FindingKind::OutOfBounds);
        assert_eq!(Error::recursion("node", 3).finding_kind(), FindingKind::RecursionLimit);
        assert!(Error::recursion("node", 3).to_string().contains("'node'"));
    }
}
