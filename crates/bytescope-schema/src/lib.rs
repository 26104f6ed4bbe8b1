#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # bytescope-schema
//!
//! Schema model, expression language and compiler for declarative binary
//! format descriptions.
//!
//! A schema document (YAML or JSON) is compiled once into an immutable
//! [`Schema`]: a type arena with resolved type references, enums, parsed
//! expressions and a detection signature. Imports are merged in at compile
//! time through an [`ImportResolver`].

pub mod compiler;
pub mod expr;
pub mod imports;
pub mod model;

pub use compiler::{CompileReport, Compiled, Compiler, CompilerOptions, Diagnostic, compile};
pub use expr::{BinOp, Expr, UnaryOp};
pub use imports::{ImportResolver, NoImports};
pub use model::{
    EndianSpec, EnumId, EnumSpec, FieldSpec, FieldType, InstanceSpec, Meta, ProcessSpec, Repeat,
    Schema, Signature, SwitchSpec, TypeId, TypeSpec, Valid,
};

use thiserror::Error;

/// Errors that can occur when compiling schemas
#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema '{id}' rejected: {report}")]
    Compile { id: String, report: CompileReport },

    #[error("Invalid expression '{expr}': {message}")]
    Expression { expr: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an expression error
    pub fn expression(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// The compile report, if this is a compile error
    pub fn report(&self) -> Option<&CompileReport> {
        match self {
            Self::Compile { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
