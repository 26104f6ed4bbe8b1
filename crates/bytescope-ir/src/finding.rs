//! Findings recorded on nodes while parsing
#![allow(clippy::must_use_candidate)] // Constructor helpers are clear at call sites without #[must_use].
#![allow(clippy::return_self_not_must_use)] // Fluent setters are designed for chaining.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-fatal problem observed while building a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// What went wrong
    pub kind: FindingKind,

    /// Human-readable message
    pub message: String,

    /// Slash-separated path to the affected node
    pub path: String,

    /// Absolute byte offset where the problem was observed
    pub offset: usize,

    /// Severity level
    pub severity: Severity,

    /// Expected value (if applicable)
    pub expected: Option<String>,

    /// Actual value (if applicable)
    pub actual: Option<String>,
}

/// Category of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingKind {
    /// A primitive read ran past the end of the stream
    OutOfBounds,
    /// Magic bytes or a `valid` constraint did not match
    ValidationMismatch,
    /// An expression could not be resolved and fell back to zero/false
    UnresolvedExpression,
    /// A referenced type or process does not exist
    UnknownType,
    /// No switch case matched and no default existed
    UnknownSwitch,
    /// A repeat hit the iteration ceiling
    IterationLimit,
    /// A repeat iteration consumed no bytes
    ZeroProgress,
    /// Type nesting hit the depth ceiling or recursed without progress
    RecursionLimit,
    /// The parse was cancelled cooperatively
    Cancelled,
    /// No usable schema was available for the parse
    SchemaUnavailable,
}

/// Severity level for findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl FindingKind {
    /// Default severity for this kind of finding
    pub fn default_severity(self) -> Severity {
        match self {
            FindingKind::UnresolvedExpression | FindingKind::Cancelled => Severity::Info,
            FindingKind::ValidationMismatch
            | FindingKind::UnknownSwitch
            | FindingKind::IterationLimit
            | FindingKind::ZeroProgress => Severity::Warning,
            FindingKind::OutOfBounds | FindingKind::UnknownType | FindingKind::RecursionLimit => {
                Severity::Error
            }
            FindingKind::SchemaUnavailable => Severity::Fatal,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FindingKind::OutOfBounds => "out-of-bounds",
            FindingKind::ValidationMismatch => "validation-mismatch",
            FindingKind::UnresolvedExpression => "unresolved-expression",
            FindingKind::UnknownType => "unknown-type",
            FindingKind::UnknownSwitch => "unknown-switch",
            FindingKind::IterationLimit => "iteration-limit",
            FindingKind::ZeroProgress => "zero-progress",
            FindingKind::RecursionLimit => "recursion-limit",
            FindingKind::Cancelled => "cancelled",
            FindingKind::SchemaUnavailable => "schema-unavailable",
        };
        f.write_str(name)
    }
}

impl Finding {
    /// Create a new finding with the kind's default severity
    pub fn new(
        kind: FindingKind,
        message: impl Into<String>,
        path: impl Into<String>,
        offset: usize,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            path: path.into(),
            offset,
            severity: kind.default_severity(),
            expected: None,
            actual: None,
        }
    }

    /// Add expected/actual values
    pub fn with_values(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    /// Override the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at 0x{:X}: {}", self.kind, self.path, self.offset, self.message)?;
        if let (Some(expected), Some(actual)) = (&self.expected, &self.actual) {
            write!(f, " (expected {expected}, got {actual})")?;
        }
        Ok(())
    }
}
