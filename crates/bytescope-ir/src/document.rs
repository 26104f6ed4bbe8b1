//! Parse result container
#![allow(clippy::must_use_candidate)] // Builder/constructor API intentionally omits pervasive #[must_use].
#![allow(clippy::return_self_not_must_use)] // Fluent builder methods return Self for ergonomics.

use crate::finding::{Finding, FindingKind};
use crate::node::{Node, NodeType, Value};
use crate::traversal::{Traversal, walk};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The result of one parse call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Root node of the parsed tree
    pub root: Node,

    /// Document-level metadata
    pub metadata: DocumentMetadata,
}

/// Metadata associated with a parse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Format id the tree was parsed with
    pub format_id: Option<String>,

    /// Length of the buffer that was parsed
    pub source_len: usize,

    /// Absolute offset of the parsed window (0 for full parses)
    pub window_start: usize,

    /// Stream bytes consumed by the root sequence
    pub consumed: usize,

    /// Creation timestamp
    pub parsed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Document {
    /// Create a new document with the given root node
    pub fn new(root: Node) -> Self {
        Self {
            root,
            metadata: DocumentMetadata::default(),
        }
    }

    /// Create a new document with metadata
    pub fn with_metadata(root: Node, metadata: DocumentMetadata) -> Self {
        Self { root, metadata }
    }

    /// Set the format id
    pub fn with_format(mut self, format_id: impl Into<String>) -> Self {
        self.metadata.format_id = Some(format_id.into());
        self
    }

    /// Build the single-leaf tree returned when no structure could be parsed
    pub fn error(kind: FindingKind, message: impl Into<String>) -> Self {
        let message = message.into();
        trace!("Building error document: {}", message);

        let mut leaf = Node::field("parse error", Value::String(message.clone()), 0, 0);
        leaf.node_type = NodeType::Error;
        leaf.add_finding(Finding::new(kind, message, "root/parse error", 0));

        let mut root = Node::new("root", NodeType::Root, 0);
        root.add_child(leaf);
        Self::new(root)
    }

    /// Whether this document is an error placeholder
    pub fn is_error(&self) -> bool {
        self.root
            .children
            .first()
            .is_some_and(|c| c.node_type == NodeType::Error)
    }

    /// All findings in the tree, in pre-order
    pub fn findings(&self) -> Vec<&Finding> {
        let mut collector = FindingCollector::default();
        walk(&self.root, &mut collector);
        collector.findings
    }

    /// Findings of one kind
    pub fn findings_of(&self, kind: FindingKind) -> Vec<&Finding> {
        self.findings()
            .into_iter()
            .filter(|f| f.kind == kind)
            .collect()
    }
}

#[derive(Default)]
struct FindingCollector<'a> {
    findings: Vec<&'a Finding>,
}

impl<'a> Traversal<'a> for FindingCollector<'a> {
    fn visit(&mut self, node: &'a Node, _path: &[String]) {
        self.findings.extend(node.findings.iter());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_creation() {
        let root = Node::new("root", NodeType::Root, 0);
        let doc = Document::new(root).with_format("png");

        assert_eq!(doc.root.name, "root");
        assert_eq!(doc.metadata.format_id, Some("png".to_string()));
        assert!(!doc.is_error());
        assert!(doc.findings().is_empty());
    }

    #[test]
    fn test_error_document() {
        let doc = Document::error(FindingKind::SchemaUnavailable, "no schema for format 'x'");

        assert!(doc.is_error());
        assert_eq!(doc.root.children.len(), 1);
        assert_eq!(doc.root.children[0].name, "parse error");
        assert_eq!(doc.findings_of(FindingKind::SchemaUnavailable).len(), 1);
    }

    #[test]
    fn test_findings_are_collected_in_pre_order() {
        let mut root = Node::new("root", NodeType::Root, 0);
        root.add_finding(Finding::new(FindingKind::Cancelled, "first", "root", 0));
        let mut child = Node::field("a", Value::Null, 0, 0);
        child.add_finding(Finding::new(FindingKind::OutOfBounds, "second", "root/a", 0));
        root.add_child(child);

        let doc = Document::new(root);
        let messages: Vec<&str> = doc.findings().iter().map(|f| f.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(doc.findings_of(FindingKind::OutOfBounds).len(), 1);
    }

    #[test]
    fn test_document_metadata_fields() {
        let metadata = DocumentMetadata {
            format_id: Some("zip".to_string()),
            source_len: 4096,
            window_start: 1024,
            consumed: 30,
            parsed_at: Some(chrono::DateTime::UNIX_EPOCH),
        };
        let doc = Document::with_metadata(Node::new("root", NodeType::Root, 0), metadata);

        assert_eq!(doc.metadata.source_len, 4096);
        assert_eq!(doc.metadata.window_start, 1024);
        assert_eq!(doc.metadata.consumed, 30);
        assert_eq!(doc.metadata.parsed_at, Some(chrono::DateTime::UNIX_EPOCH));
    }
}
