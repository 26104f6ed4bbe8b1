//! Node types for the parsed tree

use crate::finding::Finding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node in the parsed tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Field id, instance name, or `name[i]` for array elements
    pub name: String,

    /// Node type
    pub node_type: NodeType,

    /// Resolved scalar value (`Null` for structs and arrays)
    pub value: Value,

    /// Absolute byte offset in the source buffer
    pub offset: usize,

    /// Number of stream bytes consumed while building this node
    pub length: usize,

    /// Child nodes (struct members or array elements)
    pub children: Vec<Node>,

    /// Schema type this node was read as (`u4be`, a user type name, ...)
    pub type_name: Option<String>,

    /// Whether this node comes from an instance rather than the sequence
    #[serde(default)]
    pub instance: bool,

    /// Non-fatal problems recorded while building this node
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// Types of nodes in the parsed tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Root of a parse
    Root,

    /// Instance of a user-defined type
    Struct,

    /// Result of a `repeat`
    Array,

    /// Primitive, string or byte field
    Field,

    /// Placeholder for a parse that could not run at all
    Error,
}

/// Values that can be stored in nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Unsigned integer (u1..u8, bit fields)
    Unsigned(u64),

    /// Signed integer (s1..s8)
    Signed(i64),

    /// IEEE float (f4, f8)
    Float(f64),

    /// Boolean (value instances, `b1` is kept numeric)
    Boolean(bool),

    /// Decoded text
    String(String),

    /// Raw bytes
    Bytes(Vec<u8>),

    /// Integer mapped through a schema enum
    Enum { value: i64, label: String },

    /// Null/empty value
    Null,
}

impl Node {
    /// Create a new empty node at an offset
    pub fn new(name: impl Into<String>, node_type: NodeType, offset: usize) -> Self {
        Self {
            name: name.into(),
            node_type,
            value: Value::Null,
            offset,
            length: 0,
            children: Vec::new(),
            type_name: None,
            instance: false,
            findings: Vec::new(),
        }
    }

    /// Create a leaf field node with a value
    pub fn field(name: impl Into<String>, value: Value, offset: usize, length: usize) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::Field,
            value,
            offset,
            length,
            children: Vec::new(),
            type_name: None,
            instance: false,
            findings: Vec::new(),
        }
    }

    /// Add a child node
    pub fn add_child(&mut self, child: Node) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Set the schema type
    pub fn set_type_name(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Attach a finding
    pub fn add_finding(&mut self, finding: Finding) -> &mut Self {
        self.findings.push(finding);
        self
    }

    /// Find a child by name
    pub fn find_child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Find all children by name
    pub fn find_children(&self, name: &str) -> Vec<&Node> {
        self.children.iter().filter(|c| c.name == name).collect()
    }

    /// Exclusive end offset
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    /// Whether the node's byte range intersects `[start, end)`
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.offset < end && self.end() > start
    }

    /// Move this node and its whole subtree by `delta` bytes
    pub fn shift_offsets(&mut self, delta: usize) {
        self.offset += delta;
        for finding in &mut self.findings {
            finding.offset += delta;
        }
        for child in &mut self.children {
            child.shift_offsets(delta);
        }
    }

    /// Total number of nodes in this subtree, including self
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    /// Whether this node or any descendant carries findings
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty() || self.children.iter().any(Node::has_findings)
    }
}

impl Value {
    /// Integer view of the value, if it has one
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Unsigned(v) => Some(i128::from(*v)),
            Value::Signed(v) => Some(i128::from(*v)),
            Value::Enum { value, .. } => Some(i128::from(*value)),
            Value::Boolean(b) => Some(i128::from(*b)),
            _ => None,
        }
    }

    /// Unsigned view of the value, if it is a non-negative integer
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Convert value to string
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Unsigned(v) => Some(v.to_string()),
            Value::Signed(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Enum { label, .. } => Some(label.clone()),
            Value::Bytes(_) | Value::Null => None,
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(v) => write!(f, "{v} (0x{v:X})"),
            Value::Signed(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::String(s) if s.chars().count() > 50 => {
                let head: String = s.chars().take(50).collect();
                write!(f, "\"{head}...\"")
            }
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Bytes(bytes) => {
                let shown = if bytes.len() <= 16 { bytes.len() } else { 8 };
                let hex: Vec<String> = bytes[..shown].iter().map(|b| format!("{b:02X}")).collect();
                if shown == bytes.len() {
                    write!(f, "{}", hex.join(" "))
                } else {
                    write!(f, "{}... [{} bytes]", hex.join(" "), bytes.len())
                }
            }
            Value::Enum { value, label } => write!(f, "{label} ({value})"),
            Value::Null => write!(f, "null"),
        }
    }
}
