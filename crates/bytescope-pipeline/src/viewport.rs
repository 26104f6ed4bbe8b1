//! Range-restricted parsing for large buffers

use bytescope_ir::{Node, NodeType};
use serde::{Deserialize, Serialize};

const MIB: usize = 1024 * 1024;

/// Window sizing for [`crate::Bytescope::parse_range`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Buffers up to this size are parsed whole
    pub large_file_threshold: usize,
    /// Bytes of surrounding context parsed on each side of a request
    pub context: usize,
    /// Largest range served by one request
    pub max_window: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            large_file_threshold: 10 * MIB,
            context: MIB,
            max_window: 2 * MIB,
        }
    }
}

impl ViewportConfig {
    #[must_use]
    pub fn with_large_file_threshold(mut self, bytes: usize) -> Self {
        self.large_file_threshold = bytes;
        self
    }

    #[must_use]
    pub fn with_context(mut self, bytes: usize) -> Self {
        self.context = bytes;
        self
    }

    #[must_use]
    pub fn with_max_window(mut self, bytes: usize) -> Self {
        self.max_window = bytes;
        self
    }

    /// Plan a request for `[start, end)` over a buffer of `len` bytes
    ///
    /// The range is clipped to the buffer and to `max_window` bytes from
    /// `start`. Returns `None` when nothing is left to parse.
    pub fn plan(&self, len: usize, start: usize, end: usize) -> Option<ViewportPlan> {
        let end = end
            .min(len)
            .min(start.saturating_add(self.max_window.max(1)));
        if start >= end {
            return None;
        }

        let (window_start, window_end) = if len > self.large_file_threshold {
            (
                start.saturating_sub(self.context),
                end.saturating_add(self.context).min(len),
            )
        } else {
            (0, len)
        };

        Some(ViewportPlan {
            start,
            end,
            window_start,
            window_end,
        })
    }
}

/// Effective range and the window parsed to serve it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewportPlan {
    pub start: usize,
    pub end: usize,
    pub window_start: usize,
    pub window_end: usize,
}

impl ViewportPlan {
    /// Whether the window is the whole buffer
    pub fn covers(&self, len: usize) -> bool {
        self.window_start == 0 && self.window_end == len
    }
}

/// Nodes overlapping a requested range, in absolute file coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeResult {
    pub format_id: String,
    pub start: usize,
    pub end: usize,
    pub window_start: usize,
    pub window_end: usize,
    pub nodes: Vec<Node>,
}

impl RangeResult {
    pub fn empty(format_id: impl Into<String>, start: usize) -> Self {
        Self {
            format_id: format_id.into(),
            start,
            end: start,
            window_start: start,
            window_end: start,
            nodes: Vec::new(),
        }
    }

    pub fn from_plan(format_id: impl Into<String>, plan: ViewportPlan, nodes: Vec<Node>) -> Self {
        Self {
            format_id: format_id.into(),
            start: plan.start,
            end: plan.end,
            window_start: plan.window_start,
            window_end: plan.window_end,
            nodes,
        }
    }
}

/// Children of `root` overlapping `[start, end)`
///
/// Arrays keep only their overlapping elements; structs keep all children.
pub fn select_range(root: &Node, start: usize, end: usize) -> Vec<Node> {
    root.children
        .iter()
        .filter(|child| child.overlaps(start, end))
        .map(|child| prune(child.clone(), start, end))
        .collect()
}

fn prune(mut node: Node, start: usize, end: usize) -> Node {
    if node.node_type == NodeType::Array {
        node.children = node
            .children
            .into_iter()
            .filter(|element| element.overlaps(start, end))
            .map(|element| prune(element, start, end))
            .collect();
    }
    node
}
