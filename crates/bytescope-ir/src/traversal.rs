//! Traversal and cursor APIs for navigating parsed trees

use crate::Error;
use crate::Result;
use crate::node::{Node, NodeType};

/// A cursor for navigating a parsed tree
pub struct Cursor<'a> {
    /// Current node
    node: &'a Node,

    /// Path to current node (for error reporting)
    path: Vec<String>,
}

/// Trait for traversing a parsed tree
///
/// The lifetime lets visitors keep references into the tree they walk.
pub trait Traversal<'a> {
    /// Visit a node
    fn visit(&mut self, node: &'a Node, path: &[String]);

    /// Called when entering a node with children
    fn enter(&mut self, _node: &'a Node, _path: &[String]) {}

    /// Called when leaving a node with children
    fn leave(&mut self, _node: &'a Node, _path: &[String]) {}

    /// Returns true if traversal should continue
    fn should_continue(&self) -> bool {
        true
    }
}

impl<'a> Cursor<'a> {
    /// Create a new cursor at the given node
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            path: vec![node.name.clone()],
        }
    }

    /// Get the current node
    pub fn node(&self) -> &'a Node {
        self.node
    }

    /// Get the current path
    pub fn path(&self) -> &[String] {
        &self.path
    }

    fn descend(&self, node: &'a Node, segment: String) -> Cursor<'a> {
        let mut path = self.path.clone();
        path.push(segment);
        Cursor { node, path }
    }

    /// Navigate to a child node by name
    pub fn child(&self, name: &str) -> Result<Cursor<'a>> {
        self.node
            .find_child(name)
            .map(|child| self.descend(child, name.to_string()))
            .ok_or_else(|| Error::node_not_found(format!("{}/{}", self.path.join("/"), name)))
    }

    /// Navigate to a child by index
    pub fn child_at(&self, index: usize) -> Result<Cursor<'a>> {
        self.node
            .children
            .get(index)
            .map(|child| self.descend(child, format!("[{index}]")))
            .ok_or_else(|| Error::node_not_found(format!("{}[{}]", self.path.join("/"), index)))
    }

    /// Navigate using a slash-separated path (e.g. `header/chunks[2]/len`)
    ///
    /// `name[i]` selects the i-th element when `name` is an array node,
    /// otherwise the i-th child called `name`.
    pub fn navigate(&self, path: &str) -> Result<Cursor<'a>> {
        let mut cursor = Cursor {
            node: self.node,
            path: self.path.clone(),
        };

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            cursor = match segment.find('[') {
                Some(open) => {
                    let name = &segment[..open];
                    let close = segment
                        .find(']')
                        .ok_or_else(|| Error::invalid_path(path, format!("unclosed bracket in '{segment}'")))?;
                    let index: usize = segment[open + 1..close]
                        .parse()
                        .map_err(|_| Error::invalid_path(path, format!("invalid index in '{segment}'")))?;

                    let target = match cursor.node.find_child(name) {
                        Some(array) if array.node_type == NodeType::Array => array.children.get(index),
                        _ => cursor.node.find_children(name).get(index).copied(),
                    };
                    let target = target.ok_or_else(|| {
                        Error::node_not_found(format!("{}/{}", cursor.path.join("/"), segment))
                    })?;
                    cursor.descend(target, segment.to_string())
                }
                None => cursor.child(segment)?,
            };
        }

        Ok(cursor)
    }
}

/// Walk the tree using a visitor
pub fn walk<'a, T: Traversal<'a>>(node: &'a Node, visitor: &mut T) {
    walk_recursive(node, visitor, &mut vec![]);
}

fn walk_recursive<'a, T: Traversal<'a>>(node: &'a Node, visitor: &mut T, path: &mut Vec<String>) {
    if !visitor.should_continue() {
        return;
    }

    visitor.visit(node, path);

    if !node.children.is_empty() {
        visitor.enter(node, path);
        path.push(node.name.clone());

        for child in &node.children {
            walk_recursive(child, visitor, path);
        }

        path.pop();
        visitor.leave(node, path);
    }
}
