//! Plain-text rendering of parsed trees

use bytescope_ir::{Document, Node, NodeType};
use std::fmt::Write;

/// Indented tree, children below `max_depth` folded into a count
pub fn tree(node: &Node, max_depth: Option<usize>) -> String {
    let mut out = String::new();
    write_node(&mut out, node, 0, max_depth);
    out
}

fn write_node(out: &mut String, node: &Node, depth: usize, max_depth: Option<usize>) {
    let indent = "  ".repeat(depth);
    let type_name = node
        .type_name
        .as_deref()
        .map(|t| format!(" [{t}]"))
        .unwrap_or_default();
    let marker = if node.instance { " (instance)" } else { "" };

    match node.node_type {
        NodeType::Root | NodeType::Struct | NodeType::Array => {
            let _ = writeln!(
                out,
                "{indent}{}{type_name}{marker} @0x{:X} +{}",
                node.name, node.offset, node.length
            );
        }
        NodeType::Field | NodeType::Error => {
            let _ = writeln!(
                out,
                "{indent}{}{type_name}{marker} @0x{:X} +{} = {}",
                node.name, node.offset, node.length, node.value
            );
        }
    }
    for finding in &node.findings {
        let _ = writeln!(out, "{indent}  ! {}: {}", finding.kind, finding.message);
    }

    if node.children.is_empty() {
        return;
    }
    if max_depth.is_some_and(|max| depth >= max) {
        let _ = writeln!(out, "{indent}  ... {} children", node.children.len());
        return;
    }
    for child in &node.children {
        write_node(out, child, depth + 1, max_depth);
    }
}

/// One line per finding, or a note that there were none
pub fn findings(document: &Document) -> String {
    let findings = document.findings();
    if findings.is_empty() {
        return "No findings\n".to_string();
    }
    let mut out = format!("{} finding(s)\n", findings.len());
    for finding in findings {
        let _ = writeln!(out, "  {finding}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytescope_ir::{Finding, FindingKind, Value};

    fn sample() -> Node {
        let mut root = Node::new("root", NodeType::Root, 0);
        root.length = 6;
        root.add_child(Node::field("count", Value::Unsigned(2), 0, 2));
        let mut items = Node::new("items", NodeType::Array, 2);
        items.length = 4;
        items.add_child(Node::field("items[0]", Value::Unsigned(10), 2, 2));
        items.add_child(Node::field("items[1]", Value::Unsigned(11), 4, 2));
        root.add_child(items);
        root
    }

    #[test]
    fn test_tree_lines() {
        let text = tree(&sample(), None);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "root @0x0 +6");
        assert_eq!(lines[1], "  count @0x0 +2 = 2 (0x2)");
        assert_eq!(lines[3], "    items[0] @0x2 +2 = 10 (0xA)");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_depth_folds_children() {
        let text = tree(&sample(), Some(1));
        assert!(text.contains("    ... 2 children"));
        assert!(!text.contains("items[0]"));
    }

    #[test]
    fn test_findings_listing() {
        let mut root = sample();
        assert_eq!(findings(&Document::new(root.clone())), "No findings\n");

        root.add_finding(Finding::new(FindingKind::OutOfBounds, "read past end", "root", 6));
        let text = findings(&Document::new(root));
        assert!(text.starts_with("1 finding(s)"));
    }
}
