//! Integration tests for bytescope-engine
//!
//! These tests compile small schemas and check the trees the engine builds
//! for well-formed, truncated and adversarial inputs.

use bytescope_engine::{EngineOptions, Interpreter, parse};
use bytescope_ir::{FindingKind, Node, NodeType, Value};
use bytescope_schema::{Schema, compile};

fn schema(source: &str) -> anyhow::Result<Schema> {
    Ok(compile(source)?.schema)
}

/// Deterministic pseudo-random bytes
fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 56) as u8
        })
        .collect()
}

#[test]
fn test_magic_field_matches() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta:
  id: png_magic
  endian: be
seq:
  - id: magic
    type: u4
    contents: [0x89, 0x50, 0x4E, 0x47]
",
    )?;
    let doc = parse(&schema, &[0x89, 0x50, 0x4E, 0x47]);

    assert_eq!(doc.root.children.len(), 1);
    let magic = &doc.root.children[0];
    assert_eq!(magic.name, "magic");
    assert_eq!(magic.offset, 0);
    assert_eq!(magic.length, 4);
    assert!(doc.findings_of(FindingKind::ValidationMismatch).is_empty());
    Ok(())
}

#[test]
fn test_magic_mismatch_is_recorded_and_parsing_continues() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: magic, endian: be}
seq:
  - id: magic
    contents: [0x89, 0x50]
  - id: after
    type: u1
",
    )?;
    let doc = parse(&schema, &[0x00, 0x50, 0x07]);
    let mismatches = doc.findings_of(FindingKind::ValidationMismatch);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].expected.as_deref(), Some("89 50"));
    assert_eq!(mismatches[0].actual.as_deref(), Some("00 50"));
    assert_eq!(doc.root.find_child("after").map(|n| n.value.clone()), Some(Value::Unsigned(7)));
    Ok(())
}

#[test]
fn test_counted_repeat() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: counted, endian: be}
seq:
  - id: count
    type: u1
  - id: items
    type: u2be
    repeat: expr
    repeat-expr: count
",
    )?;
    let doc = parse(&schema, &[0x02, 0x00, 0x0A, 0x00, 0x0B]);
    let root = &doc.root;

    assert_eq!(root.children[0].value, Value::Unsigned(2));
    let items = &root.children[1];
    assert_eq!(items.node_type, NodeType::Array);
    let values: Vec<_> = items.children.iter().map(|c| c.value.clone()).collect();
    assert_eq!(values, vec![Value::Unsigned(10), Value::Unsigned(11)]);
    assert_eq!(items.children[1].name, "items[1]");
    assert_eq!(root.length, 5);
    assert_eq!(doc.metadata.consumed, 5);
    Ok(())
}

#[test]
fn test_unmatched_switch_falls_back_to_raw_bytes() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: switched, endian: le}
seq:
  - id: type_code
    type: u1
  - id: body
    size: 4
    type:
      switch-on: type_code
      cases:
        0: fixed_a
        1: fixed_b
types:
  fixed_a:
    seq:
      - id: a
        type: u4
  fixed_b:
    seq:
      - id: b
        type: u2
",
    )?;
    let doc = parse(&schema, &[0x02, 0xAA, 0xBB, 0xCC, 0xDD]);
    let body = doc.root.find_child("body").expect("body present");

    assert_eq!(body.value, Value::Bytes(vec![0xAA, 0xBB, 0xCC, 0xDD]));
    assert_eq!(body.length, 4);
    assert_eq!(doc.findings_of(FindingKind::UnknownSwitch).len(), 1);
    assert!(doc.findings_of(FindingKind::OutOfBounds).is_empty());

    let matched = parse(&schema, &[0x01, 0x34, 0x12, 0xCC, 0xDD]);
    let body = matched.root.find_child("body").expect("body present");
    assert_eq!(body.node_type, NodeType::Struct);
    assert_eq!(body.type_name.as_deref(), Some("fixed_b"));
    assert_eq!(body.find_child("b").map(|n| n.value.clone()), Some(Value::Unsigned(0x1234)));
    // the sized region is consumed in full
    assert_eq!(body.length, 4);
    Ok(())
}

#[test]
fn test_truncated_input_yields_partial_tree() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: eight, endian: le}
seq:
  - id: first
    type: u2
  - id: second
    type: u4
  - id: third
    type: u2
",
    )?;
    let doc = parse(&schema, &[1, 0, 9]);
    let root = &doc.root;

    assert_eq!(root.children[0].value, Value::Unsigned(1));
    let second = &root.children[1];
    assert!(second.value.is_null());
    assert_eq!(second.offset, 2);
    let oob = doc.findings_of(FindingKind::OutOfBounds);
    assert_eq!(oob.len(), 1);
    assert_eq!(oob[0].path, "root/second");
    assert!(root.find_child("third").is_none());
    Ok(())
}

#[test]
fn test_adversarial_repeats_terminate() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: hostile, endian: le}
seq:
  - id: never
    type: chunk
    repeat: until
    repeat-until: _.len == 0x1FF
  - id: rest
    type: empty
    repeat: eos
types:
  chunk:
    seq:
      - id: len
        type: u1
      - id: body
        size: len % 4
  empty:
    seq:
      - id: nothing
        size: 0
",
    )?;
    let options = EngineOptions::default().with_max_repeat(1_000);

    for seed in 0..16 {
        for len in [0, 1, 3, 64, 700] {
            let data = noise(seed, len);
            let doc = Interpreter::new(&schema)
                .with_options(options.clone())
                .parse(&data);
            assert!(doc.root.length <= data.len(), "seed {seed} len {len}");
        }
    }

    let doc = Interpreter::new(&schema).with_options(options).parse(&[]);
    assert_eq!(doc.findings_of(FindingKind::ZeroProgress).len(), 1);
    let rest = doc.root.find_child("rest").expect("rest present");
    assert!(rest.children.is_empty());
    Ok(())
}

#[test]
fn test_zero_progress_repeat_is_cut() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: stuck, endian: le}
seq:
  - id: head
    type: u1
  - id: loops
    type: empty
    repeat: until
    repeat-until: false
types:
  empty:
    seq:
      - id: nothing
        size: 0
",
    )?;
    let doc = parse(&schema, &[1, 2, 3]);
    let loops = doc.root.find_child("loops").expect("loops present");
    assert_eq!(loops.children.len(), 1);
    assert_eq!(doc.findings_of(FindingKind::ZeroProgress).len(), 1);
    Ok(())
}

#[test]
fn test_iteration_ceiling() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: many, endian: le}
seq:
  - id: bytes
    type: u1
    repeat: eos
",
    )?;
    let doc = Interpreter::new(&schema)
        .with_options(EngineOptions::default().with_max_repeat(10))
        .parse(&[0u8; 64]);
    let bytes = doc.root.find_child("bytes").expect("bytes present");
    assert_eq!(bytes.children.len(), 10);
    assert_eq!(doc.findings_of(FindingKind::IterationLimit).len(), 1);
    Ok(())
}

#[test]
fn test_fixed_size_fields_account_for_displacement() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: fixed, endian: le}
seq:
  - id: a
    size: 3
  - id: b
    type: u2
  - id: c
    size: 5
  - id: d
    type: u8
",
    )?;
    let data = noise(7, 32);
    let doc = parse(&schema, &data);

    let mut cursor = 0;
    for child in &doc.root.children {
        assert_eq!(child.offset, cursor, "{} starts where the previous ended", child.name);
        cursor += child.length;
    }
    assert_eq!(cursor, 18);
    assert_eq!(doc.root.length, cursor);
    Ok(())
}

#[test]
fn test_parse_is_idempotent() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: twice, endian: be}
seq:
  - id: n
    type: u1
  - id: records
    type: record
    repeat: expr
    repeat-expr: n % 8
instances:
  summary:
    value: n * 2
types:
  record:
    seq:
      - id: tag
        type: str
        size: 2
        encoding: ASCII
      - id: value
        type: s2
",
    )?;
    let data = noise(3, 64);
    let first = parse(&schema, &data);
    let second = parse(&schema, &data);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first.root)?,
        serde_json::to_string(&second.root)?
    );
    Ok(())
}

#[test]
fn test_children_stay_inside_parent() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: nested, endian: le}
seq:
  - id: blocks
    type: block
    repeat: eos
types:
  block:
    seq:
      - id: len
        type: u1
      - id: payload
        size: len
",
    )?;
    let data = noise(11, 256);
    let doc = parse(&schema, &data);

    fn check(node: &Node) {
        for child in &node.children {
            if child.instance || child.value.is_null() {
                continue;
            }
            assert!(child.offset >= node.offset, "{} before {}", child.name, node.name);
            assert!(child.end() <= node.end(), "{} past {}", child.name, node.name);
            check(child);
        }
    }
    check(&doc.root);
    Ok(())
}

#[test]
fn test_default_depth_on_small_caller_stack() -> anyhow::Result<()> {
    let schema = schema(
        r"
meta: {id: deep_nest, endian: le}
seq:
  - id: node
    type: node
types:
  node:
    seq:
      - id: tag
        type: u1
      - id: child
        type: node
        if: tag != 0
",
    )?;
    let data = vec![1u8; 10_000];
    // Same size as a tokio blocking-pool thread
    let recursion_limits = std::thread::scope(|scope| {
        std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn_scoped(scope, || {
                parse(&schema, &data)
                    .findings_of(FindingKind::RecursionLimit)
                    .len()
            })?
            .join()
            .map_err(|_| anyhow::anyhow!("parse thread panicked"))
    })?;
    assert_eq!(recursion_limits, 1);
    Ok(())
}
