//! Integration tests for bytescope-registry
//!
//! These tests detect and parse small hand-built files with the built-in
//! formats, and exercise persistence through a directory store.

use bytescope_engine::parse;
use bytescope_ir::{Cursor, FindingKind, Value};
use bytescope_registry::{
    Category, DetectionMethod, DirectoryStore, FormatRegistry, SchemaStore,
};
use std::sync::Arc;
use tempfile::TempDir;

fn png_sample() -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&[0, 0, 0, 13]);
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&[0, 0, 0, 2, 0, 0, 0, 3, 8, 6, 0, 0, 0]);
    data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(b"IEND");
    data.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
    data
}

fn gif_sample() -> Vec<u8> {
    let mut data = b"GIF89a".to_vec();
    // 1x1 screen with a two-entry global color table
    data.extend_from_slice(&[1, 0, 1, 0, 0x80, 0, 0]);
    data.extend_from_slice(&[0, 0, 0, 0xFF, 0xFF, 0xFF]);
    // graphic control extension
    data.extend_from_slice(&[0x21, 0xF9, 4, 0, 0, 0, 0, 0]);
    // image descriptor and data
    data.extend_from_slice(&[0x2C, 0, 0, 0, 0, 1, 0, 1, 0, 0, 2, 2, 0x44, 0x01, 0]);
    data.push(0x3B);
    data
}

fn elf_sample() -> Vec<u8> {
    let mut data = vec![0x7F, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    data.extend_from_slice(&2u16.to_le_bytes());
    data.extend_from_slice(&62u16.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&0x40_1000u64.to_le_bytes());
    data.extend_from_slice(&64u64.to_le_bytes());
    data.extend_from_slice(&0u64.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    for half in [64u16, 56, 1, 64, 0, 0] {
        data.extend_from_slice(&half.to_le_bytes());
    }
    data
}

fn zip_sample() -> Vec<u8> {
    let mut data = b"PK\x03\x04".to_vec();
    data.extend_from_slice(&[20, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    data.extend_from_slice(&[0x11, 0x22, 0x33, 0x44]);
    data.extend_from_slice(&3u32.to_le_bytes());
    data.extend_from_slice(&3u32.to_le_bytes());
    data.extend_from_slice(&5u16.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(b"a.txt");
    data.extend_from_slice(b"abc");
    data.extend_from_slice(b"PK\x05\x06");
    data.extend_from_slice(&[0u8; 18]);
    data
}

fn mz_sample() -> Vec<u8> {
    let mut data = vec![0u8; 64];
    data[0..2].copy_from_slice(b"MZ");
    data[8..10].copy_from_slice(&4u16.to_le_bytes());
    data[24..26].copy_from_slice(&0x40u16.to_le_bytes());
    data[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    data
}

#[test]
fn test_builtins_detect_by_signature() {
    let registry = FormatRegistry::with_builtins();
    let samples = [
        ("png", png_sample()),
        ("gif", gif_sample()),
        ("elf", elf_sample()),
        ("zip", zip_sample()),
        ("dos_mz", mz_sample()),
    ];
    for (expected, data) in samples {
        let found = registry.detect(&data, None).expect(expected);
        assert_eq!(found.format_id, expected);
        assert_eq!(found.method, DetectionMethod::Signature);
    }
    assert_eq!(registry.stats().compiled_count, 0);
}

#[test]
fn test_png_parse() -> anyhow::Result<()> {
    let registry = FormatRegistry::with_builtins();
    let schema = registry.get("png")?;
    let doc = parse(&schema, &png_sample());
    let cursor = Cursor::new(&doc.root);

    assert!(doc.findings().is_empty(), "{:?}", doc.findings());
    let chunks = cursor.navigate("chunks").ok().map(|c| c.node().children.len());
    assert_eq!(chunks, Some(2));
    let header = &doc.root.children[1].children[0];
    let body = header.find_child("body").expect("IHDR body");
    assert_eq!(body.type_name.as_deref(), Some("ihdr_chunk"));
    assert_eq!(body.find_child("height").map(|n| n.value.clone()), Some(Value::Unsigned(3)));
    assert_eq!(
        body.find_child("color_type").map(|n| n.value.clone()),
        Some(Value::Enum {
            value: 6,
            label: "truecolor_alpha".into()
        })
    );
    assert_eq!(doc.root.length, png_sample().len());
    Ok(())
}

#[test]
fn test_gif_parse() -> anyhow::Result<()> {
    let registry = FormatRegistry::with_builtins();
    let schema = registry.get("gif")?;
    let data = gif_sample();
    let doc = parse(&schema, &data);

    assert!(doc.findings().is_empty(), "{:?}", doc.findings());
    let root = &doc.root;
    assert_eq!(
        root.find_child("global_color_table").map(|n| n.length),
        Some(6)
    );
    let blocks = root.find_child("blocks").expect("blocks");
    assert_eq!(blocks.children.len(), 3);
    let image = blocks.children[1].find_child("body").expect("image body");
    assert_eq!(image.find_child("width").map(|n| n.value.clone()), Some(Value::Unsigned(1)));
    assert_eq!(root.length, data.len());
    Ok(())
}

#[test]
fn test_elf_endianness_follows_header() -> anyhow::Result<()> {
    let registry = FormatRegistry::with_builtins();
    let schema = registry.get("elf")?;
    let doc = parse(&schema, &elf_sample());
    let cursor = Cursor::new(&doc.root);

    let machine = cursor.navigate("header/machine").ok().map(|c| c.node().value.clone());
    assert_eq!(
        machine,
        Some(Value::Enum {
            value: 62,
            label: "x86_64".into()
        })
    );
    let entry = cursor.navigate("header/entry_point").ok().map(|c| c.node().value.clone());
    assert_eq!(entry, Some(Value::Unsigned(0x40_1000)));
    assert_eq!(doc.root.length, 64);
    Ok(())
}

#[test]
fn test_zip_sections() -> anyhow::Result<()> {
    let registry = FormatRegistry::with_builtins();
    let schema = registry.get("zip")?;
    let doc = parse(&schema, &zip_sample());
    let sections = doc.root.find_child("sections").expect("sections");

    assert_eq!(sections.children.len(), 2);
    let local = sections.children[0].find_child("body").expect("local file");
    assert_eq!(
        local.find_child("file_name").map(|n| n.value.clone()),
        Some(Value::String("a.txt".into()))
    );
    assert_eq!(
        local.find_child("compression_method").map(|n| n.value.clone()),
        Some(Value::Enum {
            value: 0,
            label: "none".into()
        })
    );
    assert!(doc.findings_of(FindingKind::UnknownSwitch).is_empty());
    Ok(())
}

#[test]
fn test_mz_positioned_instance() -> anyhow::Result<()> {
    let registry = FormatRegistry::with_builtins();
    let schema = registry.get("dos_mz")?;
    let doc = parse(&schema, &mz_sample());
    let root = &doc.root;

    assert_eq!(root.find_child("header_len").map(|n| n.value.clone()), Some(Value::Unsigned(64)));
    let new_header = root.find_child("ofs_new_header").expect("ofs_new_header");
    assert_eq!(new_header.value, Value::Unsigned(0x80));
    assert_eq!(new_header.offset, 0x3C);
    assert!(root.find_child("relocations").is_none());
    // the fixed header is 28 bytes; instances do not extend it
    assert_eq!(root.length, 28);
    Ok(())
}

#[test]
fn test_directory_store_round_trip() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = Arc::new(DirectoryStore::new(dir.path())?);
    let registry = FormatRegistry::new().with_store(store.clone());

    registry.register(
        "meta: {id: note, endian: le, file-extension: note}\nseq:\n  - id: magic\n    contents: NOTE\n",
        Category::User,
    )?;
    assert!(dir.path().join("note.ksy").exists());

    let reloaded = FormatRegistry::new().with_store(store.clone());
    assert_eq!(reloaded.load_from_store()?, 1);
    assert_eq!(reloaded.info("note").map(|i| i.category), Some(Category::User));
    assert!(!reloaded.is_compiled("note"));
    let found = reloaded.detect(b"NOTE", None).expect("detected");
    assert_eq!(found.format_id, "note");

    reloaded.remove("note")?;
    assert!(store.list()?.is_empty());
    Ok(())
}
