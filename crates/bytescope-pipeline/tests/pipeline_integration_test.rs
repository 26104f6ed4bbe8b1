//! Integration tests for bytescope-pipeline
//!
//! These exercise the facade end to end: configuration, detection through
//! the built-in formats, cached parses, windowed range parses over a "large"
//! buffer and the worker service's timeout path.

use bytescope_engine::EngineOptions;
use bytescope_ir::{NodeType, Value};
use bytescope_pipeline::{
    Bytescope, BytescopeConfig, Error, ParseRequest, ParseService, ViewportConfig, WorkerConfig,
};
use bytescope_registry::{Category, FormatRegistry};
use bytescope_stream::ByteSource;
use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempDir;

const WORDS: &str = "
meta:
  id: words
  endian: le
seq:
  - id: words
    type: u2
    repeat: eos
";

const BYTES: &str = "
meta:
  id: bytes
seq:
  - id: items
    type: u1
    repeat: eos
";

/// Little-endian u16 counter: the word at offset `o` holds `o / 2`
fn counter(len: usize) -> Vec<u8> {
    (0..len / 2)
        .flat_map(|i| u16::try_from(i).unwrap_or(u16::MAX).to_le_bytes())
        .collect()
}

/// In-memory source that logs every slice it serves
struct LoggedSource {
    data: Vec<u8>,
    served: Mutex<Vec<(usize, usize)>>,
}

impl LoggedSource {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            served: Mutex::new(Vec::new()),
        }
    }

    fn served(&self) -> Vec<(usize, usize)> {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ByteSource for LoggedSource {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn slice(&self, start: usize, end: usize) -> bytescope_stream::Result<Cow<'_, [u8]>> {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((start, end));
        self.data.slice(start, end)
    }
}

fn minimal_png() -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(b"IEND");
    data.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
    data
}

#[test]
fn test_from_config_registers_schema_dirs() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(
        dir.path().join("note.ksy"),
        "meta: {id: note, file-extension: note}\nseq:\n  - id: magic\n    contents: NOTE\n  - id: body\n    size-eos: true\n",
    )?;
    let config = BytescopeConfig::from_yaml_str(&format!(
        "cache:\n  capacity: 4\nschema_dirs:\n  - {}\n",
        dir.path().display()
    ))?;

    let scope = Bytescope::from_config(&config)?;
    let stats = scope.registry_stats();
    assert_eq!(stats.format_count, 6);
    assert_eq!(stats.categories.get(&Category::User), Some(&1));
    assert_eq!(scope.cache_stats().capacity, 4);

    let document = scope.parse(b"NOTEhello", None);
    assert_eq!(document.metadata.format_id.as_deref(), Some("note"));
    let body = document.root.find_child("body").map(|n| n.value.clone());
    assert_eq!(body, Some(Value::Bytes(b"hello".to_vec())));
    Ok(())
}

#[test]
fn test_missing_schema_dir_fails_config() {
    let config = BytescopeConfig {
        schema_dirs: vec!["/definitely/not/here".into()],
        ..BytescopeConfig::default()
    };
    assert!(matches!(
        Bytescope::from_config(&config),
        Err(Error::Registry(_))
    ));
}

#[test]
fn test_builtin_parse_is_idempotent() -> anyhow::Result<()> {
    let scope = Bytescope::from_config(&BytescopeConfig::default())?;
    let data = minimal_png();

    let detected = scope.detect_format(&data, Some("image.png")).map(|d| d.format_id);
    assert_eq!(detected.as_deref(), Some("png"));

    let cached = scope.parse(&data, None);
    let again = scope.parse(&data, None);
    scope.clear_cache();
    let recomputed = scope.parse(&data, None);

    assert!(Arc::ptr_eq(&cached, &again));
    assert_eq!(cached.root, recomputed.root);
    assert_eq!(
        serde_json::to_string(&cached.root)?,
        serde_json::to_string(&recomputed.root)?
    );
    assert_eq!(scope.cache_stats().hits, 1);
    Ok(())
}

#[test]
fn test_windowed_range_uses_absolute_offsets() -> anyhow::Result<()> {
    let registry = FormatRegistry::new();
    registry.register(WORDS, Category::User)?;
    let viewport = ViewportConfig::default()
        .with_large_file_threshold(100)
        .with_context(10)
        .with_max_window(64);
    let scope = Bytescope::new(Arc::new(registry)).with_viewport(viewport);
    let data = counter(1000);

    let result = scope.parse_range(&data, 500, 520, Some("words"))?;
    assert_eq!((result.window_start, result.window_end), (490, 530));
    assert_eq!(result.nodes.len(), 1);

    let words = &result.nodes[0];
    assert_eq!(words.node_type, NodeType::Array);
    assert_eq!(words.children.len(), 10);
    for word in &words.children {
        assert!(word.offset < 520 && word.end() > 500, "{} escapes the range", word.name);
        assert_eq!(word.value, Value::Unsigned(word.offset as u64 / 2));
    }

    let again = scope.parse_range(&data, 500, 520, Some("words"))?;
    assert!(Arc::ptr_eq(&result, &again));
    Ok(())
}

#[test]
fn test_windowed_range_reads_only_the_window() -> anyhow::Result<()> {
    let registry = FormatRegistry::new();
    registry.register(WORDS, Category::User)?;
    let viewport = ViewportConfig::default()
        .with_large_file_threshold(100)
        .with_context(10)
        .with_max_window(64);
    let scope = Bytescope::new(Arc::new(registry)).with_viewport(viewport);
    let source = LoggedSource::new(counter(1000));

    let result = scope.parse_range(&source, 500, 520, Some("words"))?;
    assert_eq!(result.nodes[0].children.len(), 10);
    let again = scope.parse_range(&source, 500, 520, Some("words"))?;
    assert!(Arc::ptr_eq(&result, &again));
    assert_eq!(source.served(), vec![(490, 530), (490, 530)]);

    // a changed window misses the cache
    let mut edited = counter(1000);
    edited[505] ^= 0xFF;
    let edited = LoggedSource::new(edited);
    let changed = scope.parse_range(&edited, 500, 520, Some("words"))?;
    assert!(!Arc::ptr_eq(&result, &changed));
    Ok(())
}

#[test]
fn test_range_containment_over_many_requests() -> anyhow::Result<()> {
    let registry = FormatRegistry::new();
    registry.register(WORDS, Category::User)?;
    let viewport = ViewportConfig::default()
        .with_large_file_threshold(256)
        .with_context(32)
        .with_max_window(48);
    let scope = Bytescope::new(Arc::new(registry)).with_viewport(viewport);
    let data = counter(2048);

    for start in (0..2100).step_by(97) {
        let end = start + 61;
        let result = scope.parse_range(&data, start, end, Some("words"))?;
        for node in &result.nodes {
            assert!(node.offset < result.end && node.end() > result.start);
            for element in &node.children {
                assert!(element.offset < result.end && element.end() > result.start);
            }
        }
        assert!(result.end - result.start <= 48);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_timeout_cancels_the_parse() -> anyhow::Result<()> {
    let registry = FormatRegistry::new();
    registry.register(BYTES, Category::User)?;
    let scope = Bytescope::new(Arc::new(registry))
        .with_engine_options(EngineOptions::default().with_max_repeat(10_000_000));
    let config = WorkerConfig {
        max_concurrency: 1,
        timeout_ms: 1,
    };
    let (service, _responses) = ParseService::new(Arc::new(scope), &config);

    let result = service
        .call(ParseRequest::full(vec![7u8; 1024 * 1024], Some("bytes")))
        .await;
    assert!(matches!(result, Err(Error::Timeout { after_ms: 1, .. })));
    assert_eq!(service.pending(), 0);
    Ok(())
}
