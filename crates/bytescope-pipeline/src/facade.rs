//! The caller-facing entry point: detect, parse, parse a range

use crate::cache::{self, CacheKey, CacheStats, ResultCache};
use crate::config::BytescopeConfig;
use crate::viewport::{RangeResult, ViewportConfig, select_range};
use crate::{Error, Result};
use bytescope_engine::{CancelToken, EngineOptions, Interpreter};
use bytescope_ir::{Document, FindingKind};
use bytescope_registry::{
    Category, Detection, DirectoryStore, FormatRegistry, RegistryStats,
};
use bytescope_schema::Schema;
use bytescope_stream::ByteSource;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum Cached {
    Document(Arc<Document>),
    Range(Arc<RangeResult>),
}

/// Detection, parsing and result caching over one format registry
#[derive(Debug)]
pub struct Bytescope {
    registry: Arc<FormatRegistry>,
    cache: ResultCache<Cached>,
    engine: EngineOptions,
    viewport: ViewportConfig,
    active_format: Mutex<Option<String>>,
}

impl Bytescope {
    /// Wrap an existing registry with default limits and a 50-entry cache
    pub fn new(registry: Arc<FormatRegistry>) -> Self {
        let defaults = BytescopeConfig::default();
        Self {
            registry,
            cache: ResultCache::new(defaults.cache.capacity),
            engine: defaults.engine_options(),
            viewport: defaults.viewport,
            active_format: Mutex::new(None),
        }
    }

    /// Build the registry from built-in formats and the configured schema
    /// directories
    pub fn from_config(config: &BytescopeConfig) -> Result<Self> {
        let registry = FormatRegistry::with_options(config.registry_options());
        registry.register_builtins();
        for dir in &config.schema_dirs {
            let store = DirectoryStore::open(dir)?;
            let loaded = registry.load_from(&store, Category::User)?;
            info!("Registered {} formats from {}", loaded, dir.display());
        }

        Ok(Self::new(Arc::new(registry))
            .with_cache_capacity(config.cache.capacity)
            .with_engine_options(config.engine_options())
            .with_viewport(config.viewport))
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = ResultCache::new(capacity);
        self
    }

    #[must_use]
    pub fn with_engine_options(mut self, options: EngineOptions) -> Self {
        self.engine = options;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, viewport: ViewportConfig) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    pub fn viewport(&self) -> &ViewportConfig {
        &self.viewport
    }

    /// Identify the format of `data`
    pub fn detect_format(&self, data: &[u8], file_name: Option<&str>) -> Option<Detection> {
        self.registry.detect(data, file_name)
    }

    /// Parse a whole buffer
    ///
    /// Always returns a tree. When no schema can be used the tree is a single
    /// error leaf carrying a `SchemaUnavailable` finding.
    pub fn parse(&self, data: &[u8], format: Option<&str>) -> Arc<Document> {
        self.parse_with(data, format, None)
    }

    /// [`Bytescope::parse`] that stops early once `cancel` fires
    ///
    /// Cancelled results are returned but never cached.
    pub fn parse_cancellable(
        &self,
        data: &[u8],
        format: Option<&str>,
        cancel: &CancelToken,
    ) -> Arc<Document> {
        self.parse_with(data, format, Some(cancel))
    }

    /// Nodes overlapping `[start, end)`, with absolute offsets
    ///
    /// Above the large-file threshold only the planned window is sliced out
    /// of `source`, so a paged source never has to load the whole file.
    pub fn parse_range(
        &self,
        source: &dyn ByteSource,
        start: usize,
        end: usize,
        format: Option<&str>,
    ) -> Result<Arc<RangeResult>> {
        self.parse_range_with(source, start, end, format, None)
    }

    pub fn parse_range_cancellable(
        &self,
        source: &dyn ByteSource,
        start: usize,
        end: usize,
        format: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Arc<RangeResult>> {
        self.parse_range_with(source, start, end, format, Some(cancel))
    }

    /// Make `format_id` the default for calls without a format
    ///
    /// Returns `true` and clears the cache when the active format changed.
    pub fn switch_format(&self, format_id: &str) -> Result<bool> {
        if !self.registry.contains(format_id) {
            return Err(bytescope_registry::Error::unknown_format(format_id).into());
        }
        let mut active = self
            .active_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if active.as_deref() == Some(format_id) {
            return Ok(false);
        }
        info!("Switching active format to '{}'", format_id);
        *active = Some(format_id.to_string());
        self.cache.clear();
        Ok(true)
    }

    pub fn active_format(&self) -> Option<String> {
        self.active_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_cache(&self) {
        debug!("Clearing result cache");
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Format id to use: explicit, then active, then detected
    fn resolve(
        &self,
        format: Option<&str>,
        detect: impl FnOnce() -> Result<Option<Detection>>,
    ) -> Result<(String, Arc<Schema>)> {
        let id = match format {
            Some(id) => id.to_string(),
            None => match self.active_format() {
                Some(id) => id,
                None => {
                    let detection = detect()?.ok_or(Error::NoFormat)?;
                    debug!(
                        "Detected '{}' by {}",
                        detection.format_id, detection.method
                    );
                    detection.format_id
                }
            },
        };
        let schema = self.registry.get(&id)?;
        Ok((id, schema))
    }

    fn fingerprint(&self, format_id: &str, data: &[u8]) -> u64 {
        let source = self.registry.source(format_id).unwrap_or_default();
        cache::fingerprint(data, &source)
    }

    fn window_fingerprint(&self, format_id: &str, len: usize, start: usize, window: &[u8]) -> u64 {
        let source = self.registry.source(format_id).unwrap_or_default();
        cache::window_fingerprint(len, start, window, &source)
    }

    fn interpreter<'s>(&self, schema: &'s Schema, cancel: Option<&CancelToken>) -> Interpreter<'s> {
        let interpreter = Interpreter::new(schema).with_options(self.engine.clone());
        match cancel {
            Some(cancel) => interpreter.with_cancel(cancel.clone()),
            None => interpreter,
        }
    }

    fn parse_with(
        &self,
        data: &[u8],
        format: Option<&str>,
        cancel: Option<&CancelToken>,
    ) -> Arc<Document> {
        let (format_id, schema) = match self.resolve(format, || Ok(self.detect_format(data, None))) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("No usable schema: {}", e);
                let mut document = Document::error(FindingKind::SchemaUnavailable, e.to_string());
                document.metadata.source_len = data.len();
                document.metadata.parsed_at = Some(Utc::now());
                if let Some(id) = format {
                    document.metadata.format_id = Some(id.to_string());
                }
                return Arc::new(document);
            }
        };

        let key = CacheKey::new(&format_id, None, self.fingerprint(&format_id, data));
        if let Some(Cached::Document(document)) = self.cache.get(&key) {
            debug!("Serving '{}' parse from cache", format_id);
            return document;
        }

        let mut document = self.interpreter(&schema, cancel).parse(data);
        document.metadata.parsed_at = Some(Utc::now());
        let document = Arc::new(document);

        if cancel.is_some_and(CancelToken::is_cancelled) {
            debug!("Not caching cancelled parse of '{}'", format_id);
        } else {
            self.cache.insert(key, Cached::Document(Arc::clone(&document)));
        }
        document
    }

    fn parse_range_with(
        &self,
        source: &dyn ByteSource,
        start: usize,
        end: usize,
        format: Option<&str>,
        cancel: Option<&CancelToken>,
    ) -> Result<Arc<RangeResult>> {
        if start > end {
            return Err(Error::InvalidRange { start, end });
        }
        let len = source.len();
        let (format_id, schema) = self.resolve(format, || {
            let head = source.slice(0, len.min(self.registry.options().detection_prefix))?;
            Ok(self.detect_format(&head, None))
        })?;
        let Some(plan) = self.viewport.plan(len, start, end) else {
            return Ok(Arc::new(RangeResult::empty(format_id, start)));
        };

        let window = source.slice(plan.window_start, plan.window_end)?;
        let key = CacheKey::new(
            &format_id,
            Some((plan.start, plan.end)),
            self.window_fingerprint(&format_id, len, plan.window_start, &window),
        );
        if let Some(Cached::Range(result)) = self.cache.get(&key) {
            debug!(
                "Serving '{}' range {}..{} from cache",
                format_id, plan.start, plan.end
            );
            return Ok(result);
        }

        let nodes = if plan.covers(len) {
            let document = self.parse_with(&window, Some(&format_id), cancel);
            select_range(&document.root, plan.start, plan.end)
        } else {
            debug!(
                "Parsing '{}' window {}..{} for range {}..{}",
                format_id, plan.window_start, plan.window_end, plan.start, plan.end
            );
            let mut document = self.interpreter(&schema, cancel).parse(&window);
            document.root.shift_offsets(plan.window_start);
            select_range(&document.root, plan.start, plan.end)
        };

        let result = Arc::new(RangeResult::from_plan(format_id, plan, nodes));
        if !cancel.is_some_and(CancelToken::is_cancelled) {
            self.cache.insert(key, Cached::Range(Arc::clone(&result)));
        }
        Ok(result)
    }
}
