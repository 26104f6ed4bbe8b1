//! Format registry with lazy compilation and detection

use crate::detect::{Detection, DetectionMethod, ExtensionIndex, HEURISTICS, SignatureIndex};
use crate::format::{Category, FormatFilter, FormatInfo};
use crate::presets::PRESETS;
use crate::store::SchemaStore;
use crate::{Error, Result};
use bytescope_schema::{Compiler, CompilerOptions, ImportResolver, Schema};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

/// Registry behavior
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Bytes of the input considered for signature detection
    pub detection_prefix: usize,
    pub compiler: CompilerOptions,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            detection_prefix: 64 * 1024,
            compiler: CompilerOptions::default(),
        }
    }
}

impl RegistryOptions {
    #[must_use]
    pub fn with_detection_prefix(mut self, bytes: usize) -> Self {
        self.detection_prefix = bytes;
        self
    }
}

/// Counts reported by [`FormatRegistry::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub format_count: usize,
    pub signature_count: usize,
    pub extension_count: usize,
    pub compiled_count: usize,
    pub categories: BTreeMap<Category, usize>,
}

struct Entry {
    info: FormatInfo,
    source: String,
    order: u64,
}

/// Indexes that change together under one lock
#[derive(Default)]
struct Indexes {
    formats: HashMap<String, Entry>,
    signatures: SignatureIndex,
    extensions: ExtensionIndex,
    next_order: u64,
}

impl Indexes {
    fn insert(&mut self, info: FormatInfo, source: String) {
        self.remove(&info.id);
        let order = self.next_order;
        self.next_order += 1;
        if let Some(signature) = &info.signature {
            self.signatures.insert(&info.id, signature, order);
        }
        self.extensions.insert(&info.id, &info.extensions);
        self.formats.insert(
            info.id.clone(),
            Entry {
                info,
                source,
                order,
            },
        );
    }

    fn remove(&mut self, id: &str) -> bool {
        let existed = self.formats.remove(id).is_some();
        if existed {
            self.signatures.remove(id);
            self.extensions.remove(id);
        }
        existed
    }
}

/// Compiled schemas keyed by id, with signature and extension indexes
///
/// ```ignore
/// let registry = FormatRegistry::with_builtins();
/// if let Some(found) = registry.detect(&bytes, Some("photo.png")) {
///     let schema = registry.get(&found.format_id)?;
/// }
/// ```
pub struct FormatRegistry {
    indexes: RwLock<Indexes>,
    compiled: DashMap<String, Arc<Schema>>,
    store: Option<Arc<dyn SchemaStore>>,
    options: RegistryOptions,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.read().formats.len())
            .field("compiled", &self.compiled.len())
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl FormatRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            compiled: DashMap::new(),
            store: None,
            options,
        }
    }

    /// A registry holding the built-in presets, compiled on first use
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Persist registrations and removals to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SchemaStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Register the built-in presets lazily
    pub fn register_builtins(&self) -> usize {
        let mut count = 0;
        for preset in PRESETS {
            match self.index_lazily(preset.source, Category::System) {
                Ok(_) => count += 1,
                Err(e) => warn!("Built-in schema '{}' skipped: {}", preset.id, e),
            }
        }
        debug!("Registered {} built-in formats", count);
        count
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.indexes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::with_resolver(self).options(self.options.compiler.clone())
    }

    /// Compile and index a schema document
    ///
    /// Imports resolve against formats already registered. A compile error
    /// leaves the registry unchanged.
    pub fn register(&self, source: &str, category: Category) -> Result<FormatInfo> {
        let compiled = self.compiler().compile(source)?;
        for warning in &compiled.warnings {
            debug!("Schema '{}': {}", compiled.schema.id(), warning);
        }
        let info = FormatInfo::from_meta(&compiled.schema.meta, category);
        info!("Registered format '{}' ({})", info.id, category);

        self.persist(&info.id, source)?;
        let mut indexes = self.write();
        indexes.insert(info.clone(), source.to_string());
        self.compiled
            .insert(info.id.clone(), Arc::new(compiled.schema));
        Ok(info)
    }

    /// Index a document by its header; compile on first [`get`](Self::get)
    pub fn register_lazy(&self, source: &str, category: Category) -> Result<FormatInfo> {
        let info = self.index_lazily(source, category)?;
        self.persist(&info.id, source)?;
        Ok(info)
    }

    fn index_lazily(&self, source: &str, category: Category) -> Result<FormatInfo> {
        let meta = self.compiler().scan(source)?;
        let info = FormatInfo::from_meta(&meta, category);
        trace!("Indexed format '{}' for lazy compilation", info.id);
        let mut indexes = self.write();
        indexes.insert(info.clone(), source.to_string());
        self.compiled.remove(&info.id);
        Ok(info)
    }

    fn persist(&self, id: &str, source: &str) -> Result<()> {
        match &self.store {
            Some(store) => store.put(id, source),
            None => Ok(()),
        }
    }

    /// Register every document in `store` lazily; returns how many succeeded
    pub fn load_from(&self, store: &dyn SchemaStore, category: Category) -> Result<usize> {
        let mut loaded = 0;
        for id in store.list()? {
            let Some(source) = store.get(&id)? else {
                continue;
            };
            match self.index_lazily(&source, category) {
                Ok(info) if info.id != id => {
                    warn!("Stored schema '{}' declares id '{}'", id, info.id);
                    loaded += 1;
                }
                Ok(_) => loaded += 1,
                Err(e) => warn!("Stored schema '{}' skipped: {}", id, e),
            }
        }
        debug!("Loaded {} formats from store", loaded);
        Ok(loaded)
    }

    /// Register everything in the attached store as user formats
    pub fn load_from_store(&self) -> Result<usize> {
        match &self.store {
            Some(store) => self.load_from(store.as_ref(), Category::User),
            None => Ok(0),
        }
    }

    /// Compiled schema for `id`, compiling it now if needed
    ///
    /// Compilation runs without the index lock. If the format is removed or
    /// replaced meanwhile, the result is discarded: a removed format is
    /// reported unknown and a replaced one is compiled again.
    pub fn get(&self, id: &str) -> Result<Arc<Schema>> {
        loop {
            if let Some(schema) = self.compiled.get(id) {
                return Ok(Arc::clone(schema.value()));
            }

            let (source, order) = self
                .revision(id)
                .ok_or_else(|| Error::unknown_format(id))?;
            debug!("Compiling format '{}' on first use", id);
            let compiled = self.compiler().compile(&source)?;
            if let Some(schema) = self.keep_compiled(id, order, Arc::new(compiled.schema)) {
                return Ok(schema);
            }
            debug!("Format '{}' changed while compiling", id);
        }
    }

    /// Source and registration order of `id`
    fn revision(&self, id: &str) -> Option<(String, u64)> {
        self.read()
            .formats
            .get(id)
            .map(|e| (e.source.clone(), e.order))
    }

    /// Cache `schema` if `id` is still registered as revision `order`
    fn keep_compiled(&self, id: &str, order: u64, schema: Arc<Schema>) -> Option<Arc<Schema>> {
        let indexes = self.read();
        if indexes.formats.get(id).map(|e| e.order) != Some(order) {
            return None;
        }
        // A concurrent caller may have finished first; keep whichever landed
        let entry = self.compiled.entry(id.to_string()).or_insert(schema);
        Some(Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().formats.contains_key(id)
    }

    pub fn info(&self, id: &str) -> Option<FormatInfo> {
        self.read().formats.get(id).map(|e| e.info.clone())
    }

    /// Raw source text of a registered document
    pub fn source(&self, id: &str) -> Option<String> {
        self.read().formats.get(id).map(|e| e.source.clone())
    }

    pub fn is_compiled(&self, id: &str) -> bool {
        self.compiled.contains_key(id)
    }

    /// Remove a format from every index and from the attached store
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut indexes = self.write();
            self.compiled.remove(id);
            indexes.remove(id)
        };
        if let Some(store) = &self.store {
            store.delete(id)?;
        }
        if removed {
            info!("Removed format '{}'", id);
        }
        Ok(removed)
    }

    /// Drop every format
    pub fn clear(&self) {
        let mut indexes = self.write();
        *indexes = Indexes {
            next_order: indexes.next_order,
            ..Indexes::default()
        };
        self.compiled.clear();
    }

    /// Registered formats in registration order
    pub fn list(&self, filter: &FormatFilter) -> Vec<FormatInfo> {
        let indexes = self.read();
        let mut entries: Vec<&Entry> = indexes
            .formats
            .values()
            .filter(|e| filter.matches(&e.info))
            .collect();
        entries.sort_by_key(|e| e.order);
        entries.into_iter().map(|e| e.info.clone()).collect()
    }

    /// Identify the format of `data`
    ///
    /// Signatures are checked within the detection prefix, then the file
    /// name's extension, then the built-in heuristics.
    pub fn detect(&self, data: &[u8], file_name: Option<&str>) -> Option<Detection> {
        let prefix = &data[..data.len().min(self.options.detection_prefix)];
        let indexes = self.read();

        if let Some(id) = indexes.signatures.lookup(prefix) {
            debug!("Detected '{}' by signature", id);
            return Some(Detection::new(id, DetectionMethod::Signature));
        }

        if let Some(id) = file_name.and_then(|name| indexes.extensions.lookup(name)) {
            debug!("Detected '{}' by extension", id);
            return Some(Detection::new(id, DetectionMethod::Extension));
        }

        for heuristic in HEURISTICS {
            if !(heuristic.check)(prefix) {
                continue;
            }
            let mut candidates: Vec<&Entry> = indexes
                .formats
                .values()
                .filter(|e| {
                    heuristic.names(&e.info.id)
                        || e.info.title.as_deref().is_some_and(|t| heuristic.names(t))
                })
                .collect();
            candidates.sort_by_key(|e| e.order);
            if let Some(entry) = candidates.first() {
                debug!("Detected '{}' by heuristic ({})", entry.info.id, heuristic.name);
                return Some(Detection::new(
                    entry.info.id.clone(),
                    DetectionMethod::Heuristic,
                ));
            }
        }

        trace!("No format detected for {} bytes", data.len());
        None
    }

    pub fn stats(&self) -> RegistryStats {
        let indexes = self.read();
        let mut categories: BTreeMap<Category, usize> =
            Category::ALL.iter().map(|c| (*c, 0)).collect();
        for entry in indexes.formats.values() {
            *categories.entry(entry.info.category).or_default() += 1;
        }
        RegistryStats {
            format_count: indexes.formats.len(),
            signature_count: indexes.signatures.len(),
            extension_count: indexes.extensions.len(),
            compiled_count: self.compiled.len(),
            categories,
        }
    }
}

impl ImportResolver for FormatRegistry {
    fn resolve(&self, id: &str) -> Option<String> {
        self.source(id)
    }
}
