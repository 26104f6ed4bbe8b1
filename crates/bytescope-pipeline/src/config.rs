//! Configuration loaded from YAML or JSON
//!
//! Every field has a default, so a partial file (or none at all) is valid:
//!
//! ```yaml
//! cache:
//!   capacity: 100
//! viewport:
//!   context: 524288
//! worker:
//!   timeout_ms: 5000
//! schema_dirs:
//!   - ./schemas
//! ```

use crate::viewport::ViewportConfig;
use crate::{Error, Result};
use bytescope_engine::EngineOptions;
use bytescope_registry::RegistryOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BytescopeConfig {
    pub cache: CacheConfig,
    pub viewport: ViewportConfig,
    pub limits: LimitsConfig,
    pub worker: WorkerConfig,
    /// Directories of `.ksy` files registered at startup
    pub schema_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached results
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_repeat: usize,
    pub max_depth: usize,
    pub detection_prefix: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_repeat: 100_000,
            max_depth: 256,
            detection_prefix: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Parses allowed to run at once
    pub max_concurrency: usize,
    pub timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl BytescopeConfig {
    /// Load from a file, as JSON when it ends in `.json` and YAML otherwise
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {:?}", path);
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(path.display().to_string(), e.to_string()))?;
        let is_json = path.extension().is_some_and(|e| e == "json");
        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        };
        parsed.map_err(|e| match e {
            Error::Config { message, .. } => Error::config(path.display().to_string(), message),
            other => other,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| Error::config("<yaml>", e.to_string()))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config("<json>", e.to_string()))
    }

    /// Engine limits derived from `limits`
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::default()
            .with_max_repeat(self.limits.max_repeat)
            .with_max_depth(self.limits.max_depth)
    }

    /// Registry options derived from `limits`
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions::default().with_detection_prefix(self.limits.detection_prefix)
    }
}
