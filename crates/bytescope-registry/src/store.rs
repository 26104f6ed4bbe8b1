//! Persistence for raw schema documents

use crate::{Error, Result};
use bytescope_schema::compiler::is_identifier;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Key-value storage of schema source text by format id
pub trait SchemaStore: Send + Sync {
    /// Source text stored under `id`
    fn get(&self, id: &str) -> Result<Option<String>>;
    /// Store or replace the source text for `id`
    fn put(&self, id: &str, source: &str) -> Result<()>;
    /// Remove `id`; `false` when it was not stored
    fn delete(&self, id: &str) -> Result<bool>;
    /// Every stored id, sorted
    fn list(&self) -> Result<Vec<String>>;
}

/// Memory-based store for testing and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<String>> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(id).cloned())
    }

    fn put(&self, id: &str, source: &str) -> Result<()> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents.insert(id.to_string(), source.to_string());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<String>> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.keys().cloned().collect())
    }
}

/// A directory of `<id>.ksy` files
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Use `root`, creating it if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!("Schema directory store at {:?}", root);
        Ok(Self { root })
    }

    /// Use an existing directory without creating it
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::store(format!(
                "schema directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !is_identifier(id) {
            return Err(Error::InvalidId(id.to_string()));
        }
        Ok(self.root.join(format!("{id}.ksy")))
    }
}

impl SchemaStore for DirectoryStore {
    fn get(&self, id: &str) -> Result<Option<String>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        trace!("Reading schema from {:?}", path);
        Ok(Some(fs::read_to_string(path)?))
    }

    fn put(&self, id: &str, source: &str) -> Result<()> {
        let path = self.path_for(id)?;
        trace!("Writing schema to {:?}", path);
        fs::write(path, source)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "ksy") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if is_identifier(stem) {
                        ids.push(stem.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn SchemaStore) {
        assert_eq!(store.get("png").unwrap(), None);
        store.put("png", "meta: {id: png}").unwrap();
        store.put("gif", "meta: {id: gif}").unwrap();
        assert_eq!(store.get("png").unwrap().as_deref(), Some("meta: {id: png}"));
        assert_eq!(store.list().unwrap(), vec!["gif", "png"]);
        assert!(store.delete("png").unwrap());
        assert!(!store.delete("png").unwrap());
        assert_eq!(store.list().unwrap(), vec!["gif"]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_directory_store() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path().join("schemas")).unwrap();
        exercise(&store);
        assert!(dir.path().join("schemas/gif.ksy").exists());
    }

    #[test]
    fn test_directory_store_rejects_path_ids() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path()).unwrap();
        assert!(matches!(store.put("../evil", ""), Err(Error::InvalidId(_))));
    }

    #[test]
    fn test_directory_store_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("Bad Name.ksy"), "x").unwrap();
        fs::write(dir.path().join("elf.ksy"), "meta: {id: elf}").unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        assert_eq!(store.list().unwrap(), vec!["elf"]);
        assert!(DirectoryStore::open(dir.path().join("missing")).is_err());
    }
}
