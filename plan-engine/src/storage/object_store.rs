// Object Stores
// Byte-level key/value stores that back the durable intermediates layer

use crate::error::{EngineError, EngineResult};

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Flat key/value store of byte objects; keys are '/'-separated paths
pub trait ObjectStore: Send + Sync + fmt::Debug {
    fn set_object(&self, key: &str, bytes: &[u8]) -> EngineResult<()>;

    fn get_object(&self, key: &str) -> EngineResult<Vec<u8>>;

    fn has_object(&self, key: &str) -> bool;

    fn rm_object(&self, key: &str) -> EngineResult<()>;

    fn cp_object(&self, src: &str, dst: &str) -> EngineResult<()>;

    fn uri_for_key(&self, key: &str) -> String;
}

fn not_found(key: &str) -> EngineError {
    EngineError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no object stored under '{}'", key),
    ))
}

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> EngineResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(EngineError::config(format!("invalid object key '{}'", key)));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn set_object(&self, key: &str, bytes: &[u8]) -> EngineResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write beside the target, then rename so readers never see a partial object
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes)?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn get_object(&self, key: &str) -> EngineResult<Vec<u8>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found(key)),
            Err(err) => Err(err.into()),
        }
    }

    fn has_object(&self, key: &str) -> bool {
        self.key_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn rm_object(&self, key: &str) -> EngineResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn cp_object(&self, src: &str, dst: &str) -> EngineResult<()> {
        let bytes = self.get_object(src)?;
        self.set_object(dst, &bytes)
    }

    fn uri_for_key(&self, key: &str) -> String {
        match self.key_path(key) {
            Ok(path) => format!("file://{}", path.display()),
            Err(_) => format!("file://{}/{}", self.root.display(), key),
        }
    }
}

/// Object store held in process memory
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn set_object(&self, key: &str, bytes: &[u8]) -> EngineResult<()> {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get_object(&self, key: &str) -> EngineResult<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    fn has_object(&self, key: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(key)
    }

    fn rm_object(&self, key: &str) -> EngineResult<()> {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        Ok(())
    }

    fn cp_object(&self, src: &str, dst: &str) -> EngineResult<()> {
        let bytes = self.get_object(src)?;
        self.set_object(dst, &bytes)
    }

    fn uri_for_key(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

/// Object stores selectable by name from storage configuration
#[derive(Debug, Clone, Default)]
pub struct ObjectStoreRegistry {
    stores: BTreeMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn ObjectStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ObjectStore>> {
        self.stores.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }
}
