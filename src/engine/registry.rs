//! KEEL - Store Registry
//! Owns every named store of a process. Built once by the host and passed
//! by reference to whatever needs to open or look up a store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::store::{index_path, Store};
use crate::config::StoreOptions;
use crate::error::{KeelError, Result};

/// Named stores opened with shared options.
pub struct StoreRegistry {
    options: StoreOptions,
    stores: RwLock<HashMap<PathBuf, Arc<Store>>>,
}

impl StoreRegistry {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Open `name`, or return the handle already open under that name.
    pub fn open(&self, name: impl AsRef<Path>) -> Result<Arc<Store>> {
        let name = name.as_ref();
        if let Some(store) = self.stores.read().get(name) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write();
        // Another caller may have opened it between the two locks.
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }
        let store = Arc::new(Store::open(name, &self.options)?);
        stores.insert(name.to_path_buf(), store.clone());
        Ok(store)
    }

    /// The open store registered under `name`.
    pub fn get(&self, name: impl AsRef<Path>) -> Option<Arc<Store>> {
        self.stores.read().get(name.as_ref()).cloned()
    }

    /// Names of all open stores.
    pub fn names(&self) -> Vec<PathBuf> {
        self.stores.read().keys().cloned().collect()
    }

    /// Close and unregister `name`.
    pub fn close(&self, name: impl AsRef<Path>) -> Result<()> {
        let store = self
            .stores
            .write()
            .remove(name.as_ref())
            .ok_or(KeelError::DatabaseClosed)?;
        store.close()
    }

    /// Close every store. All stores are attempted; the first error is returned.
    pub fn close_all(&self) -> Result<()> {
        let stores: Vec<_> = self.stores.write().drain().collect();
        let mut first_err = None;
        for (name, store) in stores {
            if let Err(e) = store.close() {
                log::error!("Failed to close store {:?}: {}", name, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close `name` if open and remove its value and index files.
    pub fn delete_files(&self, name: impl AsRef<Path>) -> Result<()> {
        let name = name.as_ref();
        if let Some(store) = self.stores.write().remove(name) {
            match store.close() {
                Ok(()) | Err(KeelError::DatabaseClosed) => {}
                Err(e) => return Err(e),
            }
        }
        for path in [name.to_path_buf(), index_path(name)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        log::info!("Store files removed for {:?}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_returns_shared_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(StoreOptions::default());
        let path = dir.path().join("users");

        let a = registry.open(&path).unwrap();
        let b = registry.open(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.set("k", "v").unwrap();
        assert_eq!(registry.get(&path).unwrap().get("k").unwrap(), b"v");
        assert_eq!(registry.names(), vec![path]);
    }

    #[test]
    fn test_close_unregisters() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(StoreOptions::default());
        let path = dir.path().join("users");

        let store = registry.open(&path).unwrap();
        registry.close(&path).unwrap();
        assert!(store.is_closed());
        assert!(registry.get(&path).is_none());
        assert!(matches!(registry.close(&path), Err(KeelError::DatabaseClosed)));
    }

    #[test]
    fn test_close_all() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(StoreOptions::default());
        let a = registry.open(dir.path().join("a")).unwrap();
        let b = registry.open(dir.path().join("b")).unwrap();
        registry.close_all().unwrap();
        assert!(a.is_closed() && b.is_closed());
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_delete_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(StoreOptions::default());
        let path = dir.path().join("scratch");

        registry.open(&path).unwrap().set("k", "v").unwrap();
        registry.delete_files(&path).unwrap();
        assert!(!path.exists());
        assert!(!index_path(&path).exists());

        let reopened = registry.open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 0);
    }

    #[test]
    fn test_nested_store_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new(StoreOptions::default());
        let path = dir.path().join("deep").join("er").join("store");
        registry.open(&path).unwrap().set("k", "v").unwrap();
        assert!(path.exists());
    }
}
