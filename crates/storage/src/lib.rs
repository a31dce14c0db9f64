//! Concrete [`BlockStore`] backends and the named pool targets resolve
//! backing devices from.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use common::BlockStore;
use tracing::debug;

/// In-memory block store used for testing and scaffolding.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<RwLock<Vec<u8>>>,
}

impl MemStore {
    pub fn new(len: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(vec![0u8; len])),
        }
    }

    /// Snapshot of the raw contents, mainly for assertions.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.read().expect("mem store lock poisoned").clone()
    }
}

impl BlockStore for MemStore {
    fn len(&self) -> u64 {
        self.inner.read().expect("mem store lock poisoned").len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.inner.read().expect("mem store lock poisoned");
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| anyhow!("offset overflow"))?;
        if end > data.len() {
            bail!("read past end of store: {}..{} > {}", start, end, data.len());
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().expect("mem store lock poisoned");
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| anyhow!("offset overflow"))?;
        if end > inner.len() {
            bail!(
                "write past end of store: {}..{} > {}",
                start,
                end,
                inner.len()
            );
        }
        inner[start..end].copy_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// File-backed block store. The file's current length is the capacity.
pub struct FileStore {
    file: Mutex<File>,
    len: u64,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }

    /// Create (or truncate) a file of `len` zero bytes and open it.
    pub fn create<P: AsRef<Path>>(path: P, len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(len)?;
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl BlockStore for FileStore {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.len {
            bail!("read past end of store");
        }
        let mut file = self.file.lock().expect("file store lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.len {
            bail!("write past end of store");
        }
        let mut file = self.file.lock().expect("file store lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file
            .lock()
            .expect("file store lock poisoned")
            .sync_data()?;
        Ok(())
    }
}

/// Named registry of backing stores.
///
/// Table parameters reference backing devices by name; resolution first
/// checks explicit registrations, then falls back to opening the name as a
/// file path and caching the result, so a table can name an image file
/// directly.
#[derive(Clone, Default)]
pub struct StorePool {
    stores: Arc<RwLock<HashMap<String, Arc<dyn BlockStore>>>>,
}

impl StorePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under a name. Re-registering a name replaces the
    /// old store for future resolutions only.
    pub fn register(&self, name: impl Into<String>, store: Arc<dyn BlockStore>) {
        let name = name.into();
        debug!(store = %name, "registering backing store");
        self.stores
            .write()
            .expect("store pool lock poisoned")
            .insert(name, store);
    }

    /// Resolve a backing store by name, opening a file store on demand.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BlockStore>> {
        if let Some(store) = self
            .stores
            .read()
            .expect("store pool lock poisoned")
            .get(name)
        {
            return Ok(Arc::clone(store));
        }

        if Path::new(name).is_file() {
            let store: Arc<dyn BlockStore> = Arc::new(FileStore::open(name)?);
            self.register(name, Arc::clone(&store));
            return Ok(store);
        }

        Err(anyhow!("no backing store named {:?}", name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .expect("store pool lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_read_write() {
        let store = MemStore::new(4096);
        store.write_at(512, &[0xAB; 512]).unwrap();
        let mut buf = [0u8; 512];
        store.read_at(512, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; 512]);

        assert!(store.write_at(4095, &[0, 0]).is_err());
        assert!(store.read_at(4096, &mut buf).is_err());
    }

    #[test]
    fn pool_resolution() {
        let pool = StorePool::new();
        assert!(pool.resolve("missing").is_err());

        pool.register("disk0", Arc::new(MemStore::new(1024)));
        let store = pool.resolve("disk0").unwrap();
        assert_eq!(store.len(), 1024);
        assert_eq!(pool.names(), vec!["disk0".to_string()]);
    }

    #[test]
    fn file_store_roundtrip() {
        let path = std::env::temp_dir().join("vmap_file_store_test.img");
        let _ = std::fs::remove_file(&path);
        {
            let store = FileStore::create(&path, 8192).unwrap();
            store.write_at(1024, b"hello").unwrap();
            store.flush().unwrap();
        }
        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.len(), 8192);
            let mut buf = [0u8; 5];
            store.read_at(1024, &mut buf).unwrap();
            assert_eq!(&buf, b"hello");
        }
        let _ = std::fs::remove_file(&path);
    }
}
