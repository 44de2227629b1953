//! Two-tier LRU caching plus `.lock`-file-coordinated, build-once cache-dir
//! construction.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use fs2::FileExt;
use lru::LruCache;
use tracing::{debug, info};

use crate::config::Config;
use crate::entry::RefFile;
use crate::error::Result;
use crate::parquet_reader::ParquetRefReader;

const DEFAULT_REF_FILE_CACHE_SIZE: usize = 64;
const DEFAULT_PARQUET_STORE_CACHE_SIZE: usize = 64;
const DEFAULT_SHARD_CACHE_SIZE: usize = 32;

/// Process-wide cache of parsed `RefFile`s / Parquet store metadata, plus a
/// second tier of opened Parquet shard byte buffers.
pub struct CacheManager {
    config: Config,
    ref_files: Mutex<LruCache<String, Arc<RefFile>>>,
    parquet_stores: Mutex<LruCache<String, Arc<ParquetRefReader>>>,
    shard_bytes: Mutex<LruCache<String, Arc<Bytes>>>,
}

impl CacheManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ref_files: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_REF_FILE_CACHE_SIZE).unwrap(),
            )),
            parquet_stores: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_PARQUET_STORE_CACHE_SIZE).unwrap(),
            )),
            shard_bytes: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_SHARD_CACHE_SIZE).unwrap(),
            )),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the cached `RefFile` for `locator`, or runs `loader` and
    /// caches the result. A failed load is never cached.
    pub fn get_or_load_ref_file<F>(&self, locator: &str, loader: F) -> Result<Arc<RefFile>>
    where
        F: FnOnce() -> Result<RefFile>,
    {
        if let Some(hit) = self.ref_files.lock().unwrap().get(locator) {
            debug!(locator, "ref file cache hit");
            return Ok(Arc::clone(hit));
        }
        debug!(locator, "ref file cache miss, loading");
        let rf = Arc::new(loader()?);
        self.ref_files
            .lock()
            .unwrap()
            .put(locator.to_string(), Arc::clone(&rf));
        Ok(rf)
    }

    /// Returns the cached Parquet store metadata for `locator`, or runs
    /// `loader` and caches the result. A failed load is never cached.
    pub fn get_or_load_parquet_store<F>(
        &self,
        locator: &str,
        loader: F,
    ) -> Result<Arc<ParquetRefReader>>
    where
        F: FnOnce() -> Result<ParquetRefReader>,
    {
        if let Some(hit) = self.parquet_stores.lock().unwrap().get(locator) {
            debug!(locator, "parquet store cache hit");
            return Ok(Arc::clone(hit));
        }
        debug!(locator, "parquet store cache miss, loading");
        let store = Arc::new(loader()?);
        self.parquet_stores
            .lock()
            .unwrap()
            .put(locator.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Returns the cached bytes of a Parquet shard file, or reads it via
    /// `loader` and caches the result. A failed load is never cached.
    pub fn get_or_load_shard<F>(&self, shard_path: &str, loader: F) -> Result<Arc<Bytes>>
    where
        F: FnOnce() -> Result<Bytes>,
    {
        if let Some(hit) = self.shard_bytes.lock().unwrap().get(shard_path) {
            debug!(shard_path, "shard cache hit");
            return Ok(Arc::clone(hit));
        }
        debug!(shard_path, "shard cache miss, reading");
        let bytes = Arc::new(loader()?);
        self.shard_bytes
            .lock()
            .unwrap()
            .put(shard_path.to_string(), Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Ensures a Parquet cache directory exists for a JSON manifest,
    /// building it at most once across cooperating processes via an
    /// advisory exclusive `.lock` file, with a double-checked presence
    /// check before and after acquiring the lock.
    pub fn build_parquet_cache_once<F>(
        &self,
        cache_dir: &Path,
        build: F,
    ) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let zmetadata = cache_dir.join(".zmetadata");
        if zmetadata.exists() {
            debug!(?cache_dir, "parquet cache already present");
            return Ok(());
        }

        std::fs::create_dir_all(cache_dir)?;
        let lock_path = cache_dir.join(".lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if self.config.has_test_hook("SHORT_DELAY_STALLED_LOCK") {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        info!(?lock_path, "waiting for exclusive lock to build parquet cache");
        let _guard = LockGuard::acquire(lock_file)?;

        // Double-checked: another process may have finished the build
        // while we were waiting for the lock.
        if zmetadata.exists() {
            debug!(?cache_dir, "parquet cache built by another process");
            return Ok(());
        }

        if self.config.has_test_hook("WAIT_BEFORE_CONVERT_TO_PARQUET_REF") {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        build(cache_dir)
    }
}

/// RAII advisory file lock: released on drop. The Rust analogue of
/// `LockFileHolder`.
struct LockGuard {
    file: File,
}

impl LockGuard {
    fn acquire(file: File) -> Result<Self> {
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ref_file_cache_hits_on_second_call() {
        let mgr = CacheManager::new(Config::default());
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            mgr.get_or_load_ref_file("store-a", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(RefFile::new())
            })
            .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_is_never_cached() {
        let mgr = CacheManager::new(Config::default());
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let _ = mgr.get_or_load_ref_file("store-b", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(crate::error::KerchunkError::BadManifest("boom".into()))
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn build_parquet_cache_once_skips_build_when_already_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".zmetadata"), b"{}").unwrap();
        let mgr = CacheManager::new(Config::default());
        let built = std::sync::atomic::AtomicBool::new(false);
        mgr.build_parquet_cache_once(dir.path(), |_| {
            built.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(!built.load(Ordering::SeqCst));
    }

    #[test]
    fn build_parquet_cache_once_runs_build_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let mgr = CacheManager::new(Config::default());
        let built = std::sync::atomic::AtomicBool::new(false);
        mgr.build_parquet_cache_once(&cache_dir, |_| {
            built.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(built.load(Ordering::SeqCst));
    }
}
