//! The `open`/`stat`/`readdir` virtual-filesystem surface over a JSON or
//! Parquet reference store, plus the path grammar for both.

use bytes::Bytes;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::entry::{direct_children_of, Entry};
use crate::error::{KerchunkError, Result};
use crate::loader::JsonLoader;
use crate::parquet_reader::{ParquetRefReader, ResolvedChunk};
use crate::rangereader::RangeReader;
use crate::zarr::ZarrArrayInfo;

#[derive(Debug, Clone, PartialEq)]
pub struct StatInfo {
    pub size: u64,
    pub is_dir: bool,
}

/// Splits a `/vsikerchunk_json_ref/...` (or `_cached`) tail into
/// `(store_locator, key)`. The store locator is whichever path component
/// is the unique one ending in `.json`; everything after it, joined by
/// `/`, is the in-store key (empty for the store root).
pub fn split_json_path(path: &str) -> Result<(String, String)> {
    let path = path.trim_start_matches('/');
    let occurrences: Vec<usize> = path.match_indices(".json").map(|(i, _)| i).collect();
    if occurrences.len() != 1 {
        return Err(KerchunkError::BadPath(format!(
            "path must contain exactly one `.json` component to locate the manifest, found {}",
            occurrences.len()
        )));
    }
    let idx = occurrences[0];
    let end = path[idx..]
        .find('/')
        .map(|o| idx + o)
        .unwrap_or(path.len());
    let store = path[..end].to_string();
    let rest = path[end..].trim_start_matches('/').to_string();
    Ok((store, rest))
}

/// Splits a `/vsikerchunk_parquet_ref/{store}/key` tail into
/// `(store_locator, key)`. The store locator must be brace-delimited since
/// there is no `.json` marker to anchor on.
pub fn split_parquet_path(path: &str) -> Result<(String, String)> {
    let path = path.trim_start_matches('/');
    if !path.starts_with('{') {
        return Err(KerchunkError::BadPath(
            "parquet ref path must start with `{store-uri}`".to_string(),
        ));
    }
    let close = path.find('}').ok_or_else(|| {
        KerchunkError::BadPath("unterminated `{` in parquet ref path".to_string())
    })?;
    let store = path[1..close].to_string();
    let rest = path[close + 1..].trim_start_matches('/').to_string();
    Ok((store, rest))
}

fn parent_dirname(uri: &str) -> String {
    match uri.rfind('/') {
        Some(idx) => uri[..idx].to_string(),
        None => String::new(),
    }
}

fn is_remote_uri(uri: &str) -> bool {
    uri.contains("://")
}

/// Read-only VFS over a single JSON reference manifest.
pub struct JsonRefVfs<'a> {
    config: &'a Config,
    cache: &'a CacheManager,
    range_reader: &'a dyn RangeReader,
}

impl<'a> JsonRefVfs<'a> {
    pub fn new(config: &'a Config, cache: &'a CacheManager, range_reader: &'a dyn RangeReader) -> Self {
        Self {
            config,
            cache,
            range_reader,
        }
    }

    pub fn open(&self, path: &str) -> Result<Bytes> {
        let (json_uri, key) = split_json_path(path)?;
        if key.is_empty() {
            return Err(KerchunkError::BadPath(
                "cannot open the store root as a file".to_string(),
            ));
        }
        let loader = JsonLoader::new(self.config, self.cache, self.range_reader);
        let rf = loader.load(&json_uri)?;

        match rf.get(&key) {
            Some(Entry::Inline(bytes)) => Ok(Bytes::copy_from_slice(bytes)),
            Some(Entry::Referenced { uri, range }) => {
                let resolver = crate::uri::UriResolver::new(&parent_dirname(&json_uri), is_remote_uri(&json_uri));
                let resolved = resolver.resolve(rf.uri(*uri), self.config)?;
                match range {
                    Some((offset, size)) => self.range_reader.read_range(&resolved, *offset, Some(*size)),
                    None => self.range_reader.read_range(&resolved, 0, None),
                }
            }
            None => {
                if rf.direct_children(&key).is_empty() {
                    Err(KerchunkError::BadPath(format!("no such key: {key}")))
                } else {
                    Err(KerchunkError::BadPath(format!(
                        "{key} is a directory, not a file"
                    )))
                }
            }
        }
    }

    pub fn stat(&self, path: &str) -> Result<StatInfo> {
        let (json_uri, key) = split_json_path(path)?;
        let loader = JsonLoader::new(self.config, self.cache, self.range_reader);
        let rf = loader.load(&json_uri)?;

        if key.is_empty() {
            return Ok(StatInfo { size: 0, is_dir: true });
        }

        if let Some(entry) = rf.get(&key) {
            let size = match entry {
                Entry::Inline(bytes) => bytes.len() as u64,
                Entry::Referenced { uri, range } => match range {
                    Some((_, size)) => *size,
                    None => {
                        let resolver =
                            crate::uri::UriResolver::new(&parent_dirname(&json_uri), is_remote_uri(&json_uri));
                        let resolved = resolver.resolve(rf.uri(*uri), self.config)?;
                        self.range_reader.stat(&resolved)?
                    }
                },
            };
            return Ok(StatInfo { size, is_dir: false });
        }

        if !rf.direct_children(&key).is_empty() {
            return Ok(StatInfo { size: 0, is_dir: true });
        }

        Err(KerchunkError::BadPath(format!("no such key: {key}")))
    }

    pub fn readdir(&self, path: &str, max_files: Option<usize>) -> Result<Vec<String>> {
        let (json_uri, key) = split_json_path(path)?;
        let loader = JsonLoader::new(self.config, self.cache, self.range_reader);
        let rf = loader.load(&json_uri)?;
        let mut children = rf.direct_children(&key);
        if let Some(max) = max_files {
            children.truncate(max);
        }
        Ok(children)
    }
}

/// Read-only VFS over a sharded Parquet reference store.
pub struct ParquetRefVfs<'a> {
    config: &'a Config,
    cache: &'a CacheManager,
    range_reader: &'a dyn RangeReader,
}

impl<'a> ParquetRefVfs<'a> {
    pub fn new(config: &'a Config, cache: &'a CacheManager, range_reader: &'a dyn RangeReader) -> Self {
        Self {
            config,
            cache,
            range_reader,
        }
    }

    fn load_store(&self, store_uri: &str) -> Result<std::sync::Arc<ParquetRefReader>> {
        let is_remote = is_remote_uri(store_uri);
        self.cache.get_or_load_parquet_store(store_uri, || {
            ParquetRefReader::load_metadata(store_uri, is_remote, self.range_reader)
        })
    }

    pub fn open(&self, path: &str) -> Result<Bytes> {
        let (store_uri, key) = split_parquet_path(path)?;
        let store = self.load_store(&store_uri)?;
        open_in_store(&store, &key, self.config, self.cache, self.range_reader)
    }

    pub fn stat(&self, path: &str) -> Result<StatInfo> {
        let (store_uri, key) = split_parquet_path(path)?;
        let store = self.load_store(&store_uri)?;
        stat_in_store(&store, &key, self.config, self.cache, self.range_reader)
    }

    pub fn readdir(&self, path: &str, max_files: Option<usize>) -> Result<Vec<String>> {
        let (store_uri, key) = split_parquet_path(path)?;
        let store = self.load_store(&store_uri)?;
        readdir_in_store(&store, &key, max_files, self.config, self.cache, self.range_reader)
    }
}

/// Read-only VFS over a JSON reference manifest that is transparently
/// promoted to (and then served out of) an on-disk Parquet cache, per the
/// `_cached` prefix.
pub struct CachedJsonRefVfs<'a> {
    config: &'a Config,
    cache: &'a CacheManager,
    range_reader: &'a dyn RangeReader,
}

impl<'a> CachedJsonRefVfs<'a> {
    pub fn new(config: &'a Config, cache: &'a CacheManager, range_reader: &'a dyn RangeReader) -> Self {
        Self {
            config,
            cache,
            range_reader,
        }
    }

    fn load_store(&self, json_uri: &str) -> Result<std::sync::Arc<ParquetRefReader>> {
        let json_is_remote = is_remote_uri(json_uri);
        let cache_dir = cache_subdir_for(self.config, json_uri, self.range_reader)?;
        let loader = JsonLoader::new(self.config, self.cache, self.range_reader);
        loader.load_with_parquet_cache(json_uri, json_is_remote, &cache_dir)
    }

    pub fn open(&self, path: &str) -> Result<Bytes> {
        let (json_uri, key) = split_json_path(path)?;
        let store = self.load_store(&json_uri)?;
        open_in_store(&store, &key, self.config, self.cache, self.range_reader)
    }

    pub fn stat(&self, path: &str) -> Result<StatInfo> {
        let (json_uri, key) = split_json_path(path)?;
        let store = self.load_store(&json_uri)?;
        stat_in_store(&store, &key, self.config, self.cache, self.range_reader)
    }

    pub fn readdir(&self, path: &str, max_files: Option<usize>) -> Result<Vec<String>> {
        let (json_uri, key) = split_json_path(path)?;
        let store = self.load_store(&json_uri)?;
        readdir_in_store(&store, &key, max_files, self.config, self.cache, self.range_reader)
    }
}

/// Derives the deterministic `<cache-root>/zarr_kerchunk_cache/<basename>_<size>_<mtime>/zarr`
/// cache sub-directory for a source JSON manifest.
fn cache_subdir_for(config: &Config, json_uri: &str, range_reader: &dyn RangeReader) -> Result<std::path::PathBuf> {
    let size = range_reader.stat(json_uri)?;
    let mtime = range_reader.mtime(json_uri)?;
    let basename = json_uri.rsplit('/').next().unwrap_or(json_uri);
    let root = config
        .cache_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    Ok(root
        .join("zarr_kerchunk_cache")
        .join(format!("{basename}_{size}_{mtime}"))
        .join("zarr"))
}

fn open_in_store(
    store: &ParquetRefReader,
    key: &str,
    config: &Config,
    cache: &CacheManager,
    range_reader: &dyn RangeReader,
) -> Result<Bytes> {
    if key.is_empty() {
        return Err(KerchunkError::BadPath(
            "cannot open the store root as a file".to_string(),
        ));
    }
    match store.resolve_chunk(key, config, cache, range_reader)? {
        Some(ResolvedChunk::Inline(bytes)) => Ok(Bytes::from(bytes)),
        Some(ResolvedChunk::Referenced { uri, offset, size }) => {
            if size == 0 {
                range_reader.read_range(&uri, offset, None)
            } else {
                range_reader.read_range(&uri, offset, Some(size))
            }
        }
        None => Err(KerchunkError::BadPath(format!("no such key: {key}"))),
    }
}

fn stat_in_store(
    store: &ParquetRefReader,
    key: &str,
    config: &Config,
    cache: &CacheManager,
    range_reader: &dyn RangeReader,
) -> Result<StatInfo> {
    if key.is_empty() {
        return Ok(StatInfo { size: 0, is_dir: true });
    }

    if let Some(resolved) = store.resolve_chunk(key, config, cache, range_reader)? {
        let size = match resolved {
            ResolvedChunk::Inline(bytes) => bytes.len() as u64,
            ResolvedChunk::Referenced { uri, offset, size } => {
                if size == 0 {
                    range_reader.stat(&uri)?.saturating_sub(offset)
                } else {
                    size
                }
            }
        };
        return Ok(StatInfo { size, is_dir: false });
    }

    if store.arrays().contains_key(key) || is_group_prefix(store, key) {
        return Ok(StatInfo { size: 0, is_dir: true });
    }

    Err(KerchunkError::BadPath(format!("no such key: {key}")))
}

fn is_group_prefix(store: &ParquetRefReader, key: &str) -> bool {
    let prefix = format!("{key}/");
    store.arrays().keys().any(|a| a.starts_with(&prefix))
}

fn readdir_in_store(
    store: &ParquetRefReader,
    key: &str,
    max_files: Option<usize>,
    config: &Config,
    cache: &CacheManager,
    range_reader: &dyn RangeReader,
) -> Result<Vec<String>> {
    if let Some(info) = store.arrays().get(key) {
        let mut out = vec![".zarray".to_string()];
        if store
            .resolve_chunk(&format!("{}{}.zattrs", key, if key.is_empty() { "" } else { "/" }), config, cache, range_reader)?
            .is_some()
        {
            out.push(".zattrs".to_string());
        }
        out.extend(enumerate_chunk_names(info, max_files.map(|m| m.saturating_sub(out.len()))));
        if let Some(max) = max_files {
            out.truncate(max);
        }
        return Ok(out);
    }

    let array_paths: Vec<&str> = store.arrays().keys().map(|s| s.as_str()).collect();
    let mut children = direct_children_of(array_paths.into_iter(), key);
    if let Some(max) = max_files {
        children.truncate(max);
    }
    Ok(children)
}

/// Enumerates chunk-key suffixes for an array (e.g. `"0.0"`, `"0.1"`, ...)
/// in row-major order, stopping early once `max_files` entries have been
/// produced rather than materializing the full (potentially huge)
/// Cartesian product first.
fn enumerate_chunk_names(info: &ZarrArrayInfo, max_files: Option<usize>) -> Vec<String> {
    if info.chunk_counts.is_empty() {
        // Scalar (0-d) array: exactly one chunk, keyed "0".
        return vec!["0".to_string()];
    }
    let mut out = Vec::new();
    let mut indices = vec![0u64; info.chunk_counts.len()];
    enumerate_axis(0, &mut indices, info, max_files, &mut out);
    out
}

fn enumerate_axis(
    axis: usize,
    indices: &mut [u64],
    info: &ZarrArrayInfo,
    max_files: Option<usize>,
    out: &mut Vec<String>,
) -> bool {
    if let Some(max) = max_files {
        if out.len() >= max {
            return true;
        }
    }
    if axis == indices.len() {
        let name = indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(".");
        out.push(name);
        return false;
    }
    for i in 0..info.chunk_counts[axis] {
        indices[axis] = i;
        if enumerate_axis(axis + 1, indices, info, max_files, out) {
            return true;
        }
    }
    false
}
