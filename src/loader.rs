//! Picks a JSON manifest parser (streaming or buffered), and optionally
//! promotes a manifest into a build-once Parquet reference-store cache.

use std::io::Cursor;
use std::path::Path;

use tracing::{debug, info};

use crate::cache::CacheManager;
use crate::config::{Config, StreamingMode};
use crate::entry::RefFile;
use crate::error::{KerchunkError, Result};
use crate::parquet_reader::ParquetRefReader;
use crate::parquet_writer;
use crate::parser;
use crate::rangereader::RangeReader;

const PROBE_BYTES: u64 = 1024;

pub struct JsonLoader<'a> {
    config: &'a Config,
    cache: &'a CacheManager,
    range_reader: &'a dyn RangeReader,
}

impl<'a> JsonLoader<'a> {
    pub fn new(config: &'a Config, cache: &'a CacheManager, range_reader: &'a dyn RangeReader) -> Self {
        Self {
            config,
            cache,
            range_reader,
        }
    }

    /// Loads and caches the `RefFile` for a plain JSON manifest.
    pub fn load(&self, json_uri: &str) -> Result<std::sync::Arc<RefFile>> {
        self.cache
            .get_or_load_ref_file(json_uri, || self.parse_document(json_uri))
    }

    fn parse_document(&self, json_uri: &str) -> Result<RefFile> {
        let size = self.range_reader.stat(json_uri)?;
        if size > self.config.json_max_size {
            return Err(KerchunkError::BadManifest(format!(
                "{json_uri}: {size} bytes exceeds the configured max of {}",
                self.config.json_max_size
            )));
        }

        let use_streaming = match self.config.use_streaming_parser {
            StreamingMode::Force => true,
            StreamingMode::Disable => false,
            StreamingMode::Auto => {
                let probe = self
                    .range_reader
                    .read_range(json_uri, 0, Some(size.min(PROBE_BYTES)))?;
                parser::is_likely_streamable(&probe)
            }
        };

        let bytes = self.range_reader.read_range(json_uri, 0, None)?;
        if use_streaming {
            debug!(json_uri, "parsing manifest with streaming parser");
            parser::parse_streaming(Cursor::new(bytes))
        } else {
            debug!(json_uri, "parsing manifest with buffered parser");
            parser::parse_buffered_bytes(&bytes)
        }
    }

    /// Ensures a Parquet cache directory has been built for `json_uri`
    /// (build-once, lock-coordinated), then loads and caches its metadata.
    pub fn load_with_parquet_cache(
        &self,
        json_uri: &str,
        json_is_remote: bool,
        cache_dir: &Path,
    ) -> Result<std::sync::Arc<ParquetRefReader>> {
        let locator = cache_dir.to_string_lossy().to_string();
        self.cache.get_or_load_parquet_store(&locator, || {
            self.cache.build_parquet_cache_once(cache_dir, |dir| {
                let rf = self.parse_document(json_uri)?;
                info!(json_uri, ?dir, "building parquet reference cache");
                parquet_writer::convert(&rf, dir, None)
                    .map_err(|e| KerchunkError::CacheBuildFailed(e.to_string()))
            })?;
            ParquetRefReader::load_metadata(
                cache_dir.to_str().ok_or_else(|| {
                    KerchunkError::BadPath("cache dir is not valid UTF-8".to_string())
                })?,
                json_is_remote,
                self.range_reader,
            )
        })
    }
}
