//! Reads a sharded Parquet reference store: `.zmetadata` metadata loading,
//! per-array shape bookkeeping, and chunk-index-to-row resolution.

use std::collections::BTreeMap;

use arrow::array::{Array, BinaryArray, Int32Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::{KerchunkError, Result};
use crate::parquet_writer::{ShapeEntry, ZMetadata};
use crate::rangereader::RangeReader;
use crate::uri::UriResolver;
use crate::zarr::ZarrArrayInfo;

/// What a resolved chunk key points to.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedChunk {
    Inline(Vec<u8>),
    Referenced {
        uri: String,
        offset: u64,
        size: u64,
    },
}

pub struct ParquetRefReader {
    root_uri: String,
    root_is_remote: bool,
    record_size: u64,
    arrays: BTreeMap<String, ZarrArrayInfo>,
    metadata: BTreeMap<String, String>,
}

impl ParquetRefReader {
    /// Loads `.zmetadata` from `root_uri` and validates per-array shapes.
    pub fn load_metadata(
        root_uri: &str,
        root_is_remote: bool,
        reader: &dyn RangeReader,
    ) -> Result<Self> {
        let zmeta_uri = format!("{}/.zmetadata", root_uri.trim_end_matches('/'));
        let bytes = reader.read_range(&zmeta_uri, 0, None)?;
        let zmeta: ZMetadata = serde_json::from_slice(&bytes)?;

        let mut arrays = BTreeMap::new();
        for (path, shape) in &zmeta.shapes {
            arrays.insert(path.clone(), shape_entry_to_info(path, shape)?);
        }

        Ok(Self {
            root_uri: root_uri.trim_end_matches('/').to_string(),
            root_is_remote,
            record_size: zmeta.record_size,
            arrays,
            metadata: zmeta.metadata,
        })
    }

    pub fn arrays(&self) -> &BTreeMap<String, ZarrArrayInfo> {
        &self.arrays
    }

    /// Resolves `key` to its content. Returns `Ok(None)` for a missing or
    /// malformed chunk index — the reader never hard-aborts on a bad chunk
    /// index the way the writer does on a bad `.zarray`.
    pub fn resolve_chunk(
        &self,
        key: &str,
        config: &Config,
        cache: &CacheManager,
        reader: &dyn RangeReader,
    ) -> Result<Option<ResolvedChunk>> {
        if let Some(content) = self.metadata.get(key) {
            return Ok(Some(ResolvedChunk::Inline(content.clone().into_bytes())));
        }

        let Some((array_path, suffix)) = self.split_chunk_key(key) else {
            return Ok(None);
        };
        let Ok(indices) = ZarrArrayInfo::parse_dotted_index(suffix) else {
            return Ok(None);
        };
        let info = self.arrays.get(&array_path).expect("array_path came from self.arrays");
        let Ok(linear) = info.linear_index(&indices) else {
            return Ok(None);
        };

        let shard_idx = linear / self.record_size;
        let row_idx = (linear % self.record_size) as usize;

        let array_dir = if array_path.is_empty() {
            self.root_uri.clone()
        } else {
            format!("{}/{array_path}", self.root_uri)
        };
        let shard_uri = format!("{array_dir}/refs.{shard_idx}.parq");

        let bytes = cache.get_or_load_shard(&shard_uri, || reader.read_range(&shard_uri, 0, None))?;
        let row = read_shard_row(&bytes, row_idx)?;

        match row {
            None => Ok(None),
            Some(RowValues {
                raw: Some(raw), ..
            }) => Ok(Some(ResolvedChunk::Inline(raw))),
            Some(RowValues {
                path: Some(path),
                offset,
                size,
                ..
            }) => {
                let resolver = UriResolver::new(&array_dir, self.root_is_remote);
                let resolved = resolver.resolve(&path, config)?;
                Ok(Some(ResolvedChunk::Referenced {
                    uri: resolved,
                    offset: offset.unwrap_or(0) as u64,
                    size: size.unwrap_or(0) as u64,
                }))
            }
            Some(_) => Ok(None),
        }
    }

    fn split_chunk_key(&self, key: &str) -> Option<(String, &str)> {
        for array_path in self.arrays.keys() {
            if array_path.is_empty() {
                if !key.contains('/') {
                    return Some((String::new(), key));
                }
            } else if let Some(suffix) = key.strip_prefix(&format!("{array_path}/")) {
                if !suffix.contains('/') {
                    return Some((array_path.clone(), suffix));
                }
            }
        }
        None
    }
}

fn shape_entry_to_info(path: &str, shape: &ShapeEntry) -> Result<ZarrArrayInfo> {
    if shape.chunk_counts.iter().any(|&c| c == 0) {
        return Err(KerchunkError::BadManifest(format!(
            "{path}: zero chunk count in stored shape"
        )));
    }
    Ok(ZarrArrayInfo {
        chunk_counts: shape.chunk_counts.clone(),
        total_chunks: shape.total_chunks,
    })
}

struct RowValues {
    path: Option<String>,
    offset: Option<i64>,
    size: Option<i64>,
    raw: Option<Vec<u8>>,
}

const EXPECTED_FIELDS: [&str; 4] = ["path", "offset", "size", "raw"];

/// Reads a nullable `offset`/`size` cell, accepting either the `Int64` or
/// `Int32` column width the store may have been written with.
fn read_nullable_int(col: &dyn Array, field: &str, idx: usize) -> Result<Option<i64>> {
    if col.is_null(idx) {
        return Ok(None);
    }
    match col.data_type() {
        DataType::Int64 => Ok(Some(
            col.as_any().downcast_ref::<Int64Array>().unwrap().value(idx),
        )),
        DataType::Int32 => Ok(Some(
            col.as_any().downcast_ref::<Int32Array>().unwrap().value(idx) as i64,
        )),
        other => Err(KerchunkError::BadManifest(format!(
            "{field} column has unsupported type {other:?}, expected Int32 or Int64"
        ))),
    }
}

fn read_shard_row(bytes: &bytes::Bytes, row_idx: usize) -> Result<Option<RowValues>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())?;
    let schema = builder.schema();
    let field_names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    if field_names != EXPECTED_FIELDS {
        return Err(KerchunkError::BadManifest(format!(
            "unexpected parquet shard schema: {field_names:?}"
        )));
    }

    let reader = builder.build()?;
    let mut remaining = row_idx;
    for batch in reader {
        let batch = batch?;
        let n = batch.num_rows();
        if remaining >= n {
            remaining -= n;
            continue;
        }

        let path_col = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("path column is Utf8");
        let offset_col = batch.column(1).as_ref();
        let size_col = batch.column(2).as_ref();
        let raw_col = batch
            .column(3)
            .as_any()
            .downcast_ref::<BinaryArray>()
            .expect("raw column is Binary");

        if path_col.is_null(remaining) && raw_col.is_null(remaining) {
            return Ok(None);
        }

        return Ok(Some(RowValues {
            path: (!path_col.is_null(remaining)).then(|| path_col.value(remaining).to_string()),
            offset: read_nullable_int(offset_col, "offset", remaining)?,
            size: read_nullable_int(size_col, "size", remaining)?,
            raw: (!raw_col.is_null(remaining)).then(|| raw_col.value(remaining).to_vec()),
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, RefFile};
    use crate::rangereader::LocalRangeReader;

    fn build_sample_store(dir: &std::path::Path) {
        let mut rf = RefFile::new();
        rf.insert(
            ".zgroup".to_string(),
            Entry::Inline(br#"{"zarr_format":2}"#.to_vec()),
        );
        rf.insert(
            "data/.zarray".to_string(),
            Entry::Inline(br#"{"shape":[4,1],"chunks":[2,1],"dtype":"<f8"}"#.to_vec()),
        );
        let uri = rf.intern_uri("blob.nc");
        rf.insert(
            "data/0.0".to_string(),
            Entry::Referenced {
                uri,
                range: Some((0, 8)),
            },
        );
        crate::parquet_writer::convert(&rf, dir, None).unwrap();
    }

    #[test]
    fn resolves_chunk_and_metadata_keys() {
        let dir = tempfile::tempdir().unwrap();
        build_sample_store(dir.path());

        let reader = LocalRangeReader;
        let store =
            ParquetRefReader::load_metadata(dir.path().to_str().unwrap(), false, &reader).unwrap();
        let cache = CacheManager::new(Config::default());
        let config = Config::default();

        let resolved = store
            .resolve_chunk("data/0.0", &config, &cache, &reader)
            .unwrap()
            .unwrap();
        match resolved {
            ResolvedChunk::Referenced { uri, offset, size } => {
                assert!(uri.ends_with("blob.nc"));
                assert_eq!(offset, 0);
                assert_eq!(size, 8);
            }
            other => panic!("expected referenced chunk, got {other:?}"),
        }

        let zgroup = store
            .resolve_chunk(".zgroup", &config, &cache, &reader)
            .unwrap()
            .unwrap();
        assert!(matches!(zgroup, ResolvedChunk::Inline(_)));
    }

    #[test]
    fn missing_chunk_resolves_to_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        build_sample_store(dir.path());

        let reader = LocalRangeReader;
        let store =
            ParquetRefReader::load_metadata(dir.path().to_str().unwrap(), false, &reader).unwrap();
        let cache = CacheManager::new(Config::default());
        let config = Config::default();

        // data/1.0 is a valid index (2 chunks along axis 0) but was never
        // populated, so its row is all-null.
        let resolved = store
            .resolve_chunk("data/1.0", &config, &cache, &reader)
            .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn read_nullable_int_accepts_int32_and_int64_columns() {
        let wide = Int64Array::from(vec![Some(5i64), None]);
        assert_eq!(read_nullable_int(&wide, "offset", 0).unwrap(), Some(5));
        assert_eq!(read_nullable_int(&wide, "offset", 1).unwrap(), None);

        let narrow = Int32Array::from(vec![Some(7i32), None]);
        assert_eq!(read_nullable_int(&narrow, "size", 0).unwrap(), Some(7));
        assert_eq!(read_nullable_int(&narrow, "size", 1).unwrap(), None);
    }

    #[test]
    fn read_nullable_int_rejects_other_column_types() {
        let strings = StringArray::from(vec![Some("x")]);
        assert!(read_nullable_int(&strings, "offset", 0).is_err());
    }

    #[test]
    fn malformed_chunk_index_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        build_sample_store(dir.path());

        let reader = LocalRangeReader;
        let store =
            ParquetRefReader::load_metadata(dir.path().to_str().unwrap(), false, &reader).unwrap();
        let cache = CacheManager::new(Config::default());
        let config = Config::default();

        let resolved = store
            .resolve_chunk("data/x.y", &config, &cache, &reader)
            .unwrap();
        assert!(resolved.is_none());
    }
}
