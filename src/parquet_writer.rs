//! Three-pass conversion of a fully parsed JSON `RefFile` into a sharded
//! Parquet reference store: `.zmetadata` plus per-array `refs.N.parq`
//! shard files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{BinaryBuilder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use tracing::info;

use crate::entry::{Entry, RefFile};
use crate::error::{KerchunkError, Result};
use crate::zarr::ZarrArrayInfo;

/// Fixed row count per shard file, matching the reader's expectations.
pub const RECORD_SIZE: u64 = 100_000;

/// Optional progress callback invoked with a fraction in `[0, 1]`.
/// Returning `false` aborts the conversion with `KerchunkError::Cancelled`.
pub type ProgressFn<'a> = dyn FnMut(f64) -> bool + 'a;

/// Converts `refs` into a Parquet reference store rooted at `dst_dir`.
/// `dst_dir` is created if missing; the final `.zmetadata` is written via
/// an atomic rename of a `.zmetadata.tmp` sibling so a reader never
/// observes a half-written store.
pub fn convert(refs: &RefFile, dst_dir: &Path, mut progress: Option<&mut ProgressFn>) -> Result<()> {
    std::fs::create_dir_all(dst_dir)?;

    // Pass A: classify every key as array metadata, a scalar metadata
    // entry, or a chunk-data entry belonging to some array, and derive
    // each array's shape.
    let mut array_infos: BTreeMap<String, ZarrArrayInfo> = BTreeMap::new();
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();
    let mut chunk_keys: Vec<(String, String, Vec<u64>)> = Vec::new(); // (array_path, full_key, indices)

    for key in refs.keys() {
        if let Some(array_path) = key.strip_suffix("/.zarray") {
            let bytes = inline_bytes(refs, key)?;
            let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
            let info = zarr_info_from_zarray(array_path, &doc)?;
            array_infos.insert(array_path.to_string(), info);
            metadata.insert(key.to_string(), String::from_utf8_lossy(&bytes).into_owned());
        } else if key == ".zarray" {
            let bytes = inline_bytes(refs, key)?;
            let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
            let info = zarr_info_from_zarray("", &doc)?;
            array_infos.insert(String::new(), info);
            metadata.insert(key.to_string(), String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    for key in refs.keys() {
        if key.ends_with("/.zarray") || key == ".zarray" {
            continue;
        }
        if key.ends_with(".zattrs") || key.ends_with(".zgroup") {
            metadata.insert(key.to_string(), String::from_utf8_lossy(&inline_bytes(refs, key)?).into_owned());
            continue;
        }

        // Does this key belong to a registered array (dir prefix match) and
        // look like a dotted chunk index?
        if let Some((array_path, suffix)) = split_chunk_key(key, &array_infos) {
            if let Ok(indices) = ZarrArrayInfo::parse_dotted_index(suffix) {
                chunk_keys.push((array_path, key.to_string(), indices));
                continue;
            }
        }

        // Anything else (non-chunk, non-.zarray/.zattrs/.zgroup inline
        // content) is carried as opaque metadata.
        if let Some(Entry::Inline(bytes)) = refs.get(key) {
            metadata.insert(key.to_string(), String::from_utf8_lossy(bytes).into_owned());
        }
    }

    // Pass B: bucket chunk entries into per-array, per-shard row slots.
    struct Row {
        path: Option<String>,
        offset: Option<i64>,
        size: Option<i64>,
        raw: Option<Vec<u8>>,
    }

    let mut shards: BTreeMap<String, Vec<Vec<Row>>> = BTreeMap::new();
    for (array_path, info) in &array_infos {
        let shard_count = info.total_chunks.div_ceil(RECORD_SIZE).max(1) as usize;
        let mut per_shard = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let mut rows = Vec::with_capacity(RECORD_SIZE as usize);
            for _ in 0..RECORD_SIZE {
                rows.push(Row {
                    path: None,
                    offset: None,
                    size: None,
                    raw: None,
                });
            }
            per_shard.push(rows);
        }
        shards.insert(array_path.clone(), per_shard);
    }

    let total_entries = chunk_keys.len().max(1);
    for (i, (array_path, key, indices)) in chunk_keys.iter().enumerate() {
        let info = array_infos.get(array_path).ok_or_else(|| {
            KerchunkError::BadManifest(format!("chunk key {key} has no matching .zarray"))
        })?;
        let linear = info.linear_index(indices)?;
        let shard_idx = (linear / RECORD_SIZE) as usize;
        let row_idx = (linear % RECORD_SIZE) as usize;
        let row = &mut shards.get_mut(array_path).unwrap()[shard_idx][row_idx];

        match refs.get(key) {
            Some(Entry::Referenced { uri, range }) => {
                row.path = Some(refs.uri(*uri).to_string());
                match range {
                    Some((offset, size)) => {
                        row.offset = Some(*offset as i64);
                        row.size = Some(*size as i64);
                    }
                    None => {
                        row.offset = Some(0);
                        row.size = Some(0);
                    }
                }
            }
            Some(Entry::Inline(bytes)) => {
                row.raw = Some(bytes.clone());
            }
            None => unreachable!("chunk key collected from refs.keys()"),
        }

        if let Some(cb) = progress.as_deref_mut() {
            let frac = (i + 1) as f64 / total_entries as f64;
            if !cb(frac * 0.5) {
                return Err(KerchunkError::Cancelled);
            }
        }
    }

    // Pass C: write shard files, then the `.zmetadata` sidecar last, via
    // an atomic rename so a partially written store is never visible.
    let schema = Arc::new(Schema::new(vec![
        Field::new("path", DataType::Utf8, true),
        Field::new("offset", DataType::Int64, true),
        Field::new("size", DataType::Int64, true),
        Field::new("raw", DataType::Binary, true),
    ]));

    let mut written = 0usize;
    let total_shards: usize = shards.values().map(|v| v.len()).sum::<usize>().max(1);
    for (array_path, per_shard) in &shards {
        let array_dir = if array_path.is_empty() {
            dst_dir.to_path_buf()
        } else {
            dst_dir.join(array_path)
        };
        std::fs::create_dir_all(&array_dir)?;

        for (shard_idx, rows) in per_shard.iter().enumerate() {
            let mut path_b = StringBuilder::new();
            let mut offset_b = Int64Builder::new();
            let mut size_b = Int64Builder::new();
            let mut raw_b = BinaryBuilder::new();

            for row in rows {
                match &row.path {
                    Some(p) => path_b.append_value(p),
                    None => path_b.append_null(),
                }
                match row.offset {
                    Some(v) => offset_b.append_value(v),
                    None => offset_b.append_null(),
                }
                match row.size {
                    Some(v) => size_b.append_value(v),
                    None => size_b.append_null(),
                }
                match &row.raw {
                    Some(v) => raw_b.append_value(v),
                    None => raw_b.append_null(),
                }
            }

            let batch = RecordBatch::try_new(
                Arc::clone(&schema),
                vec![
                    Arc::new(path_b.finish()),
                    Arc::new(offset_b.finish()),
                    Arc::new(size_b.finish()),
                    Arc::new(raw_b.finish()),
                ],
            )
            .map_err(|e| parquet::errors::ParquetError::ArrowError(e.to_string()))?;

            let shard_path = array_dir.join(format!("refs.{shard_idx}.parq"));
            let file = std::fs::File::create(&shard_path)?;
            let props = WriterProperties::builder().build();
            let mut writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;

            written += 1;
            if let Some(cb) = progress.as_deref_mut() {
                let frac = written as f64 / total_shards as f64;
                if !cb(0.5 + frac * 0.5) {
                    return Err(KerchunkError::Cancelled);
                }
            }
        }
    }

    let shapes: BTreeMap<String, ShapeEntry> = array_infos
        .iter()
        .map(|(path, info)| {
            (
                path.clone(),
                ShapeEntry {
                    chunk_counts: info.chunk_counts.clone(),
                    total_chunks: info.total_chunks,
                },
            )
        })
        .collect();

    let sidecar = ZMetadata {
        record_size: RECORD_SIZE,
        metadata,
        shapes,
    };

    let tmp_path = dst_dir.join(".zmetadata.tmp");
    let final_path = dst_dir.join(".zmetadata");
    std::fs::write(&tmp_path, serde_json::to_vec(&sidecar)?)?;
    std::fs::rename(&tmp_path, &final_path)?;

    info!(?dst_dir, arrays = array_infos.len(), "parquet ref store written");
    Ok(())
}

fn inline_bytes(refs: &RefFile, key: &str) -> Result<Vec<u8>> {
    match refs.get(key) {
        Some(Entry::Inline(bytes)) => Ok(bytes.clone()),
        Some(Entry::Referenced { .. }) => Err(KerchunkError::BadManifest(format!(
            "{key} must be inline metadata, not a byte-range reference"
        ))),
        None => Err(KerchunkError::BadManifest(format!("missing key {key}"))),
    }
}

fn zarr_info_from_zarray(array_path: &str, doc: &serde_json::Value) -> Result<ZarrArrayInfo> {
    let shape = read_u64_array(doc, "shape", array_path)?;
    let chunks = read_u64_array(doc, "chunks", array_path)?;
    ZarrArrayInfo::from_shape_and_chunks(array_path, &shape, &chunks)
}

fn read_u64_array(doc: &serde_json::Value, field: &str, array_path: &str) -> Result<Vec<u64>> {
    doc.get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            KerchunkError::BadManifest(format!("{array_path}: .zarray missing `{field}` array"))
        })?
        .iter()
        .map(|v| {
            v.as_u64().ok_or_else(|| {
                KerchunkError::BadManifest(format!(
                    "{array_path}: .zarray `{field}` entry is not a non-negative integer"
                ))
            })
        })
        .collect()
}

/// Returns `(array_path, chunk_index_suffix)` if `key` looks like a chunk
/// of one of the known arrays.
fn split_chunk_key<'a>(
    key: &'a str,
    arrays: &BTreeMap<String, ZarrArrayInfo>,
) -> Option<(String, &'a str)> {
    for array_path in arrays.keys() {
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

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ShapeEntry {
    pub chunk_counts: Vec<u64>,
    pub total_chunks: u64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ZMetadata {
    pub record_size: u64,
    pub metadata: BTreeMap<String, String>,
    pub shapes: BTreeMap<String, ShapeEntry>,
}
