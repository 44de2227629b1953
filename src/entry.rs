//! The chunk-reference data model: a single manifest entry, and the
//! document-wide table of entries plus deduplicated URIs.

use std::collections::{BTreeMap, HashMap};

use base64::Engine;

use crate::error::{KerchunkError, Result};

/// One key's worth of content: either embedded bytes, or a byte range (or
/// whole object) inside some other URI.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Inline(Vec<u8>),
    Referenced {
        /// Index into `RefFile::uris`.
        uri: u32,
        /// `None` means "the whole object", matching a single-element
        /// `[uri]` reference array.
        range: Option<(u64, u64)>,
    },
}

/// A fully parsed reference manifest: a dense, deduplicated URI table and a
/// lexicographically ordered key -> entry map.
#[derive(Debug, Default)]
pub struct RefFile {
    uris: Vec<String>,
    uri_index: HashMap<String, u32>,
    entries: BTreeMap<String, Entry>,
}

impl RefFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_uri(&mut self, uri: &str) -> u32 {
        if let Some(&idx) = self.uri_index.get(uri) {
            return idx;
        }
        let idx = self.uris.len() as u32;
        self.uris.push(uri.to_string());
        self.uri_index.insert(uri.to_string(), idx);
        idx
    }

    pub fn uri(&self, idx: u32) -> &str {
        &self.uris[idx as usize]
    }

    pub fn insert(&mut self, key: String, entry: Entry) {
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct children of `prefix` (a directory path with no trailing
    /// slash, or `""` for the root), one path segment deep, deduplicated.
    pub fn direct_children(&self, prefix: &str) -> Vec<String> {
        direct_children_of(self.entries.keys().map(|s| s.as_str()), prefix)
    }
}

/// Shared directory-synthesis helper: given a flat key namespace, lists the
/// distinct first path segments below `prefix`. Used both by `RefFile`
/// (JSON stores) and by the Parquet store's synthesized array/group
/// directories.
pub fn direct_children_of<'a>(keys: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let prefix_with_slash = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    };
    let mut seen = std::collections::BTreeSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix_with_slash.as_str()) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let child = rest.split('/').next().unwrap_or(rest);
        seen.insert(child.to_string());
    }
    seen.into_iter().collect()
}

/// Decodes an inline string value: `base64:<payload>` or raw UTF-8 bytes.
pub fn inline_from_str(key: &str, raw: &str) -> Result<Vec<u8>> {
    if let Some(b64) = raw.strip_prefix("base64:") {
        base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| KerchunkError::BadBase64 {
                key: key.to_string(),
                reason: e.to_string(),
            })
    } else {
        Ok(raw.as_bytes().to_vec())
    }
}

/// Validates and builds a `Referenced` entry from a `[uri]` or
/// `[uri, offset, size]` reference array.
pub fn referenced_from_parts(key: &str, parts: &[RefArrayElem]) -> Result<(String, Option<(u64, u64)>)> {
    match parts {
        [RefArrayElem::Str(uri)] => Ok((uri.clone(), None)),
        [RefArrayElem::Str(uri), RefArrayElem::Num(offset), RefArrayElem::Num(size)] => {
            let offset: u64 = offset.parse().map_err(|_| KerchunkError::BadRefArray {
                key: key.to_string(),
                reason: format!("offset {offset:?} is not a non-negative integer"),
            })?;
            let size: u64 = size.parse().map_err(|_| KerchunkError::BadRefArray {
                key: key.to_string(),
                reason: format!("size {size:?} is not a non-negative integer"),
            })?;
            Ok((uri.clone(), Some((offset, size))))
        }
        other => Err(KerchunkError::BadRefArray {
            key: key.to_string(),
            reason: format!("expected 1 or 3 elements, got {}", other.len()),
        }),
    }
}

/// A reference-array element, decoupled from any particular JSON
/// representation so both the streaming and buffered parsers can build it.
#[derive(Debug, Clone)]
pub enum RefArrayElem {
    Str(String),
    Num(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedupes_uris() {
        let mut rf = RefFile::new();
        let a = rf.intern_uri("s3://bucket/blob.nc");
        let b = rf.intern_uri("s3://bucket/blob.nc");
        let c = rf.intern_uri("s3://bucket/other.nc");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(rf.uri(a), "s3://bucket/blob.nc");
    }

    #[test]
    fn inline_decodes_base64_prefix() {
        let decoded = inline_from_str("data/0", "base64:aGVsbG8=").unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn inline_raw_string_is_utf8_bytes() {
        let decoded = inline_from_str("data/0", "hello").unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn referenced_from_parts_accepts_whole_object_form() {
        let parts = vec![RefArrayElem::Str("s3://b/f.bin".into())];
        let (uri, range) = referenced_from_parts("k", &parts).unwrap();
        assert_eq!(uri, "s3://b/f.bin");
        assert_eq!(range, None);
    }

    #[test]
    fn referenced_from_parts_accepts_ranged_form() {
        let parts = vec![
            RefArrayElem::Str("s3://b/f.bin".into()),
            RefArrayElem::Num("100".into()),
            RefArrayElem::Num("42".into()),
        ];
        let (uri, range) = referenced_from_parts("k", &parts).unwrap();
        assert_eq!(uri, "s3://b/f.bin");
        assert_eq!(range, Some((100, 42)));
    }

    #[test]
    fn referenced_from_parts_rejects_bad_arity() {
        let parts = vec![
            RefArrayElem::Str("s3://b/f.bin".into()),
            RefArrayElem::Num("100".into()),
        ];
        assert!(referenced_from_parts("k", &parts).is_err());
    }

    #[test]
    fn direct_children_lists_one_segment_deep() {
        let mut rf = RefFile::new();
        rf.insert("a/.zarray".into(), Entry::Inline(vec![]));
        rf.insert("a/0.0".into(), Entry::Inline(vec![]));
        rf.insert("a/b/.zarray".into(), Entry::Inline(vec![]));
        rf.insert(".zgroup".into(), Entry::Inline(vec![]));
        let mut children = rf.direct_children("");
        children.sort();
        assert_eq!(children, vec![".zgroup", "a"]);

        let mut a_children = rf.direct_children("a");
        a_children.sort();
        assert_eq!(a_children, vec!["0.0", ".zarray", "b"]);
    }
}
