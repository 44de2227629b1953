//! Abstracted byte-range transport. The VFS layer never opens files
//! directly; it goes through a `RangeReader`, so a remote- or
//! object-store-backed implementation can be swapped in without touching
//! any parsing or caching code.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;
use memmap2::Mmap;

use crate::error::{KerchunkError, Result};

pub trait RangeReader: Send + Sync {
    /// Total size in bytes of the object at `uri`.
    fn stat(&self, uri: &str) -> Result<u64>;

    /// Last-modified time of the object at `uri`, as Unix seconds. Used to
    /// derive the on-disk cache sub-directory name for the `_cached` prefix.
    fn mtime(&self, uri: &str) -> Result<i64>;

    /// Reads `size` bytes starting at `offset`, or the whole object when
    /// `size` is `None`.
    fn read_range(&self, uri: &str, offset: u64, size: Option<u64>) -> Result<Bytes>;
}

/// Local-filesystem backend: mmaps whole-object reads, seeks for bounded
/// ranges.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRangeReader;

impl LocalRangeReader {
    fn open(&self, uri: &str) -> Result<File> {
        File::open(uri).map_err(|source| KerchunkError::TransportError {
            uri: uri.to_string(),
            source,
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn stat(&self, uri: &str) -> Result<u64> {
        let meta = std::fs::metadata(uri).map_err(|source| KerchunkError::TransportError {
            uri: uri.to_string(),
            source,
        })?;
        Ok(meta.len())
    }

    fn mtime(&self, uri: &str) -> Result<i64> {
        let meta = std::fs::metadata(uri).map_err(|source| KerchunkError::TransportError {
            uri: uri.to_string(),
            source,
        })?;
        let modified = meta.modified().map_err(|source| KerchunkError::TransportError {
            uri: uri.to_string(),
            source,
        })?;
        Ok(modified
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0))
    }

    fn read_range(&self, uri: &str, offset: u64, size: Option<u64>) -> Result<Bytes> {
        let file = self.open(uri)?;
        match size {
            None if offset == 0 => {
                // SAFETY: the file is not concurrently truncated by this
                // process; mmap is used read-only, matching the teacher's
                // `data::Dataset` mmap strategy.
                let mmap = unsafe { Mmap::map(&file) }.map_err(|source| {
                    KerchunkError::TransportError {
                        uri: uri.to_string(),
                        source,
                    }
                })?;
                Ok(Bytes::copy_from_slice(&mmap[..]))
            }
            None => {
                let mut file = file;
                file.seek(SeekFrom::Start(offset))
                    .map_err(|source| KerchunkError::TransportError {
                        uri: uri.to_string(),
                        source,
                    })?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)
                    .map_err(|source| KerchunkError::TransportError {
                        uri: uri.to_string(),
                        source,
                    })?;
                Ok(Bytes::from(buf))
            }
            Some(size) => {
                let mut file = file;
                file.seek(SeekFrom::Start(offset))
                    .map_err(|source| KerchunkError::TransportError {
                        uri: uri.to_string(),
                        source,
                    })?;
                let mut buf = vec![0u8; size as usize];
                file.read_exact(&mut buf)
                    .map_err(|source| KerchunkError::TransportError {
                        uri: uri.to_string(),
                        source,
                    })?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_whole_object_via_mmap() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        let reader = LocalRangeReader;
        let path = f.path().to_str().unwrap();
        let bytes = reader.read_range(path, 0, None).unwrap();
        assert_eq!(&bytes[..], b"hello world");
        assert_eq!(reader.stat(path).unwrap(), 11);
    }

    #[test]
    fn reads_bounded_range() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"0123456789").unwrap();
        let reader = LocalRangeReader;
        let path = f.path().to_str().unwrap();
        let bytes = reader.read_range(path, 3, Some(4)).unwrap();
        assert_eq!(&bytes[..], b"3456");
    }

    #[test]
    fn mtime_is_nonzero_for_a_freshly_written_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello").unwrap();
        let reader = LocalRangeReader;
        assert!(reader.mtime(f.path().to_str().unwrap()).unwrap() > 0);
    }

    #[test]
    fn missing_file_is_transport_error() {
        let reader = LocalRangeReader;
        assert!(matches!(
            reader.stat("/no/such/path-kerchunk-test"),
            Err(KerchunkError::TransportError { .. })
        ));
    }
}
