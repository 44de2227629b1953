//! kerchunk-vfs — a read-only virtual filesystem over Kerchunk chunk
//! reference manifests (JSON or sharded Parquet), for driving a chunked-array
//! reader without materializing the referenced blobs.

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod json;
pub mod loader;
pub mod parquet_reader;
pub mod parquet_writer;
pub mod parser;
pub mod rangereader;
pub mod uri;
pub mod vfs;
pub mod zarr;

pub use config::Config;
pub use error::{KerchunkError, Result};
