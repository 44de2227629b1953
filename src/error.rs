//! Typed error kinds for the Kerchunk virtual filesystem core.

use thiserror::Error;

/// Every failure mode the public API can surface.
///
/// Each variant corresponds to one row of the error-kinds table: callers
/// that need to react differently to, say, a bad manifest versus a denied
/// path can match on the variant instead of parsing a message string.
#[derive(Debug, Error)]
pub enum KerchunkError {
    #[error("bad path: {0}")]
    BadPath(String),

    #[error("bad manifest: {0}")]
    BadManifest(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("bad base64 content for key {key}: {reason}")]
    BadBase64 { key: String, reason: String },

    #[error("bad reference array for key {key}: {reason}")]
    BadRefArray { key: String, reason: String },

    #[error("array too large: {0}")]
    ArrayTooLarge(String),

    #[error("referenced blob too large: {0}")]
    BlobTooLarge(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("cache build failed: {0}")]
    CacheBuildFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("transport error for {uri}: {source}")]
    TransportError {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KerchunkError>;
