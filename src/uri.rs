//! Morphs a URI stored in a reference manifest into a path the configured
//! `RangeReader` can open, applying the local-access security policy.

use crate::config::Config;
use crate::error::{KerchunkError, Result};

fn has_scheme(uri: &str) -> bool {
    uri.contains("://")
}

fn is_absolute_local_path(uri: &str) -> bool {
    if has_scheme(uri) {
        return false;
    }
    uri.starts_with('/')
        || (uri.len() >= 2 && uri.as_bytes()[1] == b':' && uri.as_bytes()[0].is_ascii_alphabetic())
}

/// Resolves manifest-stored URIs relative to the store's own location.
pub struct UriResolver<'a> {
    /// Directory the `.json`/`.zmetadata` store itself lives in.
    root_dirname: &'a str,
    /// Whether the store itself was opened from a remote (networked) URI.
    root_is_remote: bool,
}

impl<'a> UriResolver<'a> {
    pub fn new(root_dirname: &'a str, root_is_remote: bool) -> Self {
        Self {
            root_dirname,
            root_is_remote,
        }
    }

    pub fn resolve(&self, uri: &str, config: &Config) -> Result<String> {
        if uri.is_empty() {
            return Err(KerchunkError::BadPath("empty referenced URI".to_string()));
        }

        if has_scheme(uri) {
            return Ok(uri.to_string());
        }

        if is_absolute_local_path(uri) {
            if self.root_is_remote && !config.allow_remote_to_access_local {
                return Err(KerchunkError::AccessDenied(format!(
                    "refusing to let a remote store reference local path {uri}"
                )));
            }
            return Ok(uri.to_string());
        }

        // Relative path: resolve against the store's own directory.
        if self.root_dirname.is_empty() {
            Ok(uri.to_string())
        } else {
            Ok(format!("{}/{}", self.root_dirname.trim_end_matches('/'), uri))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_uris_with_a_scheme() {
        let resolver = UriResolver::new("/data/store", false);
        let cfg = Config::default();
        assert_eq!(
            resolver.resolve("s3://bucket/blob.nc", &cfg).unwrap(),
            "s3://bucket/blob.nc"
        );
    }

    #[test]
    fn joins_relative_uri_to_root_dirname() {
        let resolver = UriResolver::new("/data/store", false);
        let cfg = Config::default();
        assert_eq!(
            resolver.resolve("blob.nc", &cfg).unwrap(),
            "/data/store/blob.nc"
        );
    }

    #[test]
    fn denies_remote_store_referencing_local_path_by_default() {
        let resolver = UriResolver::new("http://example.com/store", true);
        let cfg = Config::default();
        assert!(matches!(
            resolver.resolve("/etc/passwd", &cfg),
            Err(KerchunkError::AccessDenied(_))
        ));
    }

    #[test]
    fn allows_remote_to_local_when_configured() {
        let resolver = UriResolver::new("http://example.com/store", true);
        let mut cfg = Config::default();
        cfg.allow_remote_to_access_local = true;
        assert_eq!(
            resolver.resolve("/data/blob.nc", &cfg).unwrap(),
            "/data/blob.nc"
        );
    }
}
