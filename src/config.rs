//! Runtime configuration shared across the loader, caches, and VFS layers.

use std::collections::HashSet;
use std::path::PathBuf;

/// Controls which JSON-ref manifest parser is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    /// Probe the first ~1KB and decide (the default).
    Auto,
    /// Always use the streaming (bounded-memory) parser.
    Force,
    /// Always buffer the whole document and use `serde_json::Value`.
    Disable,
}

impl StreamingMode {
    fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => StreamingMode::Auto,
            "YES" | "TRUE" | "1" | "ON" => StreamingMode::Force,
            "NO" | "FALSE" | "0" | "OFF" => StreamingMode::Disable,
            _ => StreamingMode::Auto,
        }
    }
}

/// Default cap on a JSON manifest's size before it is rejected outright.
pub const DEFAULT_JSON_MAX_SIZE: u64 = 512 * 1024 * 1024;

/// Options governing parser selection, caching, and security policy.
#[derive(Debug, Clone)]
pub struct Config {
    pub use_streaming_parser: StreamingMode,
    pub use_cache: bool,
    pub cache_dir: Option<PathBuf>,
    pub allow_remote_to_access_local: bool,
    pub json_max_size: u64,
    /// Named test-only behavior hooks (`SHORT_DELAY_STALLED_LOCK`,
    /// `WAIT_BEFORE_CONVERT_TO_PARQUET_REF`, ...).
    pub for_tests: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_streaming_parser: StreamingMode::Auto,
            use_cache: false,
            cache_dir: None,
            allow_remote_to_access_local: false,
            json_max_size: DEFAULT_JSON_MAX_SIZE,
            for_tests: HashSet::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("KERCHUNK_USE_STREAMING_PARSER") {
            cfg.use_streaming_parser = StreamingMode::from_str(&v);
        }
        if let Ok(v) = std::env::var("KERCHUNK_USE_CACHE") {
            cfg.use_cache = !matches!(v.trim(), "0" | "NO" | "no" | "false" | "FALSE");
        }
        if let Ok(v) = std::env::var("KERCHUNK_CACHE_DIR") {
            cfg.cache_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("KERCHUNK_ALLOW_REMOTE_TO_ACCESS_LOCAL") {
            cfg.allow_remote_to_access_local =
                matches!(v.trim(), "1" | "YES" | "yes" | "true" | "TRUE");
        }
        if let Ok(v) = std::env::var("KERCHUNK_JSON_MAX_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.json_max_size = n;
            }
        }
        if let Ok(v) = std::env::var("KERCHUNK_FOR_TESTS") {
            cfg.for_tests = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        cfg
    }

    pub fn has_test_hook(&self, name: &str) -> bool {
        self.for_tests.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_auto_streaming_with_cache_off() {
        let cfg = Config::default();
        assert_eq!(cfg.use_streaming_parser, StreamingMode::Auto);
        assert!(!cfg.use_cache);
        assert!(!cfg.allow_remote_to_access_local);
    }

    #[test]
    fn streaming_mode_parses_common_spellings() {
        assert_eq!(StreamingMode::from_str("auto"), StreamingMode::Auto);
        assert_eq!(StreamingMode::from_str("YES"), StreamingMode::Force);
        assert_eq!(StreamingMode::from_str("off"), StreamingMode::Disable);
        assert_eq!(StreamingMode::from_str("garbage"), StreamingMode::Auto);
    }
}
