//! End-to-end scenarios driving the public VFS API against on-disk fixtures.

use std::sync::Arc;

use kerchunk_vfs::cache::CacheManager;
use kerchunk_vfs::config::Config;
use kerchunk_vfs::error::KerchunkError;
use kerchunk_vfs::loader::JsonLoader;
use kerchunk_vfs::rangereader::LocalRangeReader;
use kerchunk_vfs::vfs::{JsonRefVfs, ParquetRefVfs};

fn write(dir: &std::path::Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn s1_v1_tiny_manifest_lists_and_opens_chunks() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "data.bin", &(0u8..32).collect::<Vec<u8>>());
    let manifest = write(
        dir.path(),
        "manifest.json",
        br#"{"version":1,"refs":{".zgroup":"{\"zarr_format\":2}",".zarray":"{\"shape\":[4],\"chunks\":[2]}","0":["data.bin",0,16],"1":["data.bin",16,16]}}"#,
    );

    let config = Config::default();
    let cache = CacheManager::new(config.clone());
    let reader = LocalRangeReader;
    let vfs = JsonRefVfs::new(&config, &cache, &reader);

    let store_path = format!("/vsikerchunk_json_ref/{}", manifest.to_str().unwrap());
    let mut entries = vfs.readdir(&store_path, None).unwrap();
    entries.sort();
    assert_eq!(entries, vec![".zarray", ".zgroup", "0", "1"]);

    let chunk_path = format!("{store_path}/0");
    let bytes = vfs.open(&chunk_path).unwrap();
    assert_eq!(&bytes[..], &(0u8..16).collect::<Vec<u8>>()[..]);
    assert_eq!(vfs.stat(&chunk_path).unwrap().size, 16);
}

#[test]
fn s2_base64_inline_entry_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write(
        dir.path(),
        "manifest.json",
        br#"{".zgroup": "{\"zarr_format\":2}", "k": "base64:SGVsbG8="}"#,
    );

    let config = Config::default();
    let cache = CacheManager::new(config.clone());
    let reader = LocalRangeReader;
    let vfs = JsonRefVfs::new(&config, &cache, &reader);

    let path = format!("/vsikerchunk_json_ref/{}/k", manifest.to_str().unwrap());
    let bytes = vfs.open(&path).unwrap();
    assert_eq!(&bytes[..], b"Hello");
}

#[test]
fn s3_whole_object_reference_reports_full_size() {
    let dir = tempfile::tempdir().unwrap();
    let blob = write(dir.path(), "all.bin", b"the entire contents of the blob");
    let manifest_content = format!(
        r#"{{".zgroup": "{{\"zarr_format\":2}}", "k": ["{}"]}}"#,
        blob.to_str().unwrap().replace('\\', "\\\\")
    );
    let manifest = write(dir.path(), "manifest.json", manifest_content.as_bytes());

    let config = Config::default();
    let cache = CacheManager::new(config.clone());
    let reader = LocalRangeReader;
    let vfs = JsonRefVfs::new(&config, &cache, &reader);

    let path = format!("/vsikerchunk_json_ref/{}/k", manifest.to_str().unwrap());
    let stat = vfs.stat(&path).unwrap();
    assert_eq!(stat.size, b"the entire contents of the blob".len() as u64);

    let bytes = vfs.open(&path).unwrap();
    assert_eq!(&bytes[..], b"the entire contents of the blob");
}

#[test]
fn s4_scalar_array_resolves_to_linear_index_zero() {
    let dir = tempfile::tempdir().unwrap();
    let blob = write(dir.path(), "scalar.bin", b"42.0000");
    let manifest_content = format!(
        r#"{{".zgroup": "{{\"zarr_format\":2}}", "a/.zarray": "{{\"shape\":[],\"chunks\":[]}}", "a/0": ["{}", 0, 7]}}"#,
        blob.to_str().unwrap().replace('\\', "\\\\")
    );
    let manifest = write(dir.path(), "manifest.json", manifest_content.as_bytes());
    let cache_dir = dir.path().join("parquet_cache");

    let config = Config::default();
    let cache = CacheManager::new(config.clone());
    let reader = LocalRangeReader;
    let loader = JsonLoader::new(&config, &cache, &reader);
    loader
        .load_with_parquet_cache(manifest.to_str().unwrap(), false, &cache_dir)
        .unwrap();

    let vfs = ParquetRefVfs::new(&config, &cache, &reader);
    let path = format!("{{{}}}/a/0", cache_dir.to_str().unwrap());
    let bytes = vfs.open(&path).unwrap();
    assert_eq!(&bytes[..], b"42.0000");
}

#[test]
fn s5_unsupported_feature_is_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write(
        dir.path(),
        "manifest.json",
        br#"{"version":1,"templates":{"a":"b"},"refs":{".zgroup":"x"}}"#,
    );

    let config = Config::default();
    let cache = CacheManager::new(config.clone());
    let reader = LocalRangeReader;
    let loader = JsonLoader::new(&config, &cache, &reader);

    for _ in 0..2 {
        let err = loader.load(manifest.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, KerchunkError::UnsupportedFeature(_)));
    }
}

#[test]
fn s6_concurrent_build_is_reused_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let blob = write(dir.path(), "data.bin", &(0u8..16).collect::<Vec<u8>>());
    let manifest_content = format!(
        r#"{{".zgroup": "{{\"zarr_format\":2}}", "a/.zarray": "{{\"shape\":[4],\"chunks\":[2]}}", "a/0": ["{}", 0, 8], "a/1": ["{}", 8, 8]}}"#,
        blob.to_str().unwrap().replace('\\', "\\\\"),
        blob.to_str().unwrap().replace('\\', "\\\\"),
    );
    let manifest = Arc::new(write(dir.path(), "manifest.json", manifest_content.as_bytes()));
    let cache_dir = Arc::new(dir.path().join("parquet_cache"));

    let config = Arc::new(Config::default());
    let cache = Arc::new(CacheManager::new((*config).clone()));

    // First caller performs the build-once conversion and warms the cache.
    {
        let reader = LocalRangeReader;
        let loader = JsonLoader::new(&config, &cache, &reader);
        loader
            .load_with_parquet_cache(manifest.to_str().unwrap(), false, &cache_dir)
            .unwrap();
    }
    assert!(cache_dir.join(".zmetadata").exists());

    // Further cooperating callers (here: concurrent threads standing in for
    // concurrent processes) must check `.lock`/`.zmetadata` again, find the
    // store already built, and reuse the cached metadata rather than
    // re-converting.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manifest = Arc::clone(&manifest);
            let cache_dir = Arc::clone(&cache_dir);
            let config = Arc::clone(&config);
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let reader = LocalRangeReader;
                let loader = JsonLoader::new(&config, &cache, &reader);
                loader
                    .load_with_parquet_cache(manifest.to_str().unwrap(), false, &cache_dir)
                    .unwrap()
            })
        })
        .collect();

    let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for s in &stores[1..] {
        assert!(Arc::ptr_eq(&stores[0], s));
    }
}

#[test]
fn s7_malformed_array_arity_rejects_whole_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write(
        dir.path(),
        "manifest.json",
        br#"{".zgroup": "x", "k": ["u", 1]}"#,
    );

    let config = Config::default();
    let cache = CacheManager::new(config.clone());
    let reader = LocalRangeReader;
    let loader = JsonLoader::new(&config, &cache, &reader);

    let err = loader.load(manifest.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, KerchunkError::BadRefArray { .. }));
}
