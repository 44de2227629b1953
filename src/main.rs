//! CLI front-end for kerchunk-vfs: the `convert-json-to-parquet` subcommand
//! that promotes a JSON reference manifest into a sharded Parquet reference
//! store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use kerchunk_vfs::config::Config;
use kerchunk_vfs::entry::RefFile;
use kerchunk_vfs::parquet_writer;
use kerchunk_vfs::rangereader::{LocalRangeReader, RangeReader};

/// kerchunk-vfs — inspect and convert Kerchunk chunk reference manifests
#[derive(FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    ConvertJsonToParquet(ConvertJsonToParquet),
}

/// convert a JSON reference manifest into a sharded Parquet reference store
#[derive(FromArgs)]
#[argh(subcommand, name = "convert-json-to-parquet")]
struct ConvertJsonToParquet {
    /// path to the source `.json` reference manifest
    #[argh(positional)]
    src: String,

    /// destination directory for the Parquet reference store
    #[argh(positional)]
    dst: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Args = argh::from_env();
    match args.command {
        Command::ConvertJsonToParquet(cmd) => run_convert(cmd),
    }
}

fn run_convert(cmd: ConvertJsonToParquet) -> Result<()> {
    let config = Config::from_env();
    let range_reader = LocalRangeReader;

    eprintln!("Reading manifest {}...", cmd.src);
    let size = range_reader
        .stat(&cmd.src)
        .with_context(|| format!("failed to stat {}", cmd.src))?;
    if size > config.json_max_size {
        anyhow::bail!(
            "{} is {} bytes, exceeding the configured max of {}",
            cmd.src,
            size,
            config.json_max_size
        );
    }
    let bytes = range_reader
        .read_range(&cmd.src, 0, None)
        .with_context(|| format!("failed to read {}", cmd.src))?;

    let refs: RefFile = if kerchunk_vfs::parser::is_likely_streamable(&bytes) {
        kerchunk_vfs::parser::parse_streaming(std::io::Cursor::new(bytes))
            .with_context(|| format!("failed to parse {}", cmd.src))?
    } else {
        kerchunk_vfs::parser::parse_buffered_bytes(&bytes)
            .with_context(|| format!("failed to parse {}", cmd.src))?
    };
    eprintln!("Loaded {} reference entries", refs.len());

    eprintln!("Converting to {}...", cmd.dst.display());
    let mut last_reported = 0u8;
    let mut progress = |frac: f64| {
        let pct = (frac * 100.0) as u8;
        if pct >= last_reported + 10 || pct == 100 {
            eprintln!("  {pct}%");
            last_reported = pct;
        }
        true
    };
    parquet_writer::convert(&refs, &cmd.dst, Some(&mut progress))
        .with_context(|| format!("failed to convert into {}", cmd.dst.display()))?;

    eprintln!("Done: wrote parquet reference store to {}", cmd.dst.display());
    Ok(())
}
