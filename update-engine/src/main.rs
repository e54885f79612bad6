//! Version Writer - publishes a build for update mirrors
//!
//! Hashes every file of a build directory, optionally compresses it, and
//! writes the mirror layout together with its `ServerVersion` manifest.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use update_engine::codec::ZstdCodec;
use update_engine::manifest::VersionInfo;
use update_engine::publish::{publish_build, PublishOptions};
use update_engine::transfer::format_bytes;
use update_engine::utils;

#[derive(Parser, Debug)]
#[command(name = "version-writer", author, version, about, long_about = None)]
struct Args {
    /// Build directory to publish
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    source: PathBuf,

    /// Output directory served by the mirrors
    #[arg(short, long, value_name = "DIR", default_value = "Updates")]
    output: PathBuf,

    /// Internal version number of the build
    #[arg(long)]
    version_number: i32,

    /// Version shown to users
    #[arg(long)]
    display: Option<String>,

    /// Compress files that shrink when compressed
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    compress: bool,

    /// Files smaller than this are never compressed
    #[arg(long, default_value_t = 4096)]
    min_compress_size: u64,

    /// Additional file names to leave out (repeatable)
    #[arg(long = "exclude", value_name = "NAME")]
    exclude: Vec<String>,

    /// zstd compression level
    #[arg(long, default_value_t = 19)]
    level: i32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    utils::logger::init(&args.log_level)?;

    let output = if args.output.is_absolute() {
        args.output.clone()
    } else {
        args.source.join(&args.output)
    };

    let display_version = args
        .display
        .clone()
        .unwrap_or_else(|| args.version_number.to_string());

    let options = PublishOptions {
        compress: args.compress,
        min_compress_size: args.min_compress_size,
        exclude_names: args.exclude.clone(),
    };

    tracing::info!(
        "Publishing {} as version {} ({}) into {}",
        args.source.display(),
        args.version_number,
        display_version,
        output.display()
    );

    let report = publish_build(
        &args.source,
        &output,
        VersionInfo::new(args.version_number, display_version),
        &options,
        &ZstdCodec::new(args.level),
    )
    .with_context(|| format!("Failed to publish {}", args.source.display()))?;

    let total: u64 = report.manifest.files.iter().map(|f| f.download_size()).sum();
    tracing::info!(
        "Published {} files ({} compressed, {} copied, {} leftovers removed), {} to download",
        report.manifest.files.len(),
        report.compressed,
        report.copied,
        report.removed,
        format_bytes(total)
    );

    Ok(())
}
