//! Command-line surface
//!
//! Parsed once with `clap`'s derive API and clamped/validated immediately
//! after, per SPEC_FULL.md §6. The resulting `Options` is immutable for the
//! rest of the invocation.

use std::path::PathBuf;

use clap::Parser;

use crate::conversion::EncoderSettings;

#[derive(Parser, Debug)]
#[command(
    name = "ffmpeg-batch-driver",
    about = "Bounded-concurrency batch transcoder: walks a directory, dispatches an ffmpeg pool, and tracks progress in a durable ledger"
)]
pub struct Cli {
    /// Input root directory to scan for video files
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Recurse into subdirectories
    #[arg(short = 'r', long = "recursive")]
    pub recursive: bool,

    /// Worker pool size (clamped to [1, 25])
    #[arg(short = 'c', long = "concurrency", default_value_t = 10)]
    pub concurrency: u32,

    /// Walker directory concurrency (clamped to [1, 20])
    #[arg(short = 's', long = "scanners", default_value_t = 5)]
    pub scanners: u32,

    /// Scan only; print classification totals and exit without encoding
    #[arg(short = 'd', long = "dry-run")]
    pub dry_run: bool,

    /// Forward the encoder's diagnostic stream to stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Read-only ledger report of processing/failed records
    #[arg(long = "verify")]
    pub verify: bool,

    /// Delete target files of processing/failed records and drop those records
    #[arg(long = "cleanup")]
    pub cleanup: bool,

    /// Path to the ffmpeg binary (defaults to resolving "ffmpeg" on PATH)
    #[arg(long = "encoder-path")]
    pub encoder_path: Option<PathBuf>,
}

/// Immutable, validated configuration for one invocation. Constructed once
/// from `Cli` by clamping the ranges the spec fixes for concurrency.
#[derive(Debug, Clone)]
pub struct Options {
    pub input_root: PathBuf,
    pub recursive: bool,
    pub concurrency: usize,
    pub scanners: usize,
    pub dry_run: bool,
    pub verbose: bool,
    pub verify: bool,
    pub cleanup: bool,
    pub encoder_settings: EncoderSettings,
}

impl Options {
    pub fn from_cli(cli: Cli, encoder_binary: PathBuf) -> Self {
        Self {
            input_root: cli.input,
            recursive: cli.recursive,
            concurrency: (cli.concurrency as usize).clamp(1, 25),
            scanners: (cli.scanners as usize).clamp(1, 20),
            dry_run: cli.dry_run,
            verbose: cli.verbose,
            verify: cli.verify,
            cleanup: cli.cleanup,
            encoder_settings: EncoderSettings::with_binary(encoder_binary),
        }
    }
}
