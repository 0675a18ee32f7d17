//! ffmpeg-batch-driver: bounded-concurrency batch transcoder
//!
//! Walks an input root for recognized video files, dispatches a bounded pool
//! of ffmpeg child processes to transcode each into a speech-optimized MP3,
//! and records every attempt in a durable per-directory ledger. See
//! SPEC_FULL.md for the full design.

mod cli;
mod conversion;
mod job;
mod ledger;
mod logging;
#[cfg(test)]
mod mock_encoder;
mod observer;
mod pipeline;
mod verify;
mod walker;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use cli::{Cli, Options};
use ledger::Ledger;
use observer::LoggingObserver;
use pipeline::ShutdownRequest;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // §4.E scopes encoder preflight to the live/dry-run path only: `--verify`
    // and `--cleanup` are read-only ledger utilities and must work even when
    // `ffmpeg` can't be resolved (e.g. cleaning up a library on a machine
    // that never had the encoder installed).
    if cli.verify || cli.cleanup {
        logging::init_logging(&cli.input, cli.verbose);
        let code = if cli.verify {
            run_verify(&cli.input).await
        } else {
            run_cleanup(&cli.input, cli.dry_run).await
        };
        std::process::exit(code);
    }

    let encoder_binary = match conversion::driver::resolve_encoder_path(
        cli.encoder_path.as_deref(),
        "ffmpeg",
    ) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let options = Options::from_cli(cli, encoder_binary);
    logging::init_logging(&options.input_root, options.verbose);

    std::process::exit(run(&options).await);
}

async fn run(options: &Options) -> i32 {
    if let Err(e) = pipeline::preflight(options) {
        log::error!("preflight failed: {e}");
        eprintln!("error: {e}");
        return 1;
    }

    if options.dry_run {
        return run_dry(options).await;
    }

    run_live(options).await
}

async fn run_verify(input_root: &Path) -> i32 {
    let ledger = match Ledger::open(input_root).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let report = match verify::report(&ledger).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            ledger.close().await;
            return 1;
        }
    };

    println!("processing ({}):", report.processing.len());
    for rec in &report.processing {
        println!(
            "  {} -> {} (started {})",
            rec.source_path.display(),
            rec.target_path.display(),
            rec.started_at
        );
    }
    println!("failed ({}):", report.failed.len());
    for rec in &report.failed {
        println!(
            "  {} -> {} ({})",
            rec.source_path.display(),
            rec.target_path.display(),
            rec.error.as_deref().unwrap_or("unknown error")
        );
    }

    ledger.close().await;
    0
}

async fn run_cleanup(input_root: &Path, dry_run: bool) -> i32 {
    let ledger = match Ledger::open(input_root).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let outcome = match verify::cleanup(&ledger, dry_run).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            ledger.close().await;
            return 1;
        }
    };

    if dry_run {
        println!(
            "would remove {} ledger record(s), would delete {} target file(s)",
            outcome.records_removed, outcome.files_deleted
        );
    } else {
        println!(
            "removed {} ledger record(s), deleted {} target file(s)",
            outcome.records_removed, outcome.files_deleted
        );
    }

    ledger.close().await;
    0
}

async fn run_dry(options: &Options) -> i32 {
    let stats = match pipeline::run_dry(options).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("scan failed: {e}");
            eprintln!("error: {e}");
            return 1;
        }
    };

    println!(
        "found {} candidate(s), {} to process, {} skipped (audio), {} skipped (subtitle), {} error(s)",
        stats.total_found, stats.to_process, stats.skipped_audio, stats.skipped_subtitle, stats.errors
    );
    if let Some(msg) = pipeline::nothing_to_do_message(&stats) {
        println!("{msg}");
    }

    0
}

async fn run_live(options: &Options) -> i32 {
    let observer = Arc::new(LoggingObserver);
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

    tokio::spawn(signal_watcher(shutdown_tx));

    match pipeline::run_live(options, observer, shutdown_rx).await {
        Ok(summary) => {
            println!(
                "done: {} added, {} completed, {} failed, {} cancelled, {} bytes written in {:.1}s",
                summary.total_added,
                summary.completed,
                summary.failed,
                summary.cancelled,
                summary.total_output_bytes,
                summary.total_time.as_secs_f64()
            );
            if summary.total_added == 0 {
                println!("nothing to do: no candidate files needed conversion");
            }
            0
        }
        Err(e) => {
            log::error!("pipeline failed: {e}");
            eprintln!("error: {e}");
            1
        }
    }
}

/// Waits for the next control signal: `SIGINT` on every platform, plus
/// `SIGTERM` on Unix (§6). Falls back to `ctrl_c()`-only if the `SIGTERM`
/// handler cannot be installed.
async fn next_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Watches for control signals and translates them into the two-level
/// shutdown protocol (§5/§6): the first signal requests a graceful drain,
/// the second requests an immediate abort.
async fn signal_watcher(shutdown_tx: mpsc::UnboundedSender<ShutdownRequest>) {
    next_signal().await;
    log::info!("received interrupt: requesting graceful shutdown");
    let _ = shutdown_tx.send(ShutdownRequest::Graceful);

    next_signal().await;
    log::info!("received second interrupt: requesting immediate shutdown");
    let _ = shutdown_tx.send(ShutdownRequest::Immediate);
}
