//! Pipeline controller
//!
//! Single-shot orchestrator for one invocation: preflight, dry-run or live
//! path, signal-driven shutdown. See SPEC_FULL.md §4.E.

use std::sync::Arc;

use crate::cli::Options;
use crate::conversion::driver;
use crate::conversion::pool::{self, PipelineSummary};
use crate::ledger::Ledger;
use crate::observer::PipelineObserver;
use crate::walker::{self, WalkEvent, WalkStats};

/// Validate the encoder binary and input root before anything else runs.
/// Fail-fast with a classified error if either is absent (§4.E step 1).
pub fn preflight(options: &Options) -> Result<(), String> {
    driver::verify_encoder(&options.encoder_settings.binary_path)?;

    if !options.input_root.is_dir() {
        return Err(format!(
            "input root {} is not a directory",
            options.input_root.display()
        ));
    }

    Ok(())
}

/// Drive the walker in a non-event, aggregating mode: consume every event
/// but only accumulate the terminal stats, touching neither the encoder nor
/// the ledger (§4.E step 2).
pub async fn run_dry(options: &Options) -> Result<WalkStats, String> {
    let ledger = Ledger::open(&options.input_root).await?;
    let mut rx = walker::spawn(
        options.input_root.clone(),
        options.recursive,
        options.scanners,
        ledger.clone(),
    );

    let mut stats = WalkStats::default();
    while let Some(event) = rx.recv().await {
        if let WalkEvent::Complete(s) = event {
            stats = s;
        }
    }

    ledger.close().await;
    Ok(stats)
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownRequest {
    Graceful,
    Immediate,
}

/// Live path: open the ledger, construct the pool, wire the walker's events
/// through it, and resolve once the pool's summary is ready. `shutdown` is
/// polled for graceful/immediate shutdown requests raised by the signal
/// handler running concurrently in `main`; once the walker's channel closes
/// (after its terminal `Complete` event) this simply awaits the pool.
pub async fn run_live(
    options: &Options,
    observer: Arc<dyn PipelineObserver>,
    mut shutdown: tokio::sync::mpsc::UnboundedReceiver<ShutdownRequest>,
) -> Result<PipelineSummary, String> {
    let ledger = Ledger::open(&options.input_root).await?;

    let (handle, mut summary_rx) = pool::spawn(
        options.concurrency,
        ledger.clone(),
        options.encoder_settings.clone(),
        observer.clone(),
        options.verbose,
    );

    let mut rx = walker::spawn(
        options.input_root.clone(),
        options.recursive,
        options.scanners,
        ledger.clone(),
    );

    let mut scanning = true;
    while scanning {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(WalkEvent::File(file)) => {
                        let mut job = crate::job::Job::new(file.path, file.target_path);
                        job.source_bytes = Some(file.size);
                        handle.add(job);
                    }
                    Some(WalkEvent::Directory(path)) => observer.on_directory(&path),
                    Some(WalkEvent::SkippedAudio(_)) | Some(WalkEvent::SkippedSubtitle(_)) => {}
                    Some(WalkEvent::Error { path, message }) => observer.on_walk_error(&path, &message),
                    Some(WalkEvent::Complete(stats)) => {
                        observer.on_scan_complete(&stats);
                        handle.mark_scan_complete();
                    }
                    None => scanning = false,
                }
            }
            Some(request) = shutdown.recv() => {
                match request {
                    ShutdownRequest::Graceful => handle.request_graceful_shutdown(),
                    ShutdownRequest::Immediate => handle.request_immediate_shutdown(),
                }
            }
        }
    }

    // The walker is done; keep honoring shutdown requests while draining
    // toward the pool's summary.
    let summary = loop {
        tokio::select! {
            summary = &mut summary_rx => {
                break summary.map_err(|_| "pool actor terminated without sending a summary".to_string());
            }
            Some(request) = shutdown.recv() => {
                match request {
                    ShutdownRequest::Graceful => handle.request_graceful_shutdown(),
                    ShutdownRequest::Immediate => handle.request_immediate_shutdown(),
                }
            }
        }
    }?;

    ledger.close().await;
    Ok(summary)
}

pub fn nothing_to_do_message(stats: &WalkStats) -> Option<&'static str> {
    if stats.to_process > 0 {
        return None;
    }
    if stats.total_found == 0 {
        Some("no candidate video files found")
    } else {
        Some("all candidate files already have completed companions")
    }
}
