//! Pipeline observer trait
//!
//! The terminal UI (or any other presentation layer) is a pure observer of
//! pipeline events; it is explicitly out of scope for the core (SPEC_FULL.md
//! §1), but the core must dispatch through *some* fixed interface. This
//! trait is that interface, with every method defaulting to a no-op so a
//! concrete observer only implements the events it cares about — mirroring
//! how the teacher crate's `EncoderEvent` enum is matched selectively by its
//! UI layer rather than exhaustively by every consumer.

use std::path::Path;

use crate::conversion::pool::{PipelineSummary, PipelineStateSnapshot};
use crate::job::{Job, JobId};
use crate::walker::WalkStats;

pub trait PipelineObserver: Send + Sync {
    fn on_file_added(&self, _job: &Job) {}
    fn on_job_start(&self, _job: &Job) {}
    fn on_job_progress(&self, _job_id: JobId, _percent: u8, _current_time_s: f64) {}
    fn on_job_complete(&self, _job: &Job) {}
    fn on_scan_complete(&self, _stats: &WalkStats) {}
    fn on_queue_complete(&self, _summary: &PipelineSummary) {}
    fn on_state_change(&self, _snapshot: &PipelineStateSnapshot) {}
    fn on_directory(&self, _path: &Path) {}
    fn on_walk_error(&self, _path: &Path, _message: &str) {}
}

/// Default observer: renders every event as a single log line through the
/// `log` facade, the way the teacher crate narrates burn/encode stages with
/// `log::info!`/`log::error!` rather than a bespoke event bus.
pub struct LoggingObserver;

impl PipelineObserver for LoggingObserver {
    fn on_file_added(&self, job: &Job) {
        log::debug!("queued {}", job.source_path.display());
    }

    fn on_job_start(&self, job: &Job) {
        log::info!("start  {}", job.source_path.display());
    }

    fn on_job_progress(&self, job_id: JobId, percent: u8, current_time_s: f64) {
        log::debug!("job {job_id} progress {percent}% ({current_time_s:.1}s)");
    }

    fn on_job_complete(&self, job: &Job) {
        match &job.error_text {
            None => log::info!(
                "done   {} ({} bytes)",
                job.source_path.display(),
                job.output_bytes.unwrap_or(0)
            ),
            Some(err) => log::warn!("failed {} ({err})", job.source_path.display()),
        }
    }

    fn on_scan_complete(&self, stats: &WalkStats) {
        log::info!(
            "scan complete: {} found, {} to process, {} skipped (audio), {} skipped (subtitle), {} errors",
            stats.total_found,
            stats.to_process,
            stats.skipped_audio,
            stats.skipped_subtitle,
            stats.errors
        );
    }

    fn on_queue_complete(&self, summary: &PipelineSummary) {
        log::info!(
            "queue complete: {} added, {} completed, {} failed, {} cancelled, {} bytes written in {:.1}s",
            summary.total_added,
            summary.completed,
            summary.failed,
            summary.cancelled,
            summary.total_output_bytes,
            summary.total_time.as_secs_f64()
        );
    }

    fn on_state_change(&self, _snapshot: &PipelineStateSnapshot) {}

    fn on_directory(&self, path: &Path) {
        log::debug!("entering {}", path.display());
    }

    fn on_walk_error(&self, path: &Path, message: &str) {
        log::warn!("walk error at {}: {message}", path.display());
    }
}
