//! Job identity and lifecycle record
//!
//! A `Job` is created once the walker has decided a file needs conversion and
//! is consumed entirely within a single invocation: ids are minted from a
//! process-wide counter and are never persisted (the Ledger is keyed by
//! `source_path`, not by job id).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic, process-local job identifier.
pub type JobId = u64;

fn next_job_id() -> JobId {
    NEXT_JOB_ID.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Classified reason a job failed, used both for the human-readable
/// `error_text` stored in the Ledger and for tests that assert on the
/// specific failure kind rather than its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderErrorKind {
    InputNotFound,
    PermissionDenied,
    InvalidInput,
    DiskFull,
    CodecUnavailable,
    ExitCode(i32),
    SpawnFailed(String),
}

impl EncoderErrorKind {
    /// Classify a non-zero exit by substring-matching the encoder's
    /// captured diagnostic output, in the priority order the spec mandates.
    pub fn classify(stderr: &str, exit_code: Option<i32>) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("no such file or directory") {
            EncoderErrorKind::InputNotFound
        } else if lower.contains("permission denied") {
            EncoderErrorKind::PermissionDenied
        } else if lower.contains("invalid data found") {
            EncoderErrorKind::InvalidInput
        } else if lower.contains("no space left on device") {
            EncoderErrorKind::DiskFull
        } else if lower.contains("unknown encoder") {
            EncoderErrorKind::CodecUnavailable
        } else {
            EncoderErrorKind::ExitCode(exit_code.unwrap_or(-1))
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            EncoderErrorKind::InputNotFound => "input_not_found".to_string(),
            EncoderErrorKind::PermissionDenied => "permission_denied".to_string(),
            EncoderErrorKind::InvalidInput => "invalid_input".to_string(),
            EncoderErrorKind::DiskFull => "disk_full".to_string(),
            EncoderErrorKind::CodecUnavailable => "codec_unavailable".to_string(),
            EncoderErrorKind::ExitCode(code) => format!("encoder_exit_{code}"),
            EncoderErrorKind::SpawnFailed(message) => format!("failed to spawn encoder: {message}"),
        }
    }
}

/// Immutable identity plus mutable lifecycle record for one conversion attempt.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub source_bytes: Option<u64>,
    pub state: JobState,
    pub percent: u8,
    pub duration_s: Option<f64>,
    pub current_time_s: Option<f64>,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub error_text: Option<String>,
    pub output_bytes: Option<u64>,
}

impl Job {
    pub fn new(source_path: impl Into<PathBuf>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            id: next_job_id(),
            source_path: source_path.into(),
            target_path: target_path.into(),
            source_bytes: None,
            state: JobState::Pending,
            percent: 0,
            duration_s: None,
            current_time_s: None,
            start_time: None,
            end_time: None,
            error_text: None,
            output_bytes: None,
        }
    }

    pub fn source_name(&self) -> &str {
        self.source_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
    }

    /// Record progress, clamping to `[0, 100]` and enforcing monotonicity
    /// within this job's run (§8 invariant 7). A regressed report is
    /// silently dropped rather than propagated as an error: the encoder's
    /// own output stream is the only source of these values and a single
    /// out-of-order chunk should not fail the job.
    pub fn apply_progress(&mut self, percent: u8, current_time_s: f64) {
        let clamped = percent.min(100);
        if clamped >= self.percent {
            self.percent = clamped;
        }
        self.current_time_s = Some(current_time_s);
    }

    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.start_time = Some(Instant::now());
    }

    pub fn mark_completed(&mut self, output_bytes: u64) {
        self.state = JobState::Completed;
        self.percent = 100;
        self.output_bytes = Some(output_bytes);
        self.error_text = None;
        self.end_time = Some(Instant::now());
    }

    pub fn mark_failed(&mut self, error_text: String) {
        self.state = JobState::Failed;
        self.error_text = Some(error_text);
        self.end_time = Some(Instant::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.end_time = Some(Instant::now());
    }
}

/// Derive the target MP3 path for a source video: same directory, same
/// basename, `.mp3` extension.
pub fn derive_target_path(source: &Path) -> PathBuf {
    source.with_extension("mp3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_monotonic() {
        let a = Job::new("/a.mp4", "/a.mp3");
        let b = Job::new("/b.mp4", "/b.mp3");
        assert!(b.id > a.id);
    }

    #[test]
    fn progress_clamps_and_is_monotonic() {
        let mut job = Job::new("/a.mp4", "/a.mp3");
        job.apply_progress(40, 4.0);
        assert_eq!(job.percent, 40);
        job.apply_progress(10, 5.0); // regression ignored
        assert_eq!(job.percent, 40);
        job.apply_progress(250, 6.0); // clamped
        assert_eq!(job.percent, 100);
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn classify_error_priority_order() {
        assert_eq!(
            EncoderErrorKind::classify("No such file or directory", Some(1)),
            EncoderErrorKind::InputNotFound
        );
        assert_eq!(
            EncoderErrorKind::classify("Permission denied", Some(1)),
            EncoderErrorKind::PermissionDenied
        );
        assert_eq!(
            EncoderErrorKind::classify("Invalid data found when processing input", Some(1)),
            EncoderErrorKind::InvalidInput
        );
        assert_eq!(
            EncoderErrorKind::classify("No space left on device", Some(1)),
            EncoderErrorKind::DiskFull
        );
        assert_eq!(
            EncoderErrorKind::classify("Unknown encoder 'libmp3lame'", Some(1)),
            EncoderErrorKind::CodecUnavailable
        );
        assert_eq!(
            EncoderErrorKind::classify("some other failure", Some(7)),
            EncoderErrorKind::ExitCode(7)
        );
    }

    #[test]
    fn derive_target_path_swaps_extension() {
        assert_eq!(
            derive_target_path(Path::new("/root/movie.mkv")),
            PathBuf::from("/root/movie.mp3")
        );
    }
}
