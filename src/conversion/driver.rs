//! One encoder child process per job: spawn, stream-parse progress, classify
//! failures, and cooperate with external kill requests.
//!
//! Grounded on the teacher's `conversion/simple_encoder.rs` (PID registry +
//! kill-on-request) generalized from a single synchronous child to many
//! concurrently supervised `tokio::process::Child`ren, and on the
//! progress/duration line parsing used for the same problem elsewhere in the
//! ffmpeg-wrapping code this project draws on (token-oriented, not regex).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::job::{EncoderErrorKind, JobId};

use super::EncoderSettings;

/// Live children, keyed by job id, so `kill_all` can reach every running
/// process without the pool having to plumb handles through. Entries here
/// exactly mirror the pool's `active` set (SPEC_FULL.md §9).
static RUNNING_CHILDREN: Lazy<Mutex<HashMap<JobId, Child>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Target paths for jobs currently running, so an immediate shutdown can
/// delete partial output even though the driver that owns the `Job` value
/// has already moved on to awaiting the child.
static RUNNING_TARGETS: Lazy<Mutex<HashMap<JobId, PathBuf>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Job ids whose child was killed through `kill`/`kill_all`, so `run`'s
/// supervisor task knows to leave the ledger's `processing` record alone
/// (§7: jobs terminated by the shutdown/cancel path are `cancelled`, not
/// `failed` or `completed`) rather than overwrite it with whatever the
/// killed child's exit happened to look like. Consumed (removed) the first
/// time it's checked for a given job id.
static KILLED_JOBS: Lazy<Mutex<HashSet<JobId>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn register(job_id: JobId, child: Child, target: PathBuf) {
    RUNNING_CHILDREN.lock().unwrap().insert(job_id, child);
    RUNNING_TARGETS.lock().unwrap().insert(job_id, target);
}

fn deregister(job_id: JobId) {
    RUNNING_CHILDREN.lock().unwrap().remove(&job_id);
    RUNNING_TARGETS.lock().unwrap().remove(&job_id);
}

/// Signal a specific child for orderly termination (`SIGTERM` on Unix).
/// Returns whether a child was found — a missing entry is not an error,
/// since the child may have exited on its own in the same instant
/// (SPEC_FULL.md §9 races).
pub fn kill(job_id: JobId) -> bool {
    let mut children = RUNNING_CHILDREN.lock().unwrap();
    if let Some(child) = children.get_mut(&job_id) {
        signal_child(child, false);
        drop(children);
        KILLED_JOBS.lock().unwrap().insert(job_id);
        true
    } else {
        false
    }
}

/// Hard-kill every registered child (`SIGKILL` on Unix, mirroring the
/// teacher's `kill_running_processes`). If `cleanup_outputs`, best-effort
/// delete each registered target path and return the list actually deleted.
///
/// Reaps every signalled child synchronously before returning, so
/// `active_count() == 0` holds for the caller immediately afterward
/// (SPEC_FULL.md §8 invariant 6) instead of only once each child's own
/// supervisor task happens to notice the exit later.
pub fn kill_all(cleanup_outputs: bool) -> Vec<PathBuf> {
    let mut children = RUNNING_CHILDREN.lock().unwrap();
    let ids: Vec<JobId> = children.keys().copied().collect();
    for child in children.values_mut() {
        signal_child(child, true);
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    for child in children.values_mut() {
        wait_until_exited(child, deadline);
    }
    children.clear();
    drop(children);

    KILLED_JOBS.lock().unwrap().extend(ids);

    let mut deleted = Vec::new();
    if cleanup_outputs {
        let targets = RUNNING_TARGETS.lock().unwrap();
        for path in targets.values() {
            if path.exists() && std::fs::remove_file(path).is_ok() {
                deleted.push(path.clone());
            }
        }
    }
    deleted
}

/// Was this job killed by `kill`/`kill_all`? One-shot: the marker is removed
/// on the first check, since a job id is never reused within a run.
pub fn was_killed(job_id: JobId) -> bool {
    KILLED_JOBS.lock().unwrap().remove(&job_id)
}

/// Poll a signalled child with `try_wait` until it reports exited or
/// `deadline` passes. A `SIGKILL` is expected to take effect almost
/// immediately, so a short bounded poll is enough without making this
/// function (and `kill_all` with it) async.
fn wait_until_exited(child: &mut Child, deadline: Instant) -> bool {
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(5));
            }
            _ => return false,
        }
    }
}

/// Send `SIGTERM` (orderly) or `SIGKILL` (hard) to `child` by pid, the way
/// the teacher's `kill_running_processes` reaches for `libc::kill` directly
/// rather than going through a higher-level abstraction. Falls back to
/// `Child::start_kill` (always `SIGKILL`-equivalent) on non-Unix targets,
/// where signalling by a specific signal number isn't available.
fn signal_child(child: &mut Child, hard: bool) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let sig = if hard { libc::SIGKILL } else { libc::SIGTERM };
            unsafe {
                libc::kill(pid as i32, sig);
            }
            return;
        }
    }
    let _ = child.start_kill();
}

pub fn active_count() -> usize {
    RUNNING_CHILDREN.lock().unwrap().len()
}

/// Resolve the encoder binary: prefer the explicit configured path, else
/// fall back to resolution through `$PATH`.
pub fn resolve_encoder_path(configured: Option<&Path>, program_name: &str) -> Result<PathBuf, String> {
    if let Some(p) = configured {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        return Err(format!("configured encoder path {} does not exist", p.display()));
    }

    for dir in std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
        .unwrap_or_default()
    {
        let candidate = dir.join(program_name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(format!("{program_name} not found on PATH"))
}

/// Validate the encoder binary exists and is (on Unix) executable. Run once
/// at startup as part of the controller's preflight (§4.E).
pub fn verify_encoder(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("encoder binary not found at {}", path.display()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)
            .map_err(|e| format!("failed to stat encoder binary: {e}"))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(format!("encoder binary at {} is not executable", path.display()));
        }
    }

    Ok(())
}

/// Outcome of running one job to completion.
#[derive(Debug)]
pub enum RunOutcome {
    Completed { output_bytes: u64 },
    Failed { error_text: String },
}

/// Spawn one encoder child for `job_id`, stream-parse its progress, and
/// report the final outcome. `on_progress(percent, current_time_s)` is
/// invoked for every parsed progress line; coalescing is the caller's
/// responsibility (SPEC_FULL.md §4.B edge cases).
pub async fn run<F>(
    job_id: JobId,
    source: &Path,
    target: &Path,
    settings: &EncoderSettings,
    verbose: bool,
    mut on_progress: F,
) -> RunOutcome
where
    F: FnMut(u8, f64) + Send,
{
    if let Some(parent) = target.parent() {
        if !parent.exists() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return RunOutcome::Failed {
                    error_text: format!("failed to create output directory: {e}"),
                };
            }
        }
    }

    let mut cmd = Command::new(&settings.binary_path);
    cmd.arg("-i")
        .arg(source)
        .arg("-vn")
        .arg("-ar")
        .arg(settings.sample_rate.to_string())
        .arg("-ac")
        .arg(settings.channels.to_string())
        .arg("-b:a")
        .arg(&settings.bitrate)
        .arg("-acodec")
        .arg(&settings.codec)
        .arg("-progress")
        .arg("pipe:2")
        .arg("-y")
        .arg(target)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return RunOutcome::Failed {
                error_text: EncoderErrorKind::SpawnFailed(e.to_string()).as_text(),
            };
        }
    };

    let stderr = child.stderr.take();
    register(job_id, child, target.to_path_buf());

    let mut captured = String::new();
    let mut duration_s: Option<f64> = None;

    if let Some(stderr) = stderr {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if verbose {
                eprintln!("[encoder:{job_id}] {line}");
            }
            captured.push_str(&line);
            captured.push('\n');

            if duration_s.is_none() {
                duration_s = parse_duration_line(&line);
            }
            if let Some(current) = parse_progress_line(&line) {
                let percent = duration_s
                    .filter(|d| *d > 0.0)
                    .map(|d| ((100.0 * current / d).floor() as i64).clamp(0, 100) as u8)
                    .unwrap_or(0);
                on_progress(percent, current);
            }
        }
    }

    // The child may already have been removed from the registry by a
    // concurrent kill_all(); wait() on the still-owned handle either way.
    let mut children = RUNNING_CHILDREN.lock().unwrap();
    let child_handle = children.remove(&job_id);
    drop(children);

    let status = match child_handle {
        Some(mut child) => child.wait().await,
        None => {
            // Already reaped by a kill path; nothing further to await.
            deregister(job_id);
            return RunOutcome::Failed {
                error_text: "cancelled".to_string(),
            };
        }
    };
    deregister(job_id);

    match status {
        Ok(status) if status.success() => {
            let output_bytes = tokio::fs::metadata(target)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            RunOutcome::Completed { output_bytes }
        }
        Ok(status) => {
            let kind = EncoderErrorKind::classify(&captured, status.code());
            RunOutcome::Failed {
                error_text: kind.as_text(),
            }
        }
        Err(e) => RunOutcome::Failed {
            error_text: format!("failed to wait for encoder: {e}"),
        },
    }
}

/// Matches the first `Duration: HH:MM:SS.cc` occurrence in the encoder's
/// diagnostic stream and returns the total as seconds.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let idx = line.find("Duration:")?;
    let rest = &line[idx + "Duration:".len()..];
    let time_str = rest.trim().split(',').next()?.trim();
    if time_str.is_empty() {
        return None;
    }
    let seconds = parse_timecode(time_str);
    if seconds > 0.0 { Some(seconds) } else { None }
}

/// Extracts the current timestamp from a progress line, preferring
/// `out_time_ms` (microseconds, despite the name — see SPEC_FULL.md §9)
/// over the `time=HH:MM:SS.cc` textual field.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let mut via_time: Option<f64> = None;

    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                return Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("time=") {
            via_time = Some(parse_timecode(rest));
        }
    }

    via_time
}

fn parse_timecode(s: &str) -> f64 {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() == 3 {
        let h = parts[0].parse::<f64>().unwrap_or(0.0);
        let m = parts[1].parse::<f64>().unwrap_or(0.0);
        let sec = parts[2].parse::<f64>().unwrap_or(0.0);
        h * 3600.0 + m * 60.0 + sec
    } else {
        s.parse::<f64>().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_line() {
        let line = "  Duration: 00:02:30.45, start: 0.000000, bitrate: 320 kb/s";
        assert_eq!(parse_duration_line(line), Some(150.45));
    }

    #[test]
    fn duration_line_without_duration_is_none() {
        assert_eq!(parse_duration_line("frame=  120 fps= 30"), None);
    }

    #[test]
    fn prefers_out_time_ms_and_treats_it_as_microseconds() {
        let line = "out_time_ms=2500000 out_time=00:00:02.500000 progress=continue";
        // 2_500_000 microseconds == 2.5 seconds, NOT 2500 seconds.
        assert_eq!(parse_progress_line(line), Some(2.5));
    }

    #[test]
    fn falls_back_to_textual_time_field() {
        let line = "frame=10 time=00:01:00.00 bitrate=32.0kbits/s";
        assert_eq!(parse_progress_line(line), Some(60.0));
    }

    #[test]
    fn progress_line_with_neither_field_is_none() {
        assert_eq!(parse_progress_line("progress=end"), None);
    }

    #[test]
    fn resolve_encoder_path_rejects_missing_configured_path() {
        let result = resolve_encoder_path(Some(Path::new("/nonexistent/ffmpeg")), "ffmpeg");
        assert!(result.is_err());
    }

    #[test]
    fn verify_encoder_rejects_missing_binary() {
        let result = verify_encoder(Path::new("/nonexistent/ffmpeg-binary"));
        assert!(result.is_err());
    }

    #[test]
    fn active_count_starts_at_zero_in_isolation() {
        // Best-effort: other tests in this binary may register/deregister
        // concurrently, so only assert the counter never goes negative
        // (impossible by type) and is callable without panicking.
        let _ = active_count();
    }
}
