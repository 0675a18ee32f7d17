//! Mock encoder scripts for exercising the work pool end-to-end
//!
//! The scenarios in SPEC_FULL.md §8 ("Concrete scenarios") describe a
//! *mocked* encoder child rather than a real ffmpeg invocation, so the pool
//! and driver can be tested without a system dependency. This writes a small
//! `/bin/sh` script that stands in for the encoder binary: it can emit a
//! `Duration:`/`out_time_ms=` progress stream to stderr, write a target file
//! of a given size, sleep, and exit with a chosen status — enough to drive
//! the scenarios without shelling out to a real transcoder.

#![cfg(test)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Behavior for a single mock encoder invocation. The script always reads
/// its target path as the final argument (`-y <target>`, per the fixed
/// invocation shape in SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Bytes to write to the target path before exiting. `None` means the
    /// script never creates the target (simulating a spawn-time failure).
    pub output_bytes: Option<usize>,
    /// Emit a `Duration: HH:MM:SS.cc` line plus a couple of `out_time_ms=`
    /// progress lines before exiting.
    pub emit_progress: bool,
    /// Sleep this many milliseconds before exiting (after writing output).
    pub sleep_ms: u64,
    /// Final exit code.
    pub exit_code: i32,
    /// Extra diagnostic text to print to stderr, used to drive the
    /// classifier in `EncoderErrorKind::classify`.
    pub stderr_message: Option<String>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            output_bytes: Some(1024),
            emit_progress: false,
            sleep_ms: 0,
            exit_code: 0,
            stderr_message: None,
        }
    }
}

impl MockBehavior {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn success_with_progress() -> Self {
        Self {
            emit_progress: true,
            ..Self::default()
        }
    }

    pub fn slow(sleep_ms: u64) -> Self {
        Self {
            sleep_ms,
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            output_bytes: None,
            exit_code: 1,
            stderr_message: Some(message.to_string()),
            ..Self::default()
        }
    }
}

/// Write an executable shell script at `script_path` implementing `behavior`.
/// The script takes its target path as `$(eval "echo \${@: -2:1}")`-style
/// last-but-one positional (matching `-y <target>` being the final two
/// arguments of the fixed invocation).
pub fn write_mock_encoder(script_path: &Path, behavior: &MockBehavior) {
    let mut body = String::from("#!/bin/sh\nTARGET=\"${@: -1}\"\n");

    if let Some(msg) = &behavior.stderr_message {
        body.push_str(&format!("echo {:?} 1>&2\n", msg));
    }
    if behavior.emit_progress {
        body.push_str("echo 'Duration: 00:00:10.00, start: 0.000000, bitrate: 320 kb/s' 1>&2\n");
        body.push_str("echo 'out_time_ms=2500000 progress=continue' 1>&2\n");
        body.push_str("echo 'out_time_ms=10000000 progress=end' 1>&2\n");
    }
    if let Some(n) = behavior.output_bytes {
        body.push_str(&format!(
            "head -c {n} /dev/zero > \"$TARGET\" 2>/dev/null || dd if=/dev/zero of=\"$TARGET\" bs=1 count={n} 2>/dev/null\n"
        ));
    }
    if behavior.sleep_ms > 0 {
        let secs = behavior.sleep_ms as f64 / 1000.0;
        body.push_str(&format!("sleep {secs}\n"));
    }
    body.push_str(&format!("exit {}\n", behavior.exit_code));

    let mut file = fs::File::create(script_path).expect("create mock encoder script");
    file.write_all(body.as_bytes()).expect("write mock encoder script");

    #[cfg(unix)]
    {
        let mut perms = fs::metadata(script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(script_path, perms).unwrap();
    }
}

/// Create a mock encoder script in `dir` and return its path.
pub fn mock_encoder_at(dir: &Path, name: &str, behavior: &MockBehavior) -> PathBuf {
    let path = dir.join(name);
    write_mock_encoder(&path, behavior);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn success_script_writes_target_and_exits_zero() {
        let dir = tempdir().unwrap();
        let script = mock_encoder_at(dir.path(), "enc.sh", &MockBehavior::success());
        let target = dir.path().join("out.mp3");

        let status = tokio::process::Command::new(&script)
            .arg("-i")
            .arg("in.mp4")
            .arg("-y")
            .arg(&target)
            .status()
            .await
            .unwrap();

        assert!(status.success());
        assert!(target.exists());
        assert_eq!(fs::metadata(&target).unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn failing_script_exits_nonzero_without_target() {
        let dir = tempdir().unwrap();
        let script = mock_encoder_at(
            dir.path(),
            "enc.sh",
            &MockBehavior::failing("Invalid data found when processing input"),
        );
        let target = dir.path().join("out.mp3");

        let output = tokio::process::Command::new(&script)
            .arg("-i")
            .arg("in.mp4")
            .arg("-y")
            .arg(&target)
            .output()
            .await
            .unwrap();

        assert!(!output.status.success());
        assert!(!target.exists());
        assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid data found"));
    }
}
