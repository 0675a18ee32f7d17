//! Parallel directory walker
//!
//! Produces a lazy, finite sequence of events from a root directory. This
//! generalizes the teacher's synchronous `walkdir::WalkDir` traversal
//! (`core/scanning.rs`) into a pool of cooperative async workers sharing a
//! directory queue, since the video files this driver scans can live in
//! directory trees far larger than the album folders the teacher walked.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::ledger::{Ledger, LedgerState};

const RECOGNIZED_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "wmv", "mov", "webm", "flv"];

/// A video file the walker has classified and is ready to hand to the pool.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub target_path: PathBuf,
    pub size: u64,
    pub has_sibling_audio: bool,
    pub has_sibling_subtitle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkStats {
    pub total_found: u64,
    pub to_process: u64,
    pub skipped_audio: u64,
    pub skipped_subtitle: u64,
    pub errors: u64,
}

#[derive(Debug)]
pub enum WalkEvent {
    Directory(PathBuf),
    File(DiscoveredFile),
    SkippedAudio(PathBuf),
    SkippedSubtitle(PathBuf),
    Error { path: PathBuf, message: String },
    Complete(WalkStats),
}

fn is_recognized(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RECOGNIZED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Start the walk. Returns a receiver of `WalkEvent`s; the channel is closed
/// (after the terminal `Complete` event) once every worker has drained the
/// directory queue. `directory_concurrency` bounds the number of cooperative
/// scanner tasks (§4.C, range `[1, 20]` enforced by the CLI layer).
pub fn spawn(
    root: PathBuf,
    recursive: bool,
    directory_concurrency: usize,
    ledger: Ledger,
) -> mpsc::UnboundedReceiver<WalkEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    let queue = Arc::new(Mutex::new(std::collections::VecDeque::from([root])));
    let inflight = Arc::new(AtomicUsize::new(0));
    let stats = Arc::new(StatsCounters::default());

    let complete_tx = tx.clone();
    let complete_stats = stats.clone();

    let mut workers = Vec::new();
    for _ in 0..directory_concurrency.clamp(1, 20) {
        let queue = queue.clone();
        let inflight = inflight.clone();
        let tx = tx.clone();
        let ledger = ledger.clone();
        let stats = stats.clone();
        workers.push(tokio::spawn(async move {
            worker_loop(queue, inflight, tx, ledger, recursive, stats).await;
        }));
    }
    drop(tx);

    // The supervisor task plays the role of the scheduler the spec
    // describes: it notices every worker has drained the directory queue,
    // emits the terminal event, and only then lets the channel close.
    tokio::spawn(async move {
        for w in workers {
            let _ = w.await;
        }
        let _ = complete_tx.send(WalkEvent::Complete(complete_stats.snapshot()));
    });

    rx
}

#[derive(Default)]
struct StatsCounters {
    total_found: AtomicUsize,
    to_process: AtomicUsize,
    skipped_audio: AtomicUsize,
    skipped_subtitle: AtomicUsize,
    errors: AtomicUsize,
}

async fn worker_loop(
    queue: Arc<Mutex<std::collections::VecDeque<PathBuf>>>,
    inflight: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<WalkEvent>,
    ledger: Ledger,
    recursive: bool,
    stats: Arc<StatsCounters>,
) {
    loop {
        let dir = {
            let mut q = queue.lock().await;
            match q.pop_front() {
                Some(dir) => {
                    inflight.fetch_add(1, Ordering::SeqCst);
                    dir
                }
                None => {
                    // No directory is immediately available. If no other
                    // worker is mid-scan either, the walk is over.
                    if inflight.load(Ordering::SeqCst) == 0 {
                        return;
                    }
                    drop(q);
                    tokio::task::yield_now().await;
                    continue;
                }
            }
        };

        let _ = tx.send(WalkEvent::Directory(dir.clone()));

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(WalkEvent::Error {
                    path: dir.clone(),
                    message: e.to_string(),
                });
                inflight.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    stats.errors.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(WalkEvent::Error {
                        path: dir.clone(),
                        message: e.to_string(),
                    });
                    break;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                if recursive {
                    queue.lock().await.push_back(path);
                }
                continue;
            }

            if !file_type.is_file() || !is_recognized(&path) {
                continue;
            }

            stats.total_found.fetch_add(1, Ordering::SeqCst);
            classify_and_emit(&path, &ledger, &tx, &stats).await;
        }

        inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn classify_and_emit(
    path: &Path,
    ledger: &Ledger,
    tx: &mpsc::UnboundedSender<WalkEvent>,
    stats: &StatsCounters,
) {
    let basename = match path.file_stem().and_then(|s| s.to_str()) {
        Some(s) => s,
        None => return,
    };
    let dir = match path.parent() {
        Some(d) => d,
        None => return,
    };

    let sibling_audio = dir.join(format!("{basename}.mp3"));
    let sibling_subtitle = dir.join(format!("{basename}.srt"));
    let has_sibling_audio = sibling_audio.exists();
    let has_sibling_subtitle = sibling_subtitle.exists();

    if has_sibling_subtitle {
        stats.skipped_subtitle.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(WalkEvent::SkippedSubtitle(path.to_path_buf()));
        return;
    }

    let target_path = crate::job::derive_target_path(path);
    let record = ledger.get(path).await.unwrap_or(None);

    // A `processing`/`failed` ledger record always forces re-conversion,
    // even if a sibling .mp3 happens to sit next to the source (it may be
    // stale or partial). Otherwise, a present sibling .mp3 is itself the
    // companion artifact that triggers a skip — this covers both a
    // pre-existing companion with no ledger history at all (Scenario 1) and
    // the already-converted case the ledger confirms.
    let needs_reconvert = matches!(
        record.as_ref().map(|r| r.state),
        Some(LedgerState::Processing) | Some(LedgerState::Failed)
    );

    if !needs_reconvert && has_sibling_audio {
        stats.skipped_audio.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(WalkEvent::SkippedAudio(path.to_path_buf()));
        return;
    }

    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    stats.to_process.fetch_add(1, Ordering::SeqCst);
    let _ = tx.send(WalkEvent::File(DiscoveredFile {
        path: path.to_path_buf(),
        target_path,
        size,
        has_sibling_audio,
        has_sibling_subtitle,
    }));
}

impl StatsCounters {
    fn snapshot(&self) -> WalkStats {
        WalkStats {
            total_found: self.total_found.load(Ordering::SeqCst) as u64,
            to_process: self.to_process.load(Ordering::SeqCst) as u64,
            skipped_audio: self.skipped_audio.load(Ordering::SeqCst) as u64,
            skipped_subtitle: self.skipped_subtitle.load(Ordering::SeqCst) as u64,
            errors: self.errors.load(Ordering::SeqCst) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn recognizes_only_configured_extensions() {
        assert!(is_recognized(Path::new("/a/movie.MKV")));
        assert!(is_recognized(Path::new("/a/movie.mp4")));
        assert!(!is_recognized(Path::new("/a/movie.txt")));
        assert!(!is_recognized(Path::new("/a/movie")));
    }

    #[tokio::test]
    async fn walk_emits_file_and_terminal_complete() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.mp4"), b"fake").await.unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub").join("b.mkv"), b"fake")
            .await
            .unwrap();

        let ledger = Ledger::open(dir.path()).await.unwrap();
        let mut rx = spawn(dir.path().to_path_buf(), true, 2, ledger);

        let mut files = Vec::new();
        while let Some(event) = rx.recv().await {
            if let WalkEvent::File(f) = event {
                files.push(f.path);
            }
        }
        files.sort();
        let mut expected = vec![dir.path().join("a.mp4"), dir.path().join("sub").join("b.mkv")];
        expected.sort();
        assert_eq!(files, expected);
    }

    #[tokio::test]
    async fn sibling_subtitle_is_skipped() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.mp4"), b"fake").await.unwrap();
        tokio::fs::write(dir.path().join("a.srt"), b"1\n00:00:00,000 --> 00:00:01,000\nhi\n")
            .await
            .unwrap();

        let ledger = Ledger::open(dir.path()).await.unwrap();
        let mut rx = spawn(dir.path().to_path_buf(), false, 1, ledger);

        let mut saw_skip = false;
        while let Some(event) = rx.recv().await {
            if let WalkEvent::SkippedSubtitle(p) = event {
                saw_skip = true;
                assert_eq!(p, dir.path().join("a.mp4"));
            }
            if let WalkEvent::File(_) = event {
                panic!("file with sibling subtitle should not be emitted for conversion");
            }
        }
        assert!(saw_skip);
    }

    #[tokio::test]
    async fn completed_ledger_entry_with_existing_target_is_skipped() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.mp4");
        let target = dir.path().join("a.mp3");
        tokio::fs::write(&source, b"fake").await.unwrap();
        tokio::fs::write(&target, b"fake-mp3").await.unwrap();

        let ledger = Ledger::open(dir.path()).await.unwrap();
        ledger.start(&source, &target, Some(4)).await.unwrap();
        ledger.complete(&source, 8).await.unwrap();

        let mut rx = spawn(dir.path().to_path_buf(), false, 1, ledger);
        let mut saw_skip = false;
        while let Some(event) = rx.recv().await {
            if let WalkEvent::SkippedAudio(_) = event {
                saw_skip = true;
            }
        }
        assert!(saw_skip);
    }

    // Scenario 1 (SPEC_FULL.md §8): a pre-existing sibling .mp3 skips the
    // source even with no prior ledger record at all — the companion
    // artifact itself is what triggers the skip, not a completed attempt.
    #[tokio::test]
    async fn sibling_audio_with_no_ledger_record_is_skipped() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.mp4");
        let target = dir.path().join("a.mp3");
        tokio::fs::write(&source, b"fake").await.unwrap();
        tokio::fs::write(&target, b"fake-mp3").await.unwrap();

        let ledger = Ledger::open(dir.path()).await.unwrap();
        let mut rx = spawn(dir.path().to_path_buf(), false, 1, ledger);

        let mut saw_skip = false;
        while let Some(event) = rx.recv().await {
            match event {
                WalkEvent::SkippedAudio(p) => {
                    saw_skip = true;
                    assert_eq!(p, source);
                }
                WalkEvent::File(_) => panic!("file with a pre-existing companion should be skipped"),
                WalkEvent::Complete(stats) => {
                    assert_eq!(stats.to_process, 0);
                    assert_eq!(stats.skipped_audio, 1);
                }
                _ => {}
            }
        }
        assert!(saw_skip);
    }

    // Scenario 5 (SPEC_FULL.md §8): a `failed` ledger record forces
    // re-conversion even when a sibling .mp3 (stale from the prior failed
    // attempt) is sitting right there.
    #[tokio::test]
    async fn failed_ledger_entry_reconverts_even_with_sibling_audio_present() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("bad.mp4");
        let target = dir.path().join("bad.mp3");
        tokio::fs::write(&source, b"fake").await.unwrap();
        tokio::fs::write(&target, b"stale-partial").await.unwrap();

        let ledger = Ledger::open(dir.path()).await.unwrap();
        ledger.start(&source, &target, Some(4)).await.unwrap();
        ledger.fail(&source, "invalid_input").await.unwrap();

        let mut rx = spawn(dir.path().to_path_buf(), false, 1, ledger);
        let mut saw_file = false;
        while let Some(event) = rx.recv().await {
            if let WalkEvent::File(f) = event {
                saw_file = true;
                assert_eq!(f.path, source);
            }
            if let WalkEvent::SkippedAudio(_) = event {
                panic!("a failed attempt must re-convert, not skip");
            }
        }
        assert!(saw_file);
    }
}
