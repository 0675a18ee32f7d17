//! Logging configuration
//!
//! Logs go to both the terminal and a rotated file next to the ledger at
//! `<input_root>/.ffmpeg-processor.log`, mirroring the teacher's combined
//! terminal+file logger (`TermLogger` + `WriteLogger` via `simplelog`).
//! Unlike the teacher, there is no platform-specific app-data directory to
//! resolve here — every invocation already has an obvious home for its log:
//! the same root it is scanning.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

pub const LOG_FILE_NAME: &str = ".ffmpeg-processor.log";
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub fn get_log_file_path(root: &Path) -> PathBuf {
    root.join(LOG_FILE_NAME)
}

/// Initialize combined terminal + file logging. `verbose` raises the
/// terminal level from `Info` to `Debug`; the file always captures `Debug`
/// and above. Returns the log file path on success, or `None` if file
/// logging could not be set up (terminal-only logging is still installed).
pub fn init_logging(root: &Path, verbose: bool) -> Option<PathBuf> {
    let log_path = get_log_file_path(root);

    if let Ok(metadata) = fs::metadata(&log_path) {
        if metadata.len() > MAX_LOG_BYTES {
            let backup_path = root.join(format!("{LOG_FILE_NAME}.old"));
            let _ = fs::rename(&log_path, &backup_path);
        }
    }

    let terminal_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();

    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: could not open log file {}: {e}", log_path.display());
            init_terminal_only(terminal_level);
            return None;
        }
    };

    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(terminal_level, config.clone(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Debug, config, log_file),
    ];

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Warning: logger already initialized");
    }

    log::debug!("log file: {}", log_path.display());
    Some(log_path)
}

fn init_terminal_only(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();

    let term_logger = TermLogger::new(level, config, TerminalMode::Mixed, ColorChoice::Auto);
    let _ = CombinedLogger::init(vec![term_logger]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_path_lives_under_root() {
        let root = Path::new("/videos/library");
        let path = get_log_file_path(root);
        assert_eq!(path, PathBuf::from("/videos/library/.ffmpeg-processor.log"));
    }
}
