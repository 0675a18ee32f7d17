//! Encoder driver and bounded-concurrency work pool
//!
//! This module is the pipeline's heart: `driver` spawns and supervises one
//! ffmpeg child process per job, and `pool` owns the bounded-concurrency
//! queue that feeds it. See SPEC_FULL.md §4.B and §4.D.

pub mod driver;
pub mod pool;

use std::path::PathBuf;

/// Fixed ffmpeg invocation shape (§6). `binary_path` is resolved once at
/// startup by `driver::resolve_encoder_path`.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub binary_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: String,
    pub codec: String,
}

impl EncoderSettings {
    pub fn with_binary(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            sample_rate: 16_000,
            channels: 1,
            bitrate: "32k".to_string(),
            codec: "libmp3lame".to_string(),
        }
    }
}
