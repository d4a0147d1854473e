use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = CaptureError> = core::result::Result<T, E>;

/// Failures the capture loop distinguishes between.
///
/// Transient read failures never show up here: they are an expected
/// steady-state occurrence and are absorbed by the loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device {label} ({device}) unavailable: {reason}")]
    DeviceUnavailable {
        label: String,
        device: String,
        reason: String,
    },

    #[error("device {label} failed {failures} consecutive reads, giving up")]
    TerminalReadFailure { label: String, failures: u32 },

    #[error("preview unavailable: {reason}")]
    PreviewUnavailable { reason: String },

    #[error("snapshot directory {} unavailable: {reason}", .path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error(
        "commit {sequence} failed writing {} ({} file(s) already written)",
        .failed.display(),
        .written.len()
    )]
    PartialCommit {
        sequence: u64,
        written: Vec<PathBuf>,
        failed: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("sequence number {sequence} is the last one available, refusing to save")]
    SequenceExhausted { sequence: u64 },

    #[error("operator input failed: {0}")]
    Input(#[from] std::io::Error),
}
