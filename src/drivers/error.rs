use thiserror::Error;
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("channel count must be greater than zero")]
    InvalidChannelCount,
    #[error("frame rate must be greater than zero")]
    InvalidFrameRate,
    #[error("block duration of {seconds}s holds no samples at {frame_rate} Hz")]
    InvalidBlockDuration { seconds: f64, frame_rate: u32 },
    #[error("already recording; stop the current recording first")]
    AlreadyRecording,
    #[error("shape mismatch: time vector has {time_len} samples, data has {data_len}")]
    ShapeMismatch { time_len: usize, data_len: usize },
    #[error("time vector must be non-decreasing (sample {position} goes backwards)")]
    NonMonotonicTime { position: usize },
    #[error("block index {index} out of range for buffer of length {len}")]
    IndexOutOfRange { index: isize, len: usize },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("acquisition backend has already been closed")]
    BackendClosed,
    #[error("no device registered under id {0}")]
    UnknownDevice(usize),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
