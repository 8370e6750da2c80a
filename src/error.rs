use thiserror::Error;

/// Unified error type for the application.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no usable audio input device: {0}")]
    DeviceUnavailable(String),

    #[error("capture overrun, {missing} samples missing")]
    CaptureOverrun { missing: usize },

    #[error("got {len} samples but the FFT needs at least {nfft}")]
    InsufficientSamples { len: usize, nfft: usize },

    #[error("frame width changed mid-run: expected {expected} columns, got {got}")]
    BufferWidthMismatch { expected: usize, got: usize },

    #[error("shutdown requested")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Recoverable errors keep the pipeline alive; everything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::CaptureOverrun { .. })
    }
}
