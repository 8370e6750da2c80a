// specterm: real-time terminal spectrogram viewer
// Expose public modules for use in integration tests

pub mod audio;
pub mod config;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod ui;

// Re-export commonly used types for convenience
pub use audio::{MicSource, SampleBuffer, SampleSource, SineSource, Spectrogram, SpectrogramFrame};
pub use config::Settings;
pub use display::{DisplaySnapshot, ScrollingImage};
pub use error::Error;
pub use pipeline::{Pipeline, SnapshotReceiver, SnapshotSender};
pub use ui::Tui;
