mod capture;
mod source;
mod spectrogram;

pub use capture::MicSource;
pub use source::{SampleBuffer, SampleSource, SineSource};
pub use spectrogram::{Spectrogram, SpectrogramFrame};
