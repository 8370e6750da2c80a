pub mod spectrogram;

pub use spectrogram::Spectrogram;
