mod scroll;

pub use scroll::ScrollingImage;

use crate::audio::SpectrogramFrame;

/// Immutable rendering hand-off, published once per acquisition cycle.
///
/// The renderer only ever sees complete snapshots, so a cycle in flight
/// can never tear the image under it.
#[derive(Debug, Clone)]
pub struct DisplaySnapshot {
    /// Magnitude columns, oldest to newest.
    pub columns: Vec<Vec<f32>>,
    /// Frequency per row, in Hz.
    pub freqs: Vec<f32>,
    /// Time offsets of the latest frame's columns, in seconds.
    pub times: Vec<f32>,
    /// Set when the producing cycle overran its interval.
    pub lagging: bool,
}

impl DisplaySnapshot {
    /// Copy the current image state together with the latest frame's axes.
    pub fn capture(image: &ScrollingImage, frame: &SpectrogramFrame, lagging: bool) -> Self {
        Self {
            columns: image.columns().cloned().collect(),
            freqs: frame.freqs.clone(),
            times: frame.times.clone(),
            lagging,
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn height(&self) -> usize {
        self.freqs.len()
    }
}
