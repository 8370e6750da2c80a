use async_trait::async_trait;

use crate::error::Error;

/// One acquisition's worth of raw mono samples.
pub type SampleBuffer = Vec<i16>;

/// Capability seam over audio acquisition.
///
/// The pipeline and the transform only know this trait, so they run the
/// same against hardware (`MicSource`) and synthetic input (`SineSource`).
#[async_trait]
pub trait SampleSource: Send {
    /// Block until one full acquisition is available. Unblocks with
    /// `Error::Cancelled` when shutdown is requested.
    async fn read(&mut self) -> Result<SampleBuffer, Error>;

    /// Release the underlying device. Idempotent.
    fn close(&mut self);
}

/// Deterministic sine generator, phase-continuous across reads.
pub struct SineSource {
    freq: f32,
    rate: u32,
    read_len: usize,
    amplitude: f32,
    phase: f32,
    closed: bool,
}

impl SineSource {
    pub fn new(freq: f32, rate: u32, read_len: usize) -> Self {
        Self {
            freq,
            rate,
            read_len,
            amplitude: 0.8,
            phase: 0.0,
            closed: false,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }
}

#[async_trait]
impl SampleSource for SineSource {
    async fn read(&mut self) -> Result<SampleBuffer, Error> {
        if self.closed {
            return Err(Error::Cancelled);
        }

        let step = 2.0 * std::f32::consts::PI * self.freq / self.rate as f32;
        let buffer = (0..self.read_len)
            .map(|_| {
                let sample = self.phase.sin() * self.amplitude * i16::MAX as f32;
                self.phase = (self.phase + step) % (2.0 * std::f32::consts::PI);
                sample as i16
            })
            .collect();
        Ok(buffer)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
