use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::Error;

/// One transform result: magnitude columns plus both axes.
///
/// Columns are time bins, each holding `nfft / 2 + 1` frequency bins.
/// Recomputed from scratch every acquisition, nothing carries over.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramFrame {
    /// Magnitude columns, oldest first.
    pub columns: Vec<Vec<f32>>,
    /// Frequency per row, in Hz.
    pub freqs: Vec<f32>,
    /// Time offset per column within the frame, in seconds.
    pub times: Vec<f32>,
}

impl SpectrogramFrame {
    pub fn rows(&self) -> usize {
        self.freqs.len()
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }
}

/// Windowed overlapping FFT over a fixed parameter set.
pub struct Spectrogram {
    rate: u32,
    nfft: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    freqs: Vec<f32>,
}

impl Spectrogram {
    /// Plan the FFT and precompute the Hann window. `overlap` must be
    /// smaller than `nfft`.
    pub fn new(rate: u32, nfft: usize, overlap: usize) -> Result<Self, Error> {
        if nfft == 0 || nfft % 2 != 0 {
            return Err(Error::Config(format!(
                "nfft must be a positive even number, got {nfft}"
            )));
        }
        if overlap >= nfft {
            return Err(Error::Config(format!(
                "overlap ({overlap}) must be smaller than nfft ({nfft})"
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nfft);

        let half_len = nfft / 2 + 1;
        let freqs = (0..half_len)
            .map(|i| i as f32 * rate as f32 / nfft as f32)
            .collect();

        Ok(Self {
            rate,
            nfft,
            hop: nfft - overlap,
            window: hann_window(nfft),
            fft,
            freqs,
        })
    }

    /// Segment the signal with stride `hop`, window each segment and take
    /// the magnitude of the half spectrum. A trailing partial segment is
    /// dropped.
    pub fn transform(&self, signal: &[i16]) -> Result<SpectrogramFrame, Error> {
        if signal.len() < self.nfft {
            return Err(Error::InsufficientSamples {
                len: signal.len(),
                nfft: self.nfft,
            });
        }

        let n_cols = 1 + (signal.len() - self.nfft) / self.hop;
        let half_len = self.nfft / 2 + 1;

        let mut columns = Vec::with_capacity(n_cols);
        let mut buf: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); self.nfft];

        for k in 0..n_cols {
            let segment = &signal[k * self.hop..k * self.hop + self.nfft];
            for (i, &s) in segment.iter().enumerate() {
                let sample = s as f32 / i16::MAX as f32;
                buf[i] = Complex::new(sample * self.window[i], 0.0);
            }
            self.fft.process(&mut buf);

            columns.push(buf[..half_len].iter().map(|c| c.norm()).collect());
        }

        // Column timestamps at segment centers, matching the axes a
        // renderer labels against.
        let times = (0..n_cols)
            .map(|k| (self.nfft / 2 + k * self.hop) as f32 / self.rate as f32)
            .collect();

        Ok(SpectrogramFrame {
            columns,
            freqs: self.freqs.clone(),
            times,
        })
    }

    /// Columns produced for a signal of `len` samples.
    pub fn cols_for_len(&self, len: usize) -> usize {
        if len < self.nfft {
            0
        } else {
            1 + (len - self.nfft) / self.hop
        }
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / rate as f32;
                ((2.0 * std::f32::consts::PI * freq * t).sin() * 0.8 * i16::MAX as f32) as i16
            })
            .collect()
    }

    #[test]
    fn shape_matches_segment_count_formula() {
        let sp = Spectrogram::new(44_100, 1024, 1000).unwrap();
        let frame = sp.transform(&vec![0i16; 4096]).unwrap();

        // 1 + (4096 - 1024) / 24 = 129 columns of 513 bins.
        assert_eq!(frame.cols(), 129);
        assert_eq!(frame.rows(), 513);
        for col in &frame.columns {
            assert_eq!(col.len(), 513);
        }
        assert_eq!(frame.times.len(), frame.cols());
        assert_eq!(frame.cols(), sp.cols_for_len(4096));
    }

    #[test]
    fn freq_axis_spans_zero_to_nyquist() {
        let sp = Spectrogram::new(44_100, 1024, 1000).unwrap();
        let frame = sp.transform(&vec![0i16; 4096]).unwrap();

        assert_eq!(frame.freqs[0], 0.0);
        assert!(*frame.freqs.last().unwrap() <= 44_100.0 / 2.0);
        assert!(frame.freqs.windows(2).all(|w| w[0] < w[1]));
        assert!(frame.times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn transform_is_deterministic() {
        let sp = Spectrogram::new(44_100, 1024, 1000).unwrap();
        let signal = sine(440.0, 44_100, 4096);

        let a = sp.transform(&signal).unwrap();
        let b = sp.transform(&signal).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_short_signal() {
        let sp = Spectrogram::new(44_100, 1024, 1000).unwrap();
        let err = sp.transform(&vec![0i16; 1023]).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientSamples { len: 1023, nfft: 1024 }
        ));
    }

    #[test]
    fn sine_energy_lands_in_the_right_bin() {
        let rate = 44_100;
        let sp = Spectrogram::new(rate, 1024, 1000).unwrap();
        // 4 bins up: 4 * 44100 / 1024 ≈ 172.3 Hz
        let freq = 4.0 * rate as f32 / 1024.0;
        let frame = sp.transform(&sine(freq, rate, 4096)).unwrap();

        for col in &frame.columns {
            let peak = col
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(peak, 4);
        }
    }

    #[test]
    fn magnitudes_are_non_negative() {
        let sp = Spectrogram::new(44_100, 1024, 1000).unwrap();
        let frame = sp.transform(&sine(1000.0, 44_100, 4096)).unwrap();
        assert!(frame.columns.iter().flatten().all(|&m| m >= 0.0));
    }

    #[test]
    fn silence_stays_below_the_log_floor() {
        let sp = Spectrogram::new(44_100, 1024, 1000).unwrap();
        let frame = sp.transform(&vec![0i16; 4096]).unwrap();
        // Zero magnitudes must not break the renderer's log scale; the
        // widget clamps to the floor before taking the log.
        assert!(frame.columns.iter().flatten().all(|&m| m == 0.0));
    }
}
