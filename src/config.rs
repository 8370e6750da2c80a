use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// File name looked up in the working directory and the user config dir.
const CONFIG_FILE: &str = "specterm.toml";

/// Capture and analysis settings. Loaded once at startup, never
/// reconfigured at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sample rate in Hz.
    pub rate: u32,
    /// Device buffer size hint, in samples.
    pub sample_length: usize,
    /// Mic reads visible across the scroll window.
    pub samples_per_frame: usize,
    /// FFT length per segment.
    pub nfft: usize,
    /// Overlap between consecutive FFT segments, in samples.
    pub overlap: usize,
    /// Input device name, or None for the default device.
    pub input_device: Option<String>,
    /// Lower clamp of the log color scale.
    pub log_floor: f32,
    /// Upper clamp of the log color scale.
    pub log_ceil: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rate: 44_100,
            sample_length: 2_048,
            samples_per_frame: 2,
            nfft: 1_024,
            overlap: 1_000,
            input_device: None,
            log_floor: 0.01,
            log_ceil: 1.0,
        }
    }
}

impl Settings {
    /// Load settings from `specterm.toml` (working directory first, then
    /// the user config dir), with `SPECTERM_*` environment overrides.
    /// Missing file means defaults.
    pub fn load() -> Result<Self, Error> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::config_path() {
            info!("loading settings from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        } else {
            debug!("no {} found, using defaults", CONFIG_FILE);
        }

        let settings: Settings = builder
            .add_source(config::Environment::with_prefix("SPECTERM").try_parsing(true))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    fn config_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        let global = dirs::config_dir()?.join("specterm").join(CONFIG_FILE);
        global.is_file().then_some(global)
    }

    /// Startup invariant checks. A configuration that passes here cannot
    /// produce `InsufficientSamples` at runtime.
    pub fn validate(&self) -> Result<(), Error> {
        if self.rate == 0 {
            return Err(Error::Config("rate must be positive".into()));
        }
        if self.nfft == 0 || self.nfft % 2 != 0 {
            return Err(Error::Config(format!(
                "nfft must be a positive even number, got {}",
                self.nfft
            )));
        }
        if self.overlap >= self.nfft {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than nfft ({})",
                self.overlap, self.nfft
            )));
        }
        if self.sample_length == 0 || self.samples_per_frame == 0 {
            return Err(Error::Config(
                "sample_length and samples_per_frame must be positive".into(),
            ));
        }
        if self.read_len() < self.nfft {
            return Err(Error::Config(format!(
                "one read ({} samples) is shorter than nfft ({}), the transform would starve",
                self.read_len(),
                self.nfft
            )));
        }
        if self.log_floor <= 0.0 {
            return Err(Error::Config("log_floor must be positive".into()));
        }
        if self.log_floor >= self.log_ceil {
            return Err(Error::Config(format!(
                "log_floor ({}) must be below log_ceil ({})",
                self.log_floor, self.log_ceil
            )));
        }
        Ok(())
    }

    /// Samples returned by one acquisition call.
    pub fn read_len(&self) -> usize {
        self.sample_length * self.samples_per_frame
    }

    /// Hop between consecutive FFT segments.
    pub fn hop(&self) -> usize {
        self.nfft - self.overlap
    }

    /// Wall-clock time covered by one acquisition.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.read_len() as f64 / self.rate as f64)
    }
}
