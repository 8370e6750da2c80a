use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::audio::{SampleSource, Spectrogram};
use crate::config::Settings;
use crate::display::{DisplaySnapshot, ScrollingImage};
use crate::error::Error;

/// Recoverable cycle failures tolerated back to back before the
/// pipeline gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Published image stream. `None` until the first cycle completes.
pub type SnapshotSender = watch::Sender<Option<Arc<DisplaySnapshot>>>;
pub type SnapshotReceiver = watch::Receiver<Option<Arc<DisplaySnapshot>>>;

/// The acquisition cycle: timer tick, read one frame, transform it, fold
/// it into the scrolling image, publish a snapshot. Strictly serial; a
/// slow cycle delays the next tick instead of dropping frames, and logs
/// the lag.
pub struct Pipeline<S: SampleSource> {
    source: S,
    spectrogram: Spectrogram,
    image: ScrollingImage,
    interval: Duration,
    snapshot_tx: SnapshotSender,
    shutdown: watch::Receiver<bool>,
    lagging: bool,
    consecutive_failures: u32,
}

impl<S: SampleSource> Pipeline<S> {
    pub fn new(
        settings: &Settings,
        source: S,
        snapshot_tx: SnapshotSender,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, Error> {
        Ok(Self {
            source,
            spectrogram: Spectrogram::new(settings.rate, settings.nfft, settings.overlap)?,
            image: ScrollingImage::new(settings.samples_per_frame),
            interval: settings.frame_duration(),
            snapshot_tx,
            shutdown,
            lagging: false,
            consecutive_failures: 0,
        })
    }

    /// Drive cycles until shutdown or a fatal error. The source is
    /// closed on every exit path.
    pub async fn run(mut self) -> Result<(), Error> {
        let result = self.run_inner().await;
        self.source.close();
        match result {
            Err(Error::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn run_inner(&mut self) -> Result<(), Error> {
        info!(
            "pipeline running, one acquisition every {:?}",
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.shutdown.borrow() {
                info!("pipeline shutting down");
                return Ok(());
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let started = Instant::now();

            match self.cycle().await {
                Ok(()) => self.consecutive_failures = 0,
                Err(e) if e.is_recoverable() => {
                    self.consecutive_failures += 1;
                    warn!(
                        "cycle failed ({e}), {} consecutive",
                        self.consecutive_failures
                    );
                    if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }

            let elapsed = started.elapsed();
            self.lagging = elapsed > self.interval;
            if self.lagging {
                warn!(
                    "cycle took {elapsed:?}, budget is {:?}; display is lagging",
                    self.interval
                );
            }
        }
    }

    async fn cycle(&mut self) -> Result<(), Error> {
        let samples = self.source.read().await?;
        let frame = self.spectrogram.transform(&samples)?;
        self.image.push(&frame)?;

        let snapshot = DisplaySnapshot::capture(&self.image, &frame, self.lagging);
        // Send only fails when every receiver is gone, which means the
        // UI already exited.
        let _ = self.snapshot_tx.send(Some(Arc::new(snapshot)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SampleBuffer, SineSource};
    use async_trait::async_trait;

    fn test_settings() -> Settings {
        Settings {
            rate: 44_100,
            sample_length: 128,
            samples_per_frame: 2,
            nfft: 64,
            overlap: 48,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn snapshots_fill_up_then_scroll() {
        let settings = test_settings();
        settings.validate().unwrap();

        // read_len 256, hop 16: 13 columns per frame, capacity 26.
        let source = SineSource::new(1000.0, settings.rate, settings.read_len());
        let (snapshot_tx, mut snapshot_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Pipeline::new(&settings, source, snapshot_tx, shutdown_rx).unwrap();
        let handle = tokio::spawn(pipeline.run());

        let mut widths = Vec::new();
        while widths.last() != Some(&26) {
            tokio::time::timeout(Duration::from_secs(5), snapshot_rx.changed())
                .await
                .expect("pipeline stopped publishing")
                .unwrap();
            let snap = snapshot_rx.borrow().clone().unwrap();
            assert_eq!(snap.height(), 33);
            assert_eq!(snap.width() % 13, 0);
            widths.push(snap.width());
        }
        // Non-decreasing and clamped at capacity.
        assert!(widths.windows(2).all(|w| w[0] <= w[1]));

        // A few more cycles must stay at capacity.
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), snapshot_rx.changed())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(snapshot_rx.borrow().clone().unwrap().width(), 26);
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pipeline did not stop")
            .unwrap()
            .unwrap();
    }

    struct BrokenSource;

    #[async_trait]
    impl SampleSource for BrokenSource {
        async fn read(&mut self) -> Result<SampleBuffer, Error> {
            Err(Error::CaptureOverrun { missing: 1 })
        }

        fn close(&mut self) {}
    }

    #[tokio::test]
    async fn repeated_recoverable_failures_become_fatal() {
        let settings = test_settings();
        let (snapshot_tx, _snapshot_rx) = watch::channel(None);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Pipeline::new(&settings, BrokenSource, snapshot_tx, shutdown_rx).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), pipeline.run())
            .await
            .expect("pipeline did not give up");
        assert!(matches!(result, Err(Error::CaptureOverrun { .. })));
    }

    #[tokio::test]
    async fn shutdown_before_first_cycle_is_clean() {
        let settings = test_settings();
        let source = SineSource::new(1000.0, settings.rate, settings.read_len());
        let (snapshot_tx, _snapshot_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Pipeline::new(&settings, source, snapshot_tx, shutdown_rx).unwrap();
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), pipeline.run())
            .await
            .expect("pipeline did not stop");
        assert!(result.is_ok());
    }
}
