use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use log::{debug, error, info, warn};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::audio::source::{SampleBuffer, SampleSource};
use crate::config::Settings;
use crate::error::Error;

/// How often a blocked read polls the capture ring.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Stalled reads tolerated before the source gives up.
const MAX_CONSECUTIVE_OVERRUNS: u32 = 5;

/// Ring capacity in acquisitions. Headroom for a slow cycle without
/// immediately dropping samples.
const RING_FRAMES: usize = 4;

/// Microphone-backed `SampleSource`.
///
/// The cpal stream lives on a dedicated thread (cpal streams are not
/// Send); the capture callback converts whatever sample format the
/// device delivers to mono i16 and pushes it into a lock-free ring. The
/// async `read` side drains the ring until one full acquisition is
/// available.
pub struct MicSource {
    cons: HeapConsumer<i16>,
    pending: Vec<i16>,
    scratch: Vec<i16>,
    read_len: usize,
    read_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    overflow: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    consecutive_overruns: u32,
}

impl MicSource {
    /// Open the configured input device for mono i16 capture at the
    /// configured rate. Fails with `DeviceUnavailable` when no device
    /// accepts that shape.
    pub fn open(settings: &Settings, shutdown: watch::Receiver<bool>) -> Result<Self, Error> {
        let read_len = settings.read_len();
        let overflow = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = {
            let overflow = overflow.clone();
            let stop = stop.clone();
            let rate = settings.rate;
            let buffer_size = settings.sample_length as u32;
            let ring_capacity = read_len * RING_FRAMES;
            let device_name = settings.input_device.clone();

            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    let stream = match build_capture_stream(
                        device_name,
                        rate,
                        buffer_size,
                        ring_capacity,
                        overflow,
                    ) {
                        Ok((stream, cons)) => {
                            let _ = ready_tx.send(Ok(cons));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    while !stop.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(50));
                    }
                    drop(stream);
                    debug!("capture thread stopped, device released");
                })?
        };

        let cons = ready_rx
            .recv()
            .map_err(|_| Error::DeviceUnavailable("capture thread died during setup".into()))??;

        // Allow the device twice the acquisition period before a read is
        // declared stalled.
        let read_timeout = (settings.frame_duration() * 2).max(Duration::from_millis(100));

        Ok(Self {
            cons,
            pending: Vec::with_capacity(read_len),
            scratch: vec![0; read_len],
            read_len,
            read_timeout,
            shutdown,
            overflow,
            stop,
            worker: Some(worker),
            consecutive_overruns: 0,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        cons: HeapConsumer<i16>,
        read_len: usize,
        read_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cons,
            pending: Vec::with_capacity(read_len),
            scratch: vec![0; read_len],
            read_len,
            read_timeout,
            shutdown,
            overflow: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            consecutive_overruns: 0,
        }
    }

    fn drain_ring(&mut self) {
        loop {
            let n = self.cons.pop_slice(&mut self.scratch);
            self.pending.extend_from_slice(&self.scratch[..n]);
            if n < self.scratch.len() {
                break;
            }
        }
    }

    /// Overrun policy: return what arrived, zero-padded to length, so the
    /// pipeline keeps its timing. Repeated stalls escalate.
    fn pad_out(&mut self) -> Result<SampleBuffer, Error> {
        let missing = self.read_len - self.pending.len();
        self.consecutive_overruns += 1;
        if self.consecutive_overruns >= MAX_CONSECUTIVE_OVERRUNS {
            error!(
                "device stalled for {} consecutive reads, giving up",
                self.consecutive_overruns
            );
            return Err(Error::CaptureOverrun { missing });
        }

        warn!("capture underrun, zero-padding {missing} missing samples");
        let mut buffer: SampleBuffer = self.pending.drain(..).collect();
        buffer.resize(self.read_len, 0);
        Ok(buffer)
    }
}

#[async_trait]
impl SampleSource for MicSource {
    async fn read(&mut self) -> Result<SampleBuffer, Error> {
        let deadline = Instant::now() + self.read_timeout;
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.shutdown.borrow() {
                return Err(Error::Cancelled);
            }

            self.drain_ring();

            if self.pending.len() >= self.read_len {
                if self.overflow.swap(false, Ordering::Relaxed) {
                    warn!("capture ring overflowed, oldest samples were dropped");
                }
                self.consecutive_overruns = 0;
                return Ok(self.pending.drain(..self.read_len).collect());
            }

            if Instant::now() >= deadline {
                return self.pad_out();
            }

            // A changed value is picked up by the check at the top of
            // the loop; a dropped sender means the process is exiting.
            tokio::select! {
                _ = poll.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            info!("audio device closed");
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Find the device, request mono capture at `rate` and start the stream.
/// Runs on the capture thread; the consumer half of the ring is handed
/// back to the opener.
fn build_capture_stream(
    device_name: Option<String>,
    rate: u32,
    buffer_size: u32,
    ring_capacity: usize,
    overflow: Arc<AtomicBool>,
) -> Result<(cpal::Stream, HeapConsumer<i16>), Error> {
    let host = cpal::default_host();

    let device = match &device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| Error::DeviceUnavailable(format!("cannot enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .or_else(|| {
                warn!("input device {name:?} not found, falling back to default");
                host.default_input_device()
            }),
        None => host.default_input_device(),
    }
    .ok_or_else(|| Error::DeviceUnavailable("no input device found".into()))?;

    info!(
        "capturing from {:?} at {rate} Hz",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let sample_format = device
        .default_input_config()
        .map_err(|e| Error::DeviceUnavailable(format!("no default input config: {e}")))?
        .sample_format();

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(rate),
        buffer_size: BufferSize::Fixed(buffer_size),
    };

    // Some hosts refuse a fixed buffer size; retry with the default
    // before declaring the device unusable. Each attempt gets a fresh
    // ring because the producer half is consumed by the callback.
    let (prod, cons) = HeapRb::<i16>::new(ring_capacity).split();
    match try_build(&device, &config, sample_format, prod, overflow.clone()) {
        Ok(stream) => {
            start(stream, cons)
        }
        Err(e) => {
            debug!("fixed buffer size rejected ({e}), retrying with default");
            let config = StreamConfig {
                buffer_size: BufferSize::Default,
                ..config
            };
            let (prod, cons) = HeapRb::<i16>::new(ring_capacity).split();
            let stream = try_build(&device, &config, sample_format, prod, overflow)
                .map_err(|e| {
                    Error::DeviceUnavailable(format!("cannot open mono {rate} Hz capture: {e}"))
                })?;
            start(stream, cons)
        }
    }
}

fn start(
    stream: cpal::Stream,
    cons: HeapConsumer<i16>,
) -> Result<(cpal::Stream, HeapConsumer<i16>), Error> {
    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(format!("cannot start capture stream: {e}")))?;
    Ok((stream, cons))
}

/// Build the input stream for whichever sample format the device speaks,
/// converting to i16 in the callback.
fn try_build(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: cpal::SampleFormat,
    mut prod: HeapProducer<i16>,
    overflow: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let err_fn = |e| error!("audio stream error: {e}");

    match sample_format {
        cpal::SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    if prod.push(sample).is_err() {
                        overflow.store(true, Ordering::Relaxed);
                    }
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let signed = (sample as i32 - 32_768) as i16;
                    if prod.push(signed).is_err() {
                        overflow.store(true, Ordering::Relaxed);
                    }
                }
            },
            err_fn,
            None,
        ),
        // cpal reports f32 on most hosts; anything else is rejected by
        // the build call itself.
        _ => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    let scaled =
                        (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    if prod.push(scaled).is_err() {
                        overflow.store(true, Ordering::Relaxed);
                    }
                }
            },
            err_fn,
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_source(
        capacity: usize,
        read_len: usize,
        timeout: Duration,
    ) -> (HeapProducer<i16>, MicSource, watch::Sender<bool>) {
        let (prod, cons) = HeapRb::<i16>::new(capacity).split();
        let (tx, rx) = watch::channel(false);
        (prod, MicSource::from_parts(cons, read_len, timeout, rx), tx)
    }

    #[tokio::test]
    async fn read_returns_exactly_one_acquisition() {
        let (mut prod, mut source, _tx) = test_source(1024, 256, Duration::from_millis(200));

        let samples: Vec<i16> = (0..512).map(|i| i as i16).collect();
        prod.push_slice(&samples);

        let a = source.read().await.unwrap();
        let b = source.read().await.unwrap();
        assert_eq!(a, (0..256).map(|i| i as i16).collect::<Vec<_>>());
        assert_eq!(b, (256..512).map(|i| i as i16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stalled_read_is_zero_padded() {
        let (mut prod, mut source, _tx) = test_source(1024, 256, Duration::from_millis(30));

        prod.push_slice(&[7i16; 100]);

        let buffer = source.read().await.unwrap();
        assert_eq!(buffer.len(), 256);
        assert_eq!(&buffer[..100], &[7i16; 100][..]);
        assert_eq!(&buffer[100..], &[0i16; 156][..]);
    }

    #[tokio::test]
    async fn repeated_stalls_escalate() {
        let (_prod, mut source, _tx) = test_source(1024, 256, Duration::from_millis(10));

        for _ in 0..MAX_CONSECUTIVE_OVERRUNS - 1 {
            assert!(source.read().await.is_ok());
        }
        let err = source.read().await.unwrap_err();
        assert!(matches!(err, Error::CaptureOverrun { missing: 256 }));
    }

    #[tokio::test]
    async fn successful_read_resets_the_stall_counter() {
        let (mut prod, mut source, _tx) = test_source(1024, 64, Duration::from_millis(10));

        for _ in 0..MAX_CONSECUTIVE_OVERRUNS - 1 {
            assert!(source.read().await.is_ok());
        }
        prod.push_slice(&[1i16; 64]);
        assert_eq!(source.read().await.unwrap(), vec![1i16; 64]);

        // Counter restarted, the next stall is tolerated again.
        assert!(source.read().await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_unblocks_a_pending_read() {
        let (_prod, mut source, tx) = test_source(1024, 256, Duration::from_secs(10));

        let read = tokio::spawn(async move { source.read().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(500), read)
            .await
            .expect("read did not unblock after shutdown")
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
