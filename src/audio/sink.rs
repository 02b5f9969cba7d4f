//! Output sink abstraction and the ALSA-backed implementation.
//!
//! The sink exposes the three operations the playback scheduler needs: a
//! monotonic clock (`now`), schedule-at-time, and per-voice stop. `AlsaSink`
//! realizes them with a dedicated writer thread: the clock is the count of
//! samples handed to the device over the negotiated rate, and voices are
//! cancelled via a per-handle flag checked between write slices so a
//! barge-in cuts audio within one period instead of draining the buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::alsa_device;
use super::speex::Resampler;
use crate::codec::PlaybackChunk;
use crate::config::Config;
use crate::error::SessionError;

/// A scheduled, not-yet-finished voice on the sink timeline.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl PlaybackHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// The operations the playback scheduler requires from an output device.
pub trait OutputSink: Send {
    /// Current position on the sink timeline, in seconds.
    fn now(&self) -> f64;

    /// Queue a buffer to start playing at `start` seconds on the timeline.
    fn schedule(&mut self, chunk: PlaybackChunk, start: f64) -> Result<PlaybackHandle, SessionError>;

    /// Stop one scheduled voice immediately.
    fn stop(&mut self, handle: &PlaybackHandle);

    /// Release the device. Idempotent.
    fn close(&mut self);
}

/// Sample-counter clock: seconds = frames written / device rate.
///
/// ALSA's blocking `writei` keeps this within one buffer depth of the real
/// playhead, which is all the cursor arithmetic needs.
struct SampleClock {
    frames: AtomicU64,
    rate: u32,
}

impl SampleClock {
    fn new(rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            rate,
        }
    }

    fn seconds(&self) -> f64 {
        self.frames.load(Ordering::SeqCst) as f64 / self.rate as f64
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::SeqCst);
    }
}

struct ScheduledBuffer {
    /// Mono samples at the inbound chunk rate.
    samples: Vec<i16>,
    /// Start position on the sink timeline, in seconds.
    start: f64,
    handle: PlaybackHandle,
}

pub struct AlsaSink {
    tx: Option<mpsc::Sender<ScheduledBuffer>>,
    clock: Arc<SampleClock>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    next_id: u64,
    chunk_rate: u32,
}

impl AlsaSink {
    /// Open the playback device and start the writer thread.
    ///
    /// Like the capture side, the device is opened on the writer thread and
    /// the outcome reported back synchronously.
    pub fn open(config: &Config) -> Result<Self, SessionError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let chunk_rate = config.playback_sample_rate;
        let config = config.clone();
        let (tx, rx) = mpsc::channel::<ScheduledBuffer>(256);
        let (open_tx, open_rx) =
            std::sync::mpsc::channel::<Result<Arc<SampleClock>, SessionError>>();

        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                if let Err(e) = writer_thread(&config, rx, &thread_running, &open_tx) {
                    log::error!("Playback thread error: {}", e);
                }
            })
            .map_err(|e| SessionError::DeviceUnavailable(format!("playback thread: {}", e)))?;

        match open_rx.recv() {
            Ok(Ok(clock)) => Ok(Self {
                tx: Some(tx),
                clock,
                running,
                handle: Some(handle),
                next_id: 0,
                chunk_rate,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::DeviceUnavailable(
                    "playback thread exited during open".to_string(),
                ))
            }
        }
    }
}

impl OutputSink for AlsaSink {
    fn now(&self) -> f64 {
        self.clock.seconds()
    }

    fn schedule(&mut self, chunk: PlaybackChunk, start: f64) -> Result<PlaybackHandle, SessionError> {
        let tx = self.tx.as_ref().ok_or(SessionError::ChannelClosed)?;
        if chunk.sample_rate != self.chunk_rate {
            log::warn!(
                "chunk rate {} differs from configured rate {}",
                chunk.sample_rate,
                self.chunk_rate
            );
        }
        let handle = PlaybackHandle::new(self.next_id);
        self.next_id += 1;

        let buffer = ScheduledBuffer {
            samples: chunk.samples,
            start,
            handle: handle.clone(),
        };
        tx.try_send(buffer).map_err(|e| match e {
            TrySendError::Full(_) => {
                SessionError::DeviceUnavailable("playback queue overflow".to_string())
            }
            TrySendError::Closed(_) => SessionError::ChannelClosed,
        })?;

        Ok(handle)
    }

    fn stop(&mut self, handle: &PlaybackHandle) {
        handle.cancel();
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender unblocks the writer's blocking_recv
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::info!("Playback sink closed");
        }
    }
}

impl Drop for AlsaSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn writer_thread(
    config: &Config,
    mut rx: mpsc::Receiver<ScheduledBuffer>,
    running: &AtomicBool,
    open_tx: &std::sync::mpsc::Sender<Result<Arc<SampleClock>, SessionError>>,
) -> Result<()> {
    // 1. Open the ALSA playback device; the outcome unblocks open()
    let period_size_opt = if config.playback_period_size > 0 {
        Some(config.playback_period_size)
    } else {
        None
    };
    let opened = alsa_device::open_playback(
        &config.playback_device,
        config.playback_sample_rate,
        config.playback_channels,
        period_size_opt,
    );
    let (pcm, params) = match opened {
        Ok(pair) => pair,
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return Ok(());
        }
    };

    let clock = Arc::new(SampleClock::new(params.sample_rate));
    let _ = open_tx.send(Ok(clock.clone()));

    let out_rate = params.sample_rate;
    let channels = params.channels as usize;
    let period_size = params.period_size.max(64);

    // Inbound chunks arrive at the configured playback rate
    let mut resampler = Resampler::new(1, config.playback_sample_rate, out_rate)?;

    let io = pcm.io_i16()?;

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        out_rate,
        channels,
        period_size,
    );

    while running.load(Ordering::Relaxed) {
        match rx.blocking_recv() {
            Some(buffer) => {
                if buffer.handle.is_cancelled() {
                    buffer.handle.mark_finished();
                    continue;
                }

                // Gap-fill silence when the scheduled start is ahead of the clock
                let now = clock.seconds();
                if buffer.start > now {
                    let mut gap = ((buffer.start - now) * out_rate as f64).round() as usize;
                    let silence = vec![0i16; period_size * channels];
                    while gap > 0 && running.load(Ordering::Relaxed) {
                        if buffer.handle.is_cancelled() {
                            break;
                        }
                        let frames = gap.min(period_size);
                        write_slice(&io, &pcm, &silence[..frames * channels], channels, &clock);
                        gap -= frames;
                    }
                    if buffer.handle.is_cancelled() {
                        buffer.handle.mark_finished();
                        continue;
                    }
                }

                // Resample chunk rate → device rate
                let max_out =
                    buffer.samples.len() * out_rate as usize / config.playback_sample_rate as usize
                        + 64;
                let mut resampled = vec![0i16; max_out];
                let (_consumed, produced) =
                    resampler.process_int(0, &buffer.samples, &mut resampled)?;
                let mono = &resampled[..produced as usize];

                // Fan mono out to the device channel count and write in
                // period slices, honoring cancellation between slices
                for slice in mono.chunks(period_size) {
                    if buffer.handle.is_cancelled() || !running.load(Ordering::Relaxed) {
                        break;
                    }
                    let interleaved = interleave(slice, channels);
                    write_slice(&io, &pcm, &interleaved, channels, &clock);
                }
                buffer.handle.mark_finished();
            }
            None => {
                log::info!("Playback queue closed");
                break;
            }
        }
    }

    log::info!("Playback loop exited");
    Ok(())
}

/// Duplicate mono samples across `channels`.
fn interleave(mono: &[i16], channels: usize) -> Vec<i16> {
    if channels == 1 {
        return mono.to_vec();
    }
    let mut out = Vec::with_capacity(mono.len() * channels);
    for &sample in mono {
        for _ in 0..channels {
            out.push(sample);
        }
    }
    out
}

/// Write one interleaved slice with XRUN recovery, advancing the clock by
/// the frames actually written. Bounded retries keep a wedged device from
/// dead-looping the writer (matching the capture side's recovery).
fn write_slice(
    io: &alsa::pcm::IO<i16>,
    pcm: &PCM,
    interleaved: &[i16],
    channels: usize,
    clock: &SampleClock,
) {
    let total_frames = interleaved.len() / channels;
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        let offset = frames_written * channels;
        match io.writei(&interleaved[offset..]) {
            Ok(n) => {
                frames_written += n;
                clock.advance(n as u64);
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA playback error: {}, recovering...", e);
                retry_count += 1;
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM playback: {}", e2);
                    return;
                }
                if retry_count >= 3 {
                    log::error!(
                        "Max recovery retries reached, dropping {} unwritten frames",
                        total_frames - frames_written
                    );
                    // Keep the timeline consistent for the frames we dropped
                    clock.advance((total_frames - frames_written) as u64);
                    return;
                }
            }
        }
    }
}
