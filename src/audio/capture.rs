//! Microphone capture source.
//!
//! Owns the ALSA capture device on a dedicated OS thread (NOT a tokio task)
//! that delivers fixed-size `AudioFrame`s over a channel at the wire sample
//! rate: read periods → downmix to mono → resample device rate → wire rate
//! → AGC gain normalization → emit.
//!
//! The device stays open while the session is muted; discarding muted
//! frames is the transport side's job, which avoids device reacquisition
//! latency on un-mute.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device;
use super::speex::{GainNormalizer, Resampler};
use crate::codec::AudioFrame;
use crate::config::Config;
use crate::error::SessionError;

/// Seam between the session controller and the concrete capture machinery,
/// so tests can substitute a mock.
pub trait CaptureHandle: Send {
    /// Stop callbacks and release the device. Idempotent.
    fn stop(&mut self);
}

pub struct CaptureSource {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSource {
    /// Open the capture device and start delivering frames on `frame_tx`.
    ///
    /// The device is opened on the capture thread, but the open outcome is
    /// reported back synchronously so acquisition failures
    /// (`PermissionDenied`, `DeviceUnavailable`) surface before the session
    /// reports itself connected.
    pub fn open(config: &Config, frame_tx: mpsc::Sender<AudioFrame>) -> Result<Self, SessionError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let config = config.clone();
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<(), SessionError>>();

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                if let Err(e) = capture_thread(&config, frame_tx, &thread_running, &open_tx) {
                    log::error!("Capture thread error: {}", e);
                }
            })
            .map_err(|e| SessionError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::DeviceUnavailable(
                    "capture thread exited during open".to_string(),
                ))
            }
        }
    }
}

impl CaptureHandle for CaptureSource {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::info!("Capture stopped");
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    config: &Config,
    frame_tx: mpsc::Sender<AudioFrame>,
    running: &AtomicBool,
    open_tx: &std::sync::mpsc::Sender<Result<(), SessionError>>,
) -> Result<()> {
    // 1. Open the ALSA capture device; the outcome unblocks open()
    let opened = alsa_device::open_capture(
        &config.capture_device,
        config.capture_sample_rate,
        config.capture_channels,
    );
    let (pcm, params) = match opened {
        Ok(pair) => {
            let _ = open_tx.send(Ok(()));
            pair
        }
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return Ok(());
        }
    };

    let actual_rate = params.sample_rate;
    let actual_channels = params.channels as usize;
    let period_size = params.period_size;
    let frame_samples = config.frame_samples;

    // 2. Resampler (device rate → wire rate) and AGC over outbound frames
    let mut resampler = Resampler::new(1, actual_rate, config.capture_sample_rate)?;
    let mut normalizer =
        GainNormalizer::new(frame_samples, config.capture_sample_rate, config.agc_level)?;

    // One period of interleaved device samples, its mono downmix, and the
    // wire-rate accumulator frames are cut from.
    let mut read_buf = vec![0i16; period_size * actual_channels];
    let mut mono_buf = vec![0i16; period_size];
    let mut wire_buf: Vec<i16> = Vec::with_capacity(frame_samples * 2);

    let io = pcm.io_i16()?;

    let mut seq: u64 = 0;

    log::info!(
        "Capture started: rate={}, ch={}, period={}, frame_samples={}",
        actual_rate,
        actual_channels,
        period_size,
        frame_samples,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                downmix_mono(&read_buf, actual_channels, &mut mono_buf[..frames]);

                // Resample this period to the wire rate and accumulate
                let max_out =
                    frames * config.capture_sample_rate as usize / actual_rate as usize + 64;
                let mut resampled = vec![0i16; max_out];
                let (_consumed, produced) =
                    resampler.process_int(0, &mono_buf[..frames], &mut resampled)?;
                wire_buf.extend_from_slice(&resampled[..produced as usize]);

                // Emit complete fixed-size frames
                while wire_buf.len() >= frame_samples {
                    let mut samples: Vec<i16> = wire_buf.drain(..frame_samples).collect();
                    normalizer.process(&mut samples);

                    let frame = AudioFrame {
                        samples,
                        sample_rate: config.capture_sample_rate,
                        seq,
                    };
                    seq += 1;
                    if seq % 100 == 0 {
                        log::debug!("captured {} frames at {} Hz", seq, frame.sample_rate);
                    }

                    if frame_tx.blocking_send(frame).is_err() {
                        log::warn!("Frame receiver dropped, stopping capture");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture loop exited");
    Ok(())
}

/// Average interleaved channels down to mono.
fn downmix_mono(interleaved: &[i16], channels: usize, mono: &mut [i16]) {
    if channels == 1 {
        mono.copy_from_slice(&interleaved[..mono.len()]);
        return;
    }
    for (i, out) in mono.iter_mut().enumerate() {
        let mut sum: i32 = 0;
        for c in 0..channels {
            sum += interleaved[i * channels + c] as i32;
        }
        *out = (sum / channels as i32) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let interleaved = [100i16, 300, -50, 50, 0, 0];
        let mut mono = [0i16; 3];
        downmix_mono(&interleaved, 2, &mut mono);
        assert_eq!(mono, [200, 0, 0]);
    }

    #[test]
    fn downmix_mono_is_passthrough() {
        let interleaved = [1i16, 2, 3];
        let mut mono = [0i16; 3];
        downmix_mono(&interleaved, 1, &mut mono);
        assert_eq!(mono, [1, 2, 3]);
    }
}
