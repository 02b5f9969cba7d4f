//! ALSA PCM device wrappers for audio capture and playback.
//!
//! Open failures are mapped onto the session error taxonomy: EACCES/EPERM
//! become `PermissionDenied`, everything else `DeviceUnavailable`.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::error::SessionError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, AlsaParams), SessionError> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), SessionError> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams), SessionError> {
    let pcm = PCM::new(device, direction, false)
        .map_err(|e| classify_open_error(device, dir_name, &e))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(|e| device_error(device, dir_name, &e))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| device_error(device, dir_name, &e))?;
        hwp.set_format(Format::S16LE)
            .map_err(|e| device_error(device, dir_name, &e))?;
        hwp.set_channels(channels)
            .map_err(|e| device_error(device, dir_name, &e))?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(|e| device_error(device, dir_name, &e))?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(|e| device_error(device, dir_name, &e))?;
        }
        pcm.hw_params(&hwp)
            .map_err(|e| device_error(device, dir_name, &e))?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm
            .hw_params_current()
            .map_err(|e| device_error(device, dir_name, &e))?;
        let rate = hwp.get_rate().map_err(|e| device_error(device, dir_name, &e))?;
        let ch = hwp
            .get_channels()
            .map_err(|e| device_error(device, dir_name, &e))?;
        let ps = hwp
            .get_period_size()
            .map_err(|e| device_error(device, dir_name, &e))? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

/// Classify the initial open error: access denial is its own kind so the
/// caller can distinguish "no permission" from "no such device".
fn classify_open_error(device: &str, dir_name: &str, e: &alsa::Error) -> SessionError {
    let errno = e.errno().abs();
    if errno == libc::EACCES || errno == libc::EPERM {
        SessionError::PermissionDenied
    } else {
        device_error(device, dir_name, e)
    }
}

fn device_error(device: &str, dir_name: &str, e: &alsa::Error) -> SessionError {
    SessionError::DeviceUnavailable(format!("{} device '{}': {}", dir_name, device, e))
}
