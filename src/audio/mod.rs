//! audio - capture, scheduled playback, and DSP library
//!
//! Uses ALSA for device I/O and SpeexDSP for resampling and gain
//! normalization. Device-facing work runs on dedicated OS threads; the
//! session layer talks to this module only through channels, the
//! `OutputSink` trait, and the `CaptureHandle` trait.

mod alsa_device;
pub mod capture;
pub mod scheduler;
pub mod sink;
mod speex;

pub use capture::{CaptureHandle, CaptureSource};
pub use scheduler::PlaybackScheduler;
pub use sink::{AlsaSink, OutputSink, PlaybackHandle};
