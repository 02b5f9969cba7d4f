//! Session error taxonomy.
//!
//! Every kind except `MalformedAudioData` is fatal to the session: the
//! controller tears everything down and surfaces the Display string as
//! `last_error`. `MalformedAudioData` is recovered locally by dropping the
//! offending chunk.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone access was denied by the OS.
    #[error("PermissionDenied")]
    PermissionDenied,

    /// An audio device could not be opened or went away.
    #[error("DeviceUnavailable: {0}")]
    DeviceUnavailable(String),

    /// TCP-level connection refusal from the service endpoint.
    #[error("ConnectionRefused: {0}")]
    ConnectionRefused(String),

    /// The service rejected our credentials during the handshake.
    #[error("AuthRejected")]
    AuthRejected,

    /// Any other transport failure, before or after connect.
    #[error("NetworkError: {0}")]
    NetworkError(String),

    /// Send attempted on a channel that has already closed.
    #[error("ChannelClosed")]
    ChannelClosed,

    /// Inbound audio payload that cannot be decoded. Never fatal.
    #[error("MalformedAudioData: {0}")]
    MalformedAudioData(String),
}
