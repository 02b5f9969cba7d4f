//! Session lifecycle states, published to the presentation layer.

/// The session state machine. Mutated only by the `SessionController`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session resources held.
    Idle,
    /// Resources are being acquired and the channel is connecting.
    Connecting,
    /// Duplex streaming is live.
    Connected,
    /// Streaming is live but outbound frames are discarded.
    Muted,
    /// Teardown in progress.
    Closing,
    /// A fatal error tore the session down; see `last_error`.
    Error,
}

/// Snapshot observable by the caller through a watch channel.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            last_error: None,
        }
    }
}
