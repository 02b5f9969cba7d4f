//! Session controller: the state machine supervising capture, transport,
//! and playback for one live translation session.
//!
//! Control flow is a single tokio select loop per session, fed by three
//! sources on one logical sequence: control commands, capture frames, and
//! transport events. The mute flag and the playback cursor are only touched
//! from this loop, so neither needs a lock.
//!
//! Teardown is centralized, idempotent, and runs on every exit path. A
//! session-generation token is bumped on teardown so anything still in
//! flight for a torn-down session is detected and discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::capture::CaptureHandle;
use crate::audio::scheduler::PlaybackScheduler;
use crate::audio::sink::OutputSink;
use crate::audio::{AlsaSink, CaptureSource};
use crate::codec::{self, AudioFrame};
use crate::config::Config;
use crate::error::SessionError;
use crate::guard::ResourceGuard;
use crate::state::{SessionState, SessionStatus};
use crate::transport::{Transport, TransportEvent, TransportLink};

/// Frames buffered between the capture thread and the run loop. Capture
/// back-pressures on `blocking_send` when this fills, which is what bounds
/// pre-Connected buffering deterministically.
const FRAME_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Seam between the controller and the concrete device/network stacks.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn open_capture(
        &self,
        config: &Config,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn CaptureHandle>, SessionError>;

    fn open_sink(&self, config: &Config) -> Result<Box<dyn OutputSink>, SessionError>;

    async fn connect(
        &self,
        config: &Config,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportLink>, SessionError>;
}

/// Production backend: ALSA devices and the WebSocket channel.
pub struct AlsaWsBackend;

#[async_trait]
impl SessionBackend for AlsaWsBackend {
    fn open_capture(
        &self,
        config: &Config,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn CaptureHandle>, SessionError> {
        Ok(Box::new(CaptureSource::open(config, frames)?))
    }

    fn open_sink(&self, config: &Config) -> Result<Box<dyn OutputSink>, SessionError> {
        Ok(Box::new(AlsaSink::open(config)?))
    }

    async fn connect(
        &self,
        config: &Config,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportLink>, SessionError> {
        Ok(Box::new(Transport::connect(config, events).await?))
    }
}

enum SessionCommand {
    Stop,
    ToggleMute,
}

struct ActiveSession {
    ctrl_tx: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

/// Everything one live session owns. Destroyed, in full, by `teardown`.
struct SessionParts {
    frame_rx: mpsc::Receiver<AudioFrame>,
    event_rx: mpsc::Receiver<TransportEvent>,
    capture: ResourceGuard<Box<dyn CaptureHandle>>,
    transport: ResourceGuard<Box<dyn TransportLink>>,
    scheduler: PlaybackScheduler,
}

pub struct SessionController {
    config: Config,
    backend: Arc<dyn SessionBackend>,
    status: Arc<watch::Sender<SessionStatus>>,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(config: Config, backend: Arc<dyn SessionBackend>) -> Self {
        let (status, _) = watch::channel(SessionStatus::idle());
        Self {
            config,
            backend,
            status: Arc::new(status),
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Observable session status for the presentation layer.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// `Idle/Error → Connecting → Connected`, or `→ Error` when any
    /// acquisition fails. A no-op while a session is already live.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.take() {
            let state = self.status.borrow().state;
            let live = matches!(
                state,
                SessionState::Connecting
                    | SessionState::Connected
                    | SessionState::Muted
                    | SessionState::Closing
            );
            if live && !session.task.is_finished() {
                *active = Some(session);
                log::warn!("start() ignored: session already active");
                return Ok(());
            }
            // Previous session ended (or is returning right now); let the
            // task run to completion before replacing it
            let _ = session.task.await;
        }

        set_status(&self.status, SessionState::Connecting, None);

        let parts = match self.acquire().await {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("Session start failed: {}", e);
                set_status(&self.status, SessionState::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        set_status(&self.status, SessionState::Connected, None);
        log::info!("Session connected");

        let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
        let my_gen = self.generation.load(Ordering::SeqCst);
        let task = tokio::spawn(run_session(
            parts,
            ctrl_rx,
            self.status.clone(),
            self.generation.clone(),
            my_gen,
            self.config.playback_sample_rate,
        ));

        *active = Some(ActiveSession { ctrl_tx, task });
        Ok(())
    }

    /// Acquire microphone, output sink, and transport in that order, so a
    /// denied microphone aborts before any connection attempt. Partial
    /// acquisitions are released on the failure paths.
    async fn acquire(&self) -> Result<SessionParts, SessionError> {
        let (frame_tx, mut frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let capture = self.backend.open_capture(&self.config, frame_tx)?;
        let mut capture = ResourceGuard::new("capture", capture, |mut c| c.stop());

        let sink = match self.backend.open_sink(&self.config) {
            Ok(sink) => sink,
            Err(e) => {
                frame_rx.close();
                capture.release();
                return Err(e);
            }
        };
        let mut scheduler = PlaybackScheduler::new(sink);

        let transport = match self.backend.connect(&self.config, event_tx).await {
            Ok(transport) => transport,
            Err(e) => {
                scheduler.close();
                frame_rx.close();
                capture.release();
                return Err(e);
            }
        };
        let transport = ResourceGuard::new("transport", transport, |mut t| t.close());

        Ok(SessionParts {
            frame_rx,
            event_rx,
            capture,
            transport,
            scheduler,
        })
    }

    /// Tear the session down into `Idle`. Callable from any state, never
    /// waits on the network, and is idempotent.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(session) => {
                // If the loop already exited on its own the send fails and
                // the join returns immediately; both are fine.
                let _ = session.ctrl_tx.send(SessionCommand::Stop).await;
                let _ = session.task.await;
            }
            None => log::debug!("stop() with no active session"),
        }
    }

    /// Flip the outbound filter flag. The capture device is not touched.
    pub async fn toggle_mute(&self) {
        let active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            let _ = session.ctrl_tx.send(SessionCommand::ToggleMute).await;
        }
    }
}

async fn run_session(
    mut parts: SessionParts,
    mut ctrl_rx: mpsc::Receiver<SessionCommand>,
    status: Arc<watch::Sender<SessionStatus>>,
    generation: Arc<AtomicU64>,
    my_gen: u64,
    playback_sample_rate: u32,
) {
    let mut muted = false;

    loop {
        // Late wakeups for a torn-down session are discarded
        if generation.load(Ordering::SeqCst) != my_gen {
            log::debug!("stale session loop exiting");
            break;
        }

        tokio::select! {
            Some(cmd) = ctrl_rx.recv() => match cmd {
                SessionCommand::Stop => {
                    teardown(&mut parts, &status, &generation);
                    set_status(&status, SessionState::Idle, None);
                    break;
                }
                SessionCommand::ToggleMute => {
                    muted = !muted;
                    log::info!("Mute {}", if muted { "on" } else { "off" });
                    let state = if muted { SessionState::Muted } else { SessionState::Connected };
                    set_status(&status, state, None);
                }
            },

            Some(frame) = parts.frame_rx.recv() => {
                if muted {
                    // Capture keeps running; muting is a transport-side policy
                    continue;
                }
                let data = codec::encode_frame(&frame);
                let sent = match parts.transport.get() {
                    Some(transport) => transport.send_audio(data),
                    None => Err(SessionError::ChannelClosed),
                };
                if let Err(e) = sent {
                    log::error!("Outbound send failed: {}", e);
                    teardown(&mut parts, &status, &generation);
                    set_status(&status, SessionState::Error, Some(e.to_string()));
                    break;
                }
            },

            Some(event) = parts.event_rx.recv() => match event {
                TransportEvent::Audio(data) => {
                    match codec::decode_chunk(&data, playback_sample_rate) {
                        Ok(chunk) => {
                            if let Err(e) = parts.scheduler.schedule(chunk) {
                                log::error!("Playback scheduling failed: {}", e);
                                teardown(&mut parts, &status, &generation);
                                set_status(&status, SessionState::Error, Some(e.to_string()));
                                break;
                            }
                        }
                        // Recovered locally: drop the chunk, session continues
                        Err(e) => log::warn!("Dropping audio chunk: {}", e),
                    }
                }
                TransportEvent::Interrupted => {
                    parts.scheduler.interrupt();
                }
                TransportEvent::Closed => {
                    log::info!("Session closed by server");
                    teardown(&mut parts, &status, &generation);
                    set_status(&status, SessionState::Idle, None);
                    break;
                }
                TransportEvent::Error(reason) => {
                    let e = SessionError::NetworkError(reason);
                    log::error!("Transport error: {}", e);
                    teardown(&mut parts, &status, &generation);
                    set_status(&status, SessionState::Error, Some(e.to_string()));
                    break;
                }
            },

            else => {
                teardown(&mut parts, &status, &generation);
                set_status(&status, SessionState::Idle, None);
                break;
            }
        }
    }
}

/// Release everything the session owns. Each resource checks its own
/// already-released state, so overlapping error and user-initiated paths
/// are safe.
fn teardown(
    parts: &mut SessionParts,
    status: &watch::Sender<SessionStatus>,
    generation: &AtomicU64,
) {
    set_status(status, SessionState::Closing, None);
    generation.fetch_add(1, Ordering::SeqCst);

    // Disconnect the wiring first: a capture thread blocked on a full frame
    // channel must be released before its join
    parts.frame_rx.close();
    parts.event_rx.close();

    parts.scheduler.close();
    parts.capture.release();
    parts.transport.release();
}

fn set_status(status: &watch::Sender<SessionStatus>, state: SessionState, last_error: Option<String>) {
    status.send_replace(SessionStatus { state, last_error });
}
