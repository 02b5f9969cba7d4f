//! Shared mocks for the session, scheduler, and transport tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::capture::CaptureHandle;
use crate::audio::sink::{OutputSink, PlaybackHandle};
use crate::codec::{AudioFrame, PlaybackChunk};
use crate::config::Config;
use crate::error::SessionError;
use crate::session::SessionBackend;
use crate::transport::{TransportEvent, TransportLink};

// ======================== Output sink ========================

#[derive(Debug, Clone)]
pub struct ScheduledVoice {
    pub id: u64,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct MockSinkState {
    pub now: f64,
    pub scheduled: Vec<ScheduledVoice>,
    pub stopped: Vec<u64>,
    pub closed: bool,
    pub handles: Vec<PlaybackHandle>,
}

pub struct MockSink {
    state: Arc<Mutex<MockSinkState>>,
    next_id: u64,
}

impl MockSink {
    pub fn new(now: f64) -> (Self, Arc<Mutex<MockSinkState>>) {
        let state = Arc::new(Mutex::new(MockSinkState {
            now,
            ..Default::default()
        }));
        (
            Self {
                state: state.clone(),
                next_id: 0,
            },
            state,
        )
    }
}

impl OutputSink for MockSink {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&mut self, chunk: PlaybackChunk, start: f64) -> Result<PlaybackHandle, SessionError> {
        let handle = PlaybackHandle::new(self.next_id);
        let mut state = self.state.lock().unwrap();
        state.scheduled.push(ScheduledVoice {
            id: self.next_id,
            start,
            duration: chunk.duration,
        });
        state.handles.push(handle.clone());
        self.next_id += 1;
        Ok(handle)
    }

    fn stop(&mut self, handle: &PlaybackHandle) {
        handle.cancel();
        handle.mark_finished();
        self.state.lock().unwrap().stopped.push(handle.id());
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

// ======================== Capture ========================

#[derive(Default)]
pub struct MockCaptureState {
    pub stop_calls: u32,
}

pub struct MockCapture {
    state: Arc<Mutex<MockCaptureState>>,
}

impl CaptureHandle for MockCapture {
    fn stop(&mut self) {
        self.state.lock().unwrap().stop_calls += 1;
    }
}

// ======================== Transport ========================

#[derive(Default)]
pub struct MockTransportState {
    pub sent: Vec<String>,
    pub close_calls: u32,
}

pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl TransportLink for MockTransport {
    fn send_audio(&self, data: String) -> Result<(), SessionError> {
        self.state.lock().unwrap().sent.push(data);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().close_calls += 1;
    }
}

// ======================== Backend ========================

#[derive(Default)]
pub struct MockBackendShared {
    pub frame_tx: Option<mpsc::Sender<AudioFrame>>,
    pub event_tx: Option<mpsc::Sender<TransportEvent>>,
    pub connect_attempted: bool,
    pub capture: Option<Arc<Mutex<MockCaptureState>>>,
    pub sink: Option<Arc<Mutex<MockSinkState>>>,
    pub transport: Option<Arc<Mutex<MockTransportState>>>,
}

pub struct MockBackend {
    fail_capture: Option<SessionError>,
    fail_sink: Option<SessionError>,
    fail_connect: Option<SessionError>,
    shared: Arc<Mutex<MockBackendShared>>,
}

impl MockBackend {
    pub fn working() -> (Arc<Self>, Arc<Mutex<MockBackendShared>>) {
        Self::build(None, None, None)
    }

    pub fn failing_capture(e: SessionError) -> (Arc<Self>, Arc<Mutex<MockBackendShared>>) {
        Self::build(Some(e), None, None)
    }

    pub fn failing_sink(e: SessionError) -> (Arc<Self>, Arc<Mutex<MockBackendShared>>) {
        Self::build(None, Some(e), None)
    }

    pub fn failing_connect(e: SessionError) -> (Arc<Self>, Arc<Mutex<MockBackendShared>>) {
        Self::build(None, None, Some(e))
    }

    fn build(
        fail_capture: Option<SessionError>,
        fail_sink: Option<SessionError>,
        fail_connect: Option<SessionError>,
    ) -> (Arc<Self>, Arc<Mutex<MockBackendShared>>) {
        let shared = Arc::new(Mutex::new(MockBackendShared::default()));
        (
            Arc::new(Self {
                fail_capture,
                fail_sink,
                fail_connect,
                shared: shared.clone(),
            }),
            shared,
        )
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    fn open_capture(
        &self,
        _config: &Config,
        frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Box<dyn CaptureHandle>, SessionError> {
        if let Some(e) = &self.fail_capture {
            return Err(e.clone());
        }
        let state = Arc::new(Mutex::new(MockCaptureState::default()));
        let mut shared = self.shared.lock().unwrap();
        shared.frame_tx = Some(frames);
        shared.capture = Some(state.clone());
        Ok(Box::new(MockCapture { state }))
    }

    fn open_sink(&self, _config: &Config) -> Result<Box<dyn OutputSink>, SessionError> {
        if let Some(e) = &self.fail_sink {
            return Err(e.clone());
        }
        let (sink, state) = MockSink::new(0.0);
        self.shared.lock().unwrap().sink = Some(state);
        Ok(Box::new(sink))
    }

    async fn connect(
        &self,
        _config: &Config,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportLink>, SessionError> {
        self.shared.lock().unwrap().connect_attempted = true;
        if let Some(e) = &self.fail_connect {
            return Err(e.clone());
        }
        let state = Arc::new(Mutex::new(MockTransportState::default()));
        let mut shared = self.shared.lock().unwrap();
        shared.event_tx = Some(events);
        shared.transport = Some(state.clone());
        Ok(Box::new(MockTransport { state }))
    }
}

// ======================== Helpers ========================

/// Poll `condition` until it holds, panicking after ~1 s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not met within timeout");
}
