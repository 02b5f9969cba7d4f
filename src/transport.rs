//! WebSocket channel to the translation service.
//!
//! `connect` performs the upgrade handshake with auth headers, sends the
//! hello message, and spawns a writer task (command queue → socket) and a
//! reader task (socket → typed inbound events, in server-emission order).
//! `send_audio` is fire-and-forget; `close` is idempotent and never waits
//! on the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::config::Config;
use crate::error::SessionError;
use crate::protocol::{AudioMessage, AudioParams, HelloMessage, ServerMessage, TranslationParams};

/// Inbound events, delivered in the order the server emitted them.
#[derive(Debug)]
pub enum TransportEvent {
    /// Base64 PCM payload of synthesized translation audio.
    Audio(String),
    /// The server flushed its own output; stale playback must be dropped.
    Interrupted,
    /// Orderly close initiated by the server.
    Closed,
    /// Channel failure; the session tears down with this reason.
    Error(String),
}

/// Seam between the session controller and the concrete channel, so tests
/// can substitute a mock.
pub trait TransportLink: Send {
    /// Queue one encoded frame. Fire-and-forget: a full queue drops the
    /// frame with a warning, a closed channel returns `ChannelClosed`.
    fn send_audio(&self, data: String) -> Result<(), SessionError>;

    /// Close the channel. Idempotent; never blocks on the network.
    fn close(&mut self);
}

enum TransportCommand {
    Audio(String),
    Close,
}

pub struct Transport {
    cmd_tx: mpsc::Sender<TransportCommand>,
    closed: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Transport {
    /// Connect, authenticate, and send the hello message declaring the
    /// stream format and language pair. Inbound events flow to `event_tx`.
    pub async fn connect(
        config: &Config,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, SessionError> {
        let url = Url::parse(&config.ws_url)
            .map_err(|e| SessionError::NetworkError(format!("invalid endpoint: {}", e)))?;
        let host = url.host_str().unwrap_or_default().to_string();

        let request = tungstenite::http::Request::builder()
            .method("GET")
            .uri(&config.ws_url)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Bearer {}", config.ws_token))
            .header("Client-Id", &config.client_id)
            .header("Protocol-Version", "1")
            .body(())
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        log::info!("Connecting to {}...", config.ws_url);
        let (ws_stream, _) = connect_async(request).await.map_err(classify_connect_error)?;
        log::info!("Channel connected");

        let (mut write, mut read) = ws_stream.split();

        let hello = HelloMessage {
            msg_type: "hello".to_string(),
            version: 1,
            transport: "websocket".to_string(),
            audio_params: AudioParams {
                format: "pcm16".to_string(),
                sample_rate: config.capture_sample_rate,
                channels: 1,
                frame_duration: (config.frame_period() * 1000.0).round() as u32,
            },
            translation: TranslationParams {
                source: config.source_lang.clone(),
                target: config.target_lang.clone(),
            },
        };
        let hello_json =
            serde_json::to_string(&hello).map_err(|e| SessionError::NetworkError(e.to_string()))?;
        write
            .send(Message::Text(hello_json.into()))
            .await
            .map_err(|e| SessionError::NetworkError(e.to_string()))?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransportCommand>(64);
        let closed = Arc::new(AtomicBool::new(false));

        let writer_events = event_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    TransportCommand::Audio(data) => {
                        let envelope = match serde_json::to_string(&AudioMessage::new(&data)) {
                            Ok(json) => json,
                            Err(e) => {
                                log::error!("Failed to serialize audio envelope: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(envelope.into())).await {
                            log::warn!("WebSocket send failed: {}", e);
                            let _ = writer_events
                                .send(TransportEvent::Error(e.to_string()))
                                .await;
                            break;
                        }
                    }
                    TransportCommand::Close => {
                        // Best-effort close frame; failure is logged, not fatal
                        if let Err(e) = write.send(Message::Close(None)).await {
                            log::warn!("Failed to deliver close frame: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        let reader_events = event_tx;
        let reader = tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let msg: ServerMessage = match serde_json::from_str(&text) {
                            Ok(msg) => msg,
                            Err(_) => {
                                log::warn!("Ignoring non-JSON text message");
                                continue;
                            }
                        };
                        if let Some(sid) = &msg.session_id {
                            log::trace!("server session {}", sid);
                        }
                        match msg.msg_type.as_str() {
                            "audio" => match msg.data {
                                Some(data) => {
                                    if reader_events.send(TransportEvent::Audio(data)).await.is_err()
                                    {
                                        break;
                                    }
                                }
                                None => log::warn!("audio message without payload"),
                            },
                            "interrupted" => {
                                if reader_events
                                    .send(TransportEvent::Interrupted)
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            "error" => {
                                let reason = msg
                                    .message
                                    .unwrap_or_else(|| "unspecified server error".to_string());
                                let _ = reader_events.send(TransportEvent::Error(reason)).await;
                                break;
                            }
                            "goodbye" => {
                                let _ = reader_events.send(TransportEvent::Closed).await;
                                break;
                            }
                            other => {
                                log::debug!("Unhandled message type: {}", other);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Server closed connection: {:?}", frame);
                        let _ = reader_events.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = reader_events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = reader_events.send(TransportEvent::Closed).await;
                        break;
                    }
                }
            }
        });

        Ok(Self {
            cmd_tx,
            closed,
            writer: Some(writer),
            reader: Some(reader),
        })
    }
}

impl TransportLink for Transport {
    fn send_audio(&self, data: String) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::ChannelClosed);
        }
        match self.cmd_tx.try_send(TransportCommand::Audio(data)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Outbound queue full, dropping frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::ChannelClosed),
        }
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.cmd_tx.try_send(TransportCommand::Close).is_err() {
            log::warn!("Transport close frame not delivered");
            if let Some(writer) = self.writer.take() {
                writer.abort();
            }
        }
        // Local teardown must not wait for in-flight reads
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        log::info!("Transport closed");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn classify_connect_error(e: tungstenite::Error) -> SessionError {
    match e {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            SessionError::AuthRejected
        }
        tungstenite::Error::Io(io)
            if io.kind() == std::io::ErrorKind::ConnectionRefused =>
        {
            SessionError::ConnectionRefused(io.to_string())
        }
        other => SessionError::NetworkError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_unauthorized_maps_to_auth_rejected() {
        let response = tungstenite::http::Response::builder()
            .status(401)
            .body(None)
            .unwrap();
        let err = classify_connect_error(tungstenite::Error::Http(Box::new(response)));
        assert_eq!(err, SessionError::AuthRejected);
    }

    #[test]
    fn refused_io_maps_to_connection_refused() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = classify_connect_error(tungstenite::Error::Io(io));
        assert!(matches!(err, SessionError::ConnectionRefused(_)));
    }

    #[test]
    fn other_errors_map_to_network_error() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = classify_connect_error(tungstenite::Error::Io(io));
        assert!(matches!(err, SessionError::NetworkError(_)));
    }
}
