//! Full-duplex streaming session with the remote examiner agent.
//!
//! One WebSocket connection per interview session. Outbound audio frames
//! are fire-and-forget through a writer task — the capture path never
//! waits on the network and never observes a send failure. Inbound
//! messages are demultiplexed by a reader task onto a single event
//! channel consumed by the session supervisor.

pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::pcm::WireAudioPacket;

/// Marker the agent backend uses when the model or credential selection
/// does not exist. Distinguished because retrying is pointless until the
/// user re-selects a key.
const ENTITY_NOT_FOUND_MARKER: &str = "Requested entity was not found";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Types ───────────────────────────────────────────────────────────

/// Which side of the conversation produced a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Examiner,
    Candidate,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Examiner => write!(f, "Examiner"),
            Self::Candidate => write!(f, "You"),
        }
    }
}

/// Everything the remote side can send us, one event per payload.
#[derive(Debug)]
pub enum InboundEvent {
    /// Synthesized speech: PCM16 bytes at the given rate/channel count.
    AudioSegment {
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    },
    /// One transcript fragment, tagged by speaker side.
    TranscriptFragment { speaker: Speaker, text: String },
    /// The user started speaking over playback; flush everything queued.
    Interrupted,
    /// The remote side closed the session.
    Closed,
    /// The connection failed mid-session.
    Error(String),
}

/// Connection establishment failures.
#[derive(Debug)]
pub enum ConnectError {
    Network(String),
    Auth(String),
    /// The requested model or API key selection does not exist. The caller
    /// must resolve this interactively before retrying; it is not a
    /// transient fault.
    EntityNotFound(String),
}

impl ConnectError {
    /// Stable error code for the IPC boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::EntityNotFound(_) => "entity_not_found",
        }
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "connection failed: {msg}"),
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::EntityNotFound(msg) => write!(f, "entity not found: {msg}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice_name: String,
}

enum Outbound {
    Audio(WireAudioPacket),
    Close,
}

/// Handle to one established voice channel.
///
/// Cheap to keep around after close: every operation becomes a no-op once
/// the closed flag is set.
pub struct LiveSession {
    outbound: UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

// ── Connect ─────────────────────────────────────────────────────────

/// Establish the voice channel and complete the setup handshake.
///
/// On success the returned receiver carries every inbound event for the
/// lifetime of the session, ending with `Closed` or `Error`.
pub async fn connect(
    config: &LiveConfig,
    system_instruction: &str,
) -> Result<(LiveSession, UnboundedReceiver<InboundEvent>), ConnectError> {
    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectError::Network(format!("bad endpoint: {e}")))?;
    let key = HeaderValue::from_str(&config.api_key)
        .map_err(|_| ConnectError::Auth("API key contains invalid characters".to_string()))?;
    request.headers_mut().insert("x-goog-api-key", key);

    let (mut ws, _response) = connect_async(request).await.map_err(classify_handshake_error)?;

    let setup = wire::SetupMessage::new(&config.model, &config.voice_name, system_instruction);
    let json = serde_json::to_string(&setup)
        .map_err(|e| ConnectError::Network(format!("failed to encode setup: {e}")))?;
    ws.send(Message::Text(json))
        .await
        .map_err(|e| ConnectError::Network(format!("failed to send setup: {e}")))?;

    await_setup_complete(&mut ws).await?;
    info!(model = %config.model, "Voice channel established");

    let (ws_tx, ws_rx) = ws.split();
    let closed = Arc::new(AtomicBool::new(false));
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(ws_tx, out_rx, Arc::clone(&closed)));
    tokio::spawn(read_loop(ws_rx, event_tx, Arc::clone(&closed)));

    Ok((
        LiveSession {
            outbound: out_tx,
            closed,
        },
        event_rx,
    ))
}

fn classify_handshake_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            if body.contains(ENTITY_NOT_FOUND_MARKER) || status == http::StatusCode::NOT_FOUND {
                ConnectError::EntityNotFound(format!("HTTP {status}: {body}"))
            } else if status == http::StatusCode::UNAUTHORIZED
                || status == http::StatusCode::FORBIDDEN
            {
                ConnectError::Auth(format!("HTTP {status}: {body}"))
            } else {
                ConnectError::Network(format!("handshake rejected: HTTP {status}"))
            }
        }
        other => ConnectError::Network(other.to_string()),
    }
}

/// Classify a close reason delivered during setup.
fn classify_setup_close(reason: &str) -> ConnectError {
    if reason.contains(ENTITY_NOT_FOUND_MARKER) {
        ConnectError::EntityNotFound(reason.to_string())
    } else {
        ConnectError::Network(format!("connection closed during setup: {reason}"))
    }
}

async fn await_setup_complete(ws: &mut WsStream) -> Result<(), ConnectError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if setup_done(text.as_bytes())? {
                    return Ok(());
                }
            }
            Some(Ok(Message::Binary(data))) => {
                if setup_done(&data)? {
                    return Ok(());
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(classify_setup_close(&reason));
            }
            Some(Ok(_)) => {} // ping/pong
            Some(Err(e)) => return Err(ConnectError::Network(e.to_string())),
            None => {
                return Err(ConnectError::Network(
                    "connection closed during setup".to_string(),
                ))
            }
        }
    }
}

fn setup_done(payload: &[u8]) -> Result<bool, ConnectError> {
    match serde_json::from_slice::<wire::ServerMessage>(payload) {
        Ok(msg) => Ok(msg.setup_complete.is_some()),
        Err(_) => {
            // Not a server message we model. An error body naming a missing
            // entity still has to surface as the distinguished kind.
            let text = String::from_utf8_lossy(payload);
            if text.contains(ENTITY_NOT_FOUND_MARKER) {
                Err(ConnectError::EntityNotFound(text.into_owned()))
            } else {
                debug!("Ignoring unrecognized setup-phase message");
                Ok(false)
            }
        }
    }
}

// ── Session I/O ─────────────────────────────────────────────────────

async fn write_loop(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut rx: UnboundedReceiver<Outbound>,
    closed: Arc<AtomicBool>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Audio(packet) => {
                let msg = wire::RealtimeInputMessage::audio(&packet);
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to encode outbound audio: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(json)).await {
                    debug!("Dropping outbound audio after send failure: {e}");
                    closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
            Outbound::Close => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = ws_tx.close().await;
    debug!("Outbound writer finished");
}

async fn read_loop(
    mut ws_rx: SplitStream<WsStream>,
    events: UnboundedSender<InboundEvent>,
    closed: Arc<AtomicBool>,
) {
    let mut terminal_sent = false;
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if !dispatch_payload(text.as_bytes(), &events) {
                    return; // supervisor gone
                }
            }
            Ok(Message::Binary(data)) => {
                if !dispatch_payload(&data, &events) {
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                info!(reason = %reason, "Remote closed the voice channel");
                let _ = events.send(InboundEvent::Closed);
                terminal_sent = true;
                break;
            }
            Ok(_) => {} // ping/pong handled by the transport
            Err(e) => {
                warn!("Voice channel read error: {e}");
                let _ = events.send(InboundEvent::Error(e.to_string()));
                terminal_sent = true;
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    if !terminal_sent {
        let _ = events.send(InboundEvent::Closed);
    }
    debug!("Inbound reader finished");
}

/// Parse and forward one inbound payload. Returns false when the event
/// receiver is gone and the reader should stop.
fn dispatch_payload(payload: &[u8], events: &UnboundedSender<InboundEvent>) -> bool {
    let message = match serde_json::from_slice::<wire::ServerMessage>(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!("Ignoring undecodable server message: {e}");
            return true;
        }
    };
    for event in wire::demux(message) {
        if events.send(event).is_err() {
            return false;
        }
    }
    true
}

impl LiveSession {
    /// Best-effort send of one encoded frame.
    ///
    /// Sending after close is a silent no-op: the capture path must never
    /// block or observe a failure here.
    pub fn send_audio(&self, packet: WireAudioPacket) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.outbound.send(Outbound::Audio(packet)).is_err() {
            debug!("Discarding audio frame: outbound channel gone");
        }
    }

    /// Close the channel. Idempotent; releases the socket on every exit
    /// path and turns late sends into no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_not_found_close_reason_is_distinguished() {
        let err = classify_setup_close("Requested entity was not found.");
        assert!(matches!(err, ConnectError::EntityNotFound(_)));
        assert_eq!(err.code(), "entity_not_found");

        let err = classify_setup_close("internal error");
        assert!(matches!(err, ConnectError::Network(_)));
    }

    #[test]
    fn test_setup_done_detects_completion_and_errors() {
        assert!(setup_done(br#"{"setupComplete": {}}"#).unwrap());
        assert!(!setup_done(br#"{"serverContent": {}}"#).unwrap());
        let err = setup_done(b"error: Requested entity was not found").unwrap_err();
        assert!(matches!(err, ConnectError::EntityNotFound(_)));
    }

    #[test]
    fn test_connect_error_codes() {
        assert_eq!(ConnectError::Network("x".into()).code(), "network");
        assert_eq!(ConnectError::Auth("x".into()).code(), "auth");
        assert_eq!(
            ConnectError::EntityNotFound("x".into()).code(),
            "entity_not_found"
        );
    }

    #[tokio::test]
    async fn test_send_after_close_is_silent() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let session = LiveSession {
            outbound: out_tx,
            closed: Arc::new(AtomicBool::new(false)),
        };

        session.send_audio(crate::pcm::encode_frame(&[0.0; 4], 16_000));
        assert!(matches!(out_rx.recv().await, Some(Outbound::Audio(_))));

        session.close();
        session.close(); // idempotent
        assert!(session.is_closed());
        assert!(matches!(out_rx.recv().await, Some(Outbound::Close)));

        // After close, sends are dropped without reaching the writer.
        session.send_audio(crate::pcm::encode_frame(&[0.0; 4], 16_000));
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn test_speaker_labels() {
        assert_eq!(Speaker::Examiner.to_string(), "Examiner");
        assert_eq!(Speaker::Candidate.to_string(), "You");
    }
}
