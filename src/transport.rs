//! Transport adapter for the remote duplex voice endpoint.
//!
//! The session only depends on the `DuplexEndpoint` contract; the
//! websocket implementation lives behind it. One connection per session,
//! no reconnection: after a close or error the caller decides what happens
//! next.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::error::SessionError;
use crate::protocol::{ServerEvent, ServerMessage, SetupMessage};

/// What the session asks the endpoint to become before audio flows.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub api_key: String,
    pub instruction: String,
    pub voice: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

/// Connection lifecycle, delivered exactly once each per occurrence and in
/// causal order: no `Message` before `Open`, nothing after `Closed` or
/// `Error`.
#[derive(Debug)]
pub enum EndpointEvent {
    Open,
    Message(ServerEvent),
    Closed,
    Error(SessionError),
}

/// Handle to an opened endpoint.
pub trait EndpointHandle: Send {
    /// Best-effort, asynchronous, never blocks the caller. Ordering rides
    /// submission order on the single stream.
    fn send_frame(&self, frame: Bytes);
    /// Idempotent.
    fn close(&mut self);
}

#[async_trait]
pub trait DuplexEndpoint: Send + Sync {
    /// Begin opening a session. Returns a handle immediately; exactly one
    /// of `Open` or `Error` follows on the event channel.
    async fn open(
        &self,
        request: OpenRequest,
        events: mpsc::Sender<EndpointEvent>,
    ) -> Result<Box<dyn EndpointHandle>, SessionError>;
}

// ======================== Websocket implementation ========================

pub struct WsEndpoint {
    url: String,
}

impl WsEndpoint {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[derive(Debug)]
enum WsCommand {
    Frame(Bytes),
    Close,
}

struct WsHandle {
    commands: mpsc::Sender<WsCommand>,
    closed: bool,
}

impl EndpointHandle for WsHandle {
    fn send_frame(&self, frame: Bytes) {
        // No delivery guarantee is surfaced; a backlogged connection drops
        // the frame rather than stalling the capture loop.
        if self.commands.try_send(WsCommand::Frame(frame)).is_err() {
            log::warn!("Outbound frame dropped, transport backlogged");
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.commands.try_send(WsCommand::Close);
        }
    }
}

#[async_trait]
impl DuplexEndpoint for WsEndpoint {
    async fn open(
        &self,
        request: OpenRequest,
        events: mpsc::Sender<EndpointEvent>,
    ) -> Result<Box<dyn EndpointHandle>, SessionError> {
        let url = Url::parse(&self.url)
            .map_err(|e| SessionError::Configuration(format!("invalid endpoint URL: {e}")))?;
        let (commands_tx, commands_rx) = mpsc::channel(64);
        tokio::spawn(session_task(url, request, events, commands_rx));
        Ok(Box::new(WsHandle {
            commands: commands_tx,
            closed: false,
        }))
    }
}

async fn session_task(
    url: Url,
    request: OpenRequest,
    events: mpsc::Sender<EndpointEvent>,
    mut commands: mpsc::Receiver<WsCommand>,
) {
    match run_connection(&url, &request, &events, &mut commands).await {
        Ok(()) => {
            let _ = events.send(EndpointEvent::Closed).await;
        }
        Err(e) => {
            let _ = events.send(EndpointEvent::Error(e)).await;
        }
    }
}

async fn run_connection(
    url: &Url,
    request: &OpenRequest,
    events: &mpsc::Sender<EndpointEvent>,
    commands: &mut mpsc::Receiver<WsCommand>,
) -> Result<(), SessionError> {
    let host = url.host_str().unwrap_or_default().to_string();

    let ws_request = tokio_tungstenite::tungstenite::http::Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("Authorization", format!("Bearer {}", request.api_key))
        .body(())
        .map_err(|e| SessionError::Connection(format!("failed to build request: {e}")))?;

    log::info!("Connecting to {}...", url);
    let (ws_stream, _) = connect_async(ws_request)
        .await
        .map_err(|e| SessionError::Connection(format!("websocket connect failed: {e}")))?;

    let (mut write, mut read) = ws_stream.split();

    let setup = SetupMessage::new(
        request.instruction.clone(),
        request.voice.clone(),
        request.input_sample_rate,
        request.output_sample_rate,
    );
    let setup_json = serde_json::to_string(&setup)
        .map_err(|e| SessionError::Protocol(format!("failed to encode setup: {e}")))?;
    write
        .send(Message::Text(setup_json.into()))
        .await
        .map_err(|e| SessionError::Connection(format!("failed to send setup: {e}")))?;

    let mut open = false;
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: ServerMessage = serde_json::from_str(&text)
                            .map_err(|e| {
                                SessionError::Protocol(format!("malformed server message: {e}"))
                            })?;
                        if !open {
                            if parsed.is_ready() {
                                open = true;
                                if events.send(EndpointEvent::Open).await.is_err() {
                                    return Ok(());
                                }
                            } else if parsed.audio.is_some() {
                                return Err(SessionError::Protocol(
                                    "audio received before setup acknowledgement".to_string(),
                                ));
                            }
                            continue;
                        }
                        let event = parsed.into_event()?;
                        if events.send(EndpointEvent::Message(event)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Server closed connection: {:?}", frame);
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(SessionError::Connection(e.to_string()));
                    }
                    None => return Ok(()),
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(WsCommand::Frame(frame)) => {
                        write
                            .send(Message::Binary(frame))
                            .await
                            .map_err(|e| SessionError::Connection(e.to_string()))?;
                    }
                    Some(WsCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
