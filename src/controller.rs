//! The session controller: one state machine supervising capture,
//! transport, and playback for a single duplex conversation.
//!
//! Every external callback (capture windows, endpoint events, playback
//! completions, host commands) arrives as a message on a channel and is
//! handled by one event loop, so the playback cursor and active set have a
//! single owner and `stop` is deliverable from inside any of those paths.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use crate::audio::backend::{AudioBackend, AudioHandle};
use crate::audio::capture::CaptureEvent;
use crate::audio::pcm;
use crate::audio::playback::{
    OutputClock, PlaybackEvent, PlaybackScheduler, SinkCommand,
};
use crate::config::Config;
use crate::error::SessionError;
use crate::persona::VoiceMode;
use crate::protocol::ServerEvent;
use crate::transport::{DuplexEndpoint, EndpointEvent, EndpointHandle, OpenRequest};

/// Lifecycle of the one allowed session. A finished or failed session
/// collapses back to `Idle`; the failure is readable from `last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
}

/// What the host UI reads. Published on every observable change; the host
/// drives the controller only through [`SessionHandle`] commands.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub mode: VoiceMode,
    pub volume: f32,
    pub last_error: Option<SessionError>,
}

#[derive(Debug)]
pub enum SessionCommand {
    Start,
    Stop,
    SwitchMode(VoiceMode),
}

/// Everything a live session owns. Teardown takes this record out of its
/// `Option`, so every field is released exactly once.
struct SessionResources {
    endpoint: Box<dyn EndpointHandle>,
    endpoint_rx: mpsc::Receiver<EndpointEvent>,
    capture: Option<Box<dyn AudioHandle>>,
    capture_rx: Option<mpsc::Receiver<CaptureEvent>>,
    playback: Box<dyn AudioHandle>,
    playback_rx: mpsc::Receiver<PlaybackEvent>,
    sink_tx: mpsc::Sender<SinkCommand>,
    scheduler: PlaybackScheduler,
    clock: OutputClock,
    started_at: Instant,
}

/// Cloneable host-side handle to a running controller.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub async fn start(&self) {
        let _ = self.commands.send(SessionCommand::Start).await;
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(SessionCommand::Stop).await;
    }

    pub async fn switch_mode(&self, mode: VoiceMode) {
        let _ = self.commands.send(SessionCommand::SwitchMode(mode)).await;
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A watch receiver for callers that want to await status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

pub struct SessionController {
    config: Config,
    endpoint: Arc<dyn DuplexEndpoint>,
    backend: Arc<dyn AudioBackend>,
    state: SessionState,
    mode: VoiceMode,
    volume: f32,
    last_error: Option<SessionError>,
    resources: Option<SessionResources>,
    status_tx: watch::Sender<SessionStatus>,
    commands_rx: mpsc::Receiver<SessionCommand>,
}

/// One drained event per loop turn.
enum Tick {
    Command(Option<SessionCommand>),
    Endpoint(Option<EndpointEvent>),
    Capture(Option<CaptureEvent>),
    Playback(Option<PlaybackEvent>),
}

async fn next_event<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionController {
    pub fn new(
        config: Config,
        endpoint: Arc<dyn DuplexEndpoint>,
        backend: Arc<dyn AudioBackend>,
    ) -> (Self, SessionHandle) {
        let mode = VoiceMode::Reception;
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            state: SessionState::Idle,
            mode,
            volume: 0.0,
            last_error: None,
        });
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let controller = Self {
            config,
            endpoint,
            backend,
            state: SessionState::Idle,
            mode,
            volume: 0.0,
            last_error: None,
            resources: None,
            status_tx,
            commands_rx,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (controller, handle)
    }

    /// Run until every [`SessionHandle`] is gone.
    pub async fn run(mut self) {
        loop {
            let tick = {
                let (endpoint_rx, capture_rx, playback_rx) = match self.resources.as_mut() {
                    Some(res) => (
                        Some(&mut res.endpoint_rx),
                        res.capture_rx.as_mut(),
                        Some(&mut res.playback_rx),
                    ),
                    None => (None, None, None),
                };
                tokio::select! {
                    cmd = self.commands_rx.recv() => Tick::Command(cmd),
                    ev = next_event(endpoint_rx) => Tick::Endpoint(ev),
                    ev = next_event(capture_rx) => Tick::Capture(ev),
                    ev = next_event(playback_rx) => Tick::Playback(ev),
                }
            };

            match tick {
                Tick::Command(Some(SessionCommand::Start)) => self.handle_start().await,
                Tick::Command(Some(SessionCommand::Stop)) => self.handle_stop(),
                Tick::Command(Some(SessionCommand::SwitchMode(mode))) => {
                    self.handle_switch_mode(mode)
                }
                Tick::Command(None) => {
                    // All handles dropped; shut down whatever is live.
                    self.teardown();
                    return;
                }
                Tick::Endpoint(ev) => self.handle_endpoint_event(ev),
                Tick::Capture(ev) => self.handle_capture_event(ev),
                Tick::Playback(ev) => self.handle_playback_event(ev),
            }
        }
    }

    fn publish(&self) {
        let _ = self.status_tx.send(SessionStatus {
            state: self.state,
            mode: self.mode,
            volume: self.volume,
            last_error: self.last_error.clone(),
        });
    }

    async fn handle_start(&mut self) {
        if self.state != SessionState::Idle {
            log::warn!("Start ignored, session already {:?}", self.state);
            return;
        }
        // The credential check happens before any device or transport work.
        let Some(api_key) = self.config.api_key.clone() else {
            self.last_error = Some(SessionError::Configuration(
                "missing API credential".to_string(),
            ));
            log::error!("Cannot start: missing API credential");
            self.publish();
            return;
        };
        self.last_error = None;

        // Output side first, so inbound audio has somewhere to go the
        // moment the endpoint opens.
        let clock = OutputClock::start();
        let scheduler = PlaybackScheduler::new(self.config.audio.playback_sample_rate);
        let (sink_tx, sink_rx) = mpsc::channel(256);
        let (done_tx, playback_rx) = mpsc::channel(64);
        let playback = match self.backend.start_playback(
            &self.config.audio,
            clock.clone(),
            sink_rx,
            done_tx,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        let persona = self.mode.persona();
        let request = OpenRequest {
            api_key,
            instruction: persona.instruction.to_string(),
            voice: persona.voice.to_string(),
            input_sample_rate: self.config.audio.capture_sample_rate,
            output_sample_rate: self.config.audio.playback_sample_rate,
        };
        let (endpoint_tx, endpoint_rx) = mpsc::channel(64);
        let endpoint = match self.endpoint.open(request, endpoint_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                let mut playback = playback;
                playback.stop();
                self.fail(e);
                return;
            }
        };

        self.resources = Some(SessionResources {
            endpoint,
            endpoint_rx,
            capture: None,
            capture_rx: None,
            playback,
            playback_rx,
            sink_tx,
            scheduler,
            clock,
            started_at: Instant::now(),
        });
        self.state = SessionState::Connecting;
        self.publish();
        log::info!("Session connecting as {} ({})", self.mode.persona().name, self.mode);
    }

    fn handle_stop(&mut self) {
        if self.state == SessionState::Idle && self.resources.is_none() {
            return;
        }
        let elapsed = self
            .resources
            .as_ref()
            .map(|res| res.started_at.elapsed().as_secs());
        self.teardown();
        self.publish();
        if let Some(secs) = elapsed {
            log::info!("Session stopped after {}s", secs);
        }
    }

    fn handle_switch_mode(&mut self, mode: VoiceMode) {
        // Never reuses the live transport: switching while connected tears
        // everything down and waits for the next explicit start.
        if self.state != SessionState::Idle {
            log::info!("Mode switch while {:?}, stopping session", self.state);
            self.teardown();
        }
        self.mode = mode;
        self.publish();
    }

    fn handle_endpoint_event(&mut self, event: Option<EndpointEvent>) {
        let Some(event) = event else {
            self.fail(SessionError::Runtime(
                "transport event channel closed unexpectedly".to_string(),
            ));
            return;
        };
        match event {
            EndpointEvent::Open => {
                if self.state != SessionState::Connecting {
                    log::warn!("Endpoint opened while {:?}, ignoring", self.state);
                    return;
                }
                // Entry to Active acquires the microphone.
                let (capture_tx, capture_rx) = mpsc::channel(32);
                match self.backend.start_capture(&self.config.audio, capture_tx) {
                    Ok(handle) => {
                        if let Some(res) = self.resources.as_mut() {
                            res.capture = Some(handle);
                            res.capture_rx = Some(capture_rx);
                        }
                        self.state = SessionState::Active;
                        self.publish();
                        log::info!("Session active");
                    }
                    Err(e) => self.fail(e),
                }
            }
            EndpointEvent::Message(event) => self.handle_server_event(event),
            EndpointEvent::Closed => {
                if self.resources.is_none() {
                    return;
                }
                log::info!("Endpoint closed, ending session");
                self.teardown();
                self.publish();
            }
            EndpointEvent::Error(e) => self.fail(e),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        if let Some(payload) = event.audio {
            let samples = match pcm::decode_frame(&payload) {
                Ok(samples) => samples,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            };
            if let Some(res) = self.resources.as_mut() {
                if !samples.is_empty() {
                    let entry = res.scheduler.schedule(samples, res.clock.now());
                    if res.sink_tx.try_send(SinkCommand::Play(entry)).is_err() {
                        log::warn!("Playback queue full, frame dropped");
                    }
                }
            }
        }
        if event.interrupted {
            if let Some(res) = self.resources.as_mut() {
                let cancelled = res.scheduler.interrupt(res.clock.now());
                // Flush what the device already buffered so barge-in
                // silences output immediately.
                let _ = res.sink_tx.try_send(SinkCommand::Flush);
                log::info!("Barge-in: cancelled {} scheduled entries", cancelled);
            }
        }
    }

    fn handle_capture_event(&mut self, event: Option<CaptureEvent>) {
        match event {
            Some(CaptureEvent::Window { frame, level }) => {
                self.volume = level;
                if let Some(res) = self.resources.as_ref() {
                    res.endpoint.send_frame(frame);
                }
                self.publish();
            }
            Some(CaptureEvent::Failed(message)) => {
                self.fail(SessionError::Device(message));
            }
            None => {
                self.fail(SessionError::Runtime(
                    "capture event channel closed unexpectedly".to_string(),
                ));
            }
        }
    }

    fn handle_playback_event(&mut self, event: Option<PlaybackEvent>) {
        match event {
            Some(PlaybackEvent::Finished(id)) => {
                if let Some(res) = self.resources.as_mut() {
                    res.scheduler.finished(id);
                }
            }
            Some(PlaybackEvent::Failed(message)) => {
                self.fail(SessionError::Runtime(message));
            }
            None => {
                self.fail(SessionError::Runtime(
                    "playback event channel closed unexpectedly".to_string(),
                ));
            }
        }
    }

    /// Terminal error path: tear down, surface the error, return to Idle.
    fn fail(&mut self, error: SessionError) {
        log::error!("Session error: {}", error);
        self.teardown();
        self.last_error = Some(error);
        self.publish();
    }

    /// The only resource-release path. Safe to call from any event branch
    /// and a no-op when nothing is held.
    fn teardown(&mut self) {
        if let Some(mut res) = self.resources.take() {
            if let Some(mut capture) = res.capture.take() {
                capture.stop();
            }
            res.scheduler.reset();
            res.endpoint.close();
            res.playback.stop();
            log::info!("Session resources released");
        }
        self.volume = 0.0;
        self.state = SessionState::Idle;
    }
}
