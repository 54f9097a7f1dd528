//! Controller-level tests driving the session state machine with a stub
//! endpoint and a stub audio backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use frontdesk_voice::audio::{
    AudioBackend, AudioConfig, AudioHandle, CaptureEvent, OutputClock, PlaybackEvent, SinkCommand,
};
use frontdesk_voice::protocol::ServerEvent;
use frontdesk_voice::transport::{DuplexEndpoint, EndpointEvent, EndpointHandle, OpenRequest};
use frontdesk_voice::{
    Config, SessionController, SessionError, SessionHandle, SessionState, SessionStatus, VoiceMode,
};

// ======================== Stubs ========================

#[derive(Default)]
struct EndpointShared {
    opens: usize,
    closes: Arc<AtomicUsize>,
    event_tx: Option<mpsc::Sender<EndpointEvent>>,
    frames: Vec<Bytes>,
    last_request: Option<OpenRequest>,
}

#[derive(Clone, Default)]
struct StubEndpoint {
    shared: Arc<Mutex<EndpointShared>>,
}

struct StubEndpointHandle {
    shared: Arc<Mutex<EndpointShared>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl DuplexEndpoint for StubEndpoint {
    async fn open(
        &self,
        request: OpenRequest,
        events: mpsc::Sender<EndpointEvent>,
    ) -> Result<Box<dyn EndpointHandle>, SessionError> {
        let mut shared = self.shared.lock().unwrap();
        shared.opens += 1;
        shared.event_tx = Some(events);
        shared.last_request = Some(request);
        Ok(Box::new(StubEndpointHandle {
            shared: self.shared.clone(),
            closes: shared.closes.clone(),
        }))
    }
}

impl EndpointHandle for StubEndpointHandle {
    fn send_frame(&self, frame: Bytes) {
        self.shared.lock().unwrap().frames.push(frame);
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl StubEndpoint {
    async fn emit(&self, event: EndpointEvent) {
        let tx = self
            .shared
            .lock()
            .unwrap()
            .event_tx
            .clone()
            .expect("endpoint not opened");
        tx.send(event).await.expect("controller gone");
    }

    fn opens(&self) -> usize {
        self.shared.lock().unwrap().opens
    }

    fn closes(&self) -> usize {
        self.shared.lock().unwrap().closes.load(Ordering::SeqCst)
    }

    fn frames(&self) -> Vec<Bytes> {
        self.shared.lock().unwrap().frames.clone()
    }

    fn last_voice(&self) -> String {
        self.shared
            .lock()
            .unwrap()
            .last_request
            .as_ref()
            .expect("endpoint not opened")
            .voice
            .clone()
    }
}

#[derive(Default)]
struct AudioShared {
    capture_starts: usize,
    capture_tx: Option<mpsc::Sender<CaptureEvent>>,
    sink_rx: Option<mpsc::Receiver<SinkCommand>>,
    // Held so the controller's playback event channel stays open.
    done_tx: Option<mpsc::Sender<PlaybackEvent>>,
    fail_capture: bool,
}

#[derive(Clone, Default)]
struct StubAudio {
    shared: Arc<Mutex<AudioShared>>,
    capture_stops: Arc<AtomicUsize>,
    playback_stops: Arc<AtomicUsize>,
}

struct StubAudioHandle {
    stops: Arc<AtomicUsize>,
}

impl AudioHandle for StubAudioHandle {
    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl AudioBackend for StubAudio {
    fn start_capture(
        &self,
        _config: &AudioConfig,
        events: mpsc::Sender<CaptureEvent>,
    ) -> Result<Box<dyn AudioHandle>, SessionError> {
        let mut shared = self.shared.lock().unwrap();
        if shared.fail_capture {
            return Err(SessionError::Device("microphone unavailable".to_string()));
        }
        shared.capture_starts += 1;
        shared.capture_tx = Some(events);
        Ok(Box::new(StubAudioHandle {
            stops: self.capture_stops.clone(),
        }))
    }

    fn start_playback(
        &self,
        _config: &AudioConfig,
        _clock: OutputClock,
        commands: mpsc::Receiver<SinkCommand>,
        done: mpsc::Sender<PlaybackEvent>,
    ) -> Result<Box<dyn AudioHandle>, SessionError> {
        let mut shared = self.shared.lock().unwrap();
        shared.sink_rx = Some(commands);
        shared.done_tx = Some(done);
        Ok(Box::new(StubAudioHandle {
            stops: self.playback_stops.clone(),
        }))
    }
}

impl StubAudio {
    fn capture_sender(&self) -> mpsc::Sender<CaptureEvent> {
        self.shared
            .lock()
            .unwrap()
            .capture_tx
            .clone()
            .expect("capture not started")
    }

    fn take_sink(&self) -> mpsc::Receiver<SinkCommand> {
        self.shared
            .lock()
            .unwrap()
            .sink_rx
            .take()
            .expect("playback not started")
    }

    fn capture_starts(&self) -> usize {
        self.shared.lock().unwrap().capture_starts
    }
}

// ======================== Harness ========================

fn test_config(api_key: Option<&str>) -> Config {
    Config {
        api_key: api_key.map(str::to_string),
        endpoint_url: "wss://voice.test.invalid/v1/live".to_string(),
        audio: AudioConfig::default(),
    }
}

fn spawn_controller(
    config: Config,
) -> (StubEndpoint, StubAudio, SessionHandle) {
    let endpoint = StubEndpoint::default();
    let audio = StubAudio::default();
    let (controller, handle) =
        SessionController::new(config, Arc::new(endpoint.clone()), Arc::new(audio.clone()));
    tokio::spawn(controller.run());
    (endpoint, audio, handle)
}

async fn wait_for<F>(handle: &SessionHandle, predicate: F) -> SessionStatus
where
    F: Fn(&SessionStatus) -> bool,
{
    let mut rx = handle.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for session status")
        .expect("controller dropped its status channel");
    status.clone()
}

async fn start_to_active(
    endpoint: &StubEndpoint,
    handle: &SessionHandle,
) {
    handle.start().await;
    wait_for(handle, |s| s.state == SessionState::Connecting).await;
    endpoint.emit(EndpointEvent::Open).await;
    wait_for(handle, |s| s.state == SessionState::Active).await;
}

// ======================== Tests ========================

#[tokio::test]
async fn start_without_credential_fails_fast() {
    let (endpoint, audio, handle) = spawn_controller(test_config(None));
    handle.start().await;
    let status = wait_for(&handle, |s| s.last_error.is_some()).await;
    assert_eq!(status.state, SessionState::Idle);
    assert!(matches!(
        status.last_error,
        Some(SessionError::Configuration(_))
    ));
    // Nothing was acquired before the check.
    assert_eq!(endpoint.opens(), 0);
    assert_eq!(audio.capture_starts(), 0);
}

#[tokio::test]
async fn start_connects_then_activates_on_open() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    handle.start().await;
    let status = wait_for(&handle, |s| s.state == SessionState::Connecting).await;
    assert!(status.last_error.is_none());
    assert_eq!(endpoint.opens(), 1);
    // The microphone is acquired on entry to Active, not before.
    assert_eq!(audio.capture_starts(), 0);

    endpoint.emit(EndpointEvent::Open).await;
    wait_for(&handle, |s| s.state == SessionState::Active).await;
    assert_eq!(audio.capture_starts(), 1);
}

#[tokio::test]
async fn start_while_active_is_a_noop() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;

    handle.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(endpoint.opens(), 1);
    assert_eq!(audio.capture_starts(), 1);
    assert_eq!(handle.status().state, SessionState::Active);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));

    // Stopping from Idle is a no-op.
    handle.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.status().state, SessionState::Idle);

    start_to_active(&endpoint, &handle).await;
    handle.stop().await;
    wait_for(&handle, |s| s.state == SessionState::Idle).await;
    assert_eq!(endpoint.closes(), 1);
    assert_eq!(audio.capture_stops.load(Ordering::SeqCst), 1);

    // A second stop releases nothing twice.
    handle.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(endpoint.closes(), 1);
    assert_eq!(audio.capture_stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mode_switch_while_active_tears_down() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;

    handle.switch_mode(VoiceMode::Emergency).await;
    let status = wait_for(&handle, |s| {
        s.state == SessionState::Idle && s.mode == VoiceMode::Emergency
    })
    .await;
    assert!(status.last_error.is_none());
    assert_eq!(endpoint.closes(), 1);
    assert_eq!(audio.capture_stops.load(Ordering::SeqCst), 1);

    // It never reconnects by itself; the next start opens fresh with the
    // new persona's voice.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(endpoint.opens(), 1);
    handle.start().await;
    wait_for(&handle, |s| s.state == SessionState::Connecting).await;
    assert_eq!(endpoint.opens(), 2);
    assert_eq!(endpoint.last_voice(), "Kore");
}

#[tokio::test]
async fn endpoint_error_surfaces_and_returns_to_idle() {
    let (endpoint, _audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;

    endpoint
        .emit(EndpointEvent::Error(SessionError::Connection(
            "stream reset".to_string(),
        )))
        .await;
    let status = wait_for(&handle, |s| s.state == SessionState::Idle).await;
    assert!(matches!(
        status.last_error,
        Some(SessionError::Connection(_))
    ));
    assert_eq!(endpoint.closes(), 1);
}

#[tokio::test]
async fn endpoint_close_ends_the_session_cleanly() {
    let (endpoint, _audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;

    endpoint.emit(EndpointEvent::Closed).await;
    let status = wait_for(&handle, |s| s.state == SessionState::Idle).await;
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn capture_failure_is_a_device_error() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    audio.shared.lock().unwrap().fail_capture = true;

    handle.start().await;
    wait_for(&handle, |s| s.state == SessionState::Connecting).await;
    endpoint.emit(EndpointEvent::Open).await;

    let status = wait_for(&handle, |s| s.state == SessionState::Idle && s.last_error.is_some()).await;
    assert!(matches!(status.last_error, Some(SessionError::Device(_))));
    assert_eq!(endpoint.closes(), 1);
}

#[tokio::test]
async fn inbound_frames_schedule_back_to_back() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;
    let mut sink = audio.take_sink();

    // Two one-second payloads (24000 mono i16 samples each) arriving
    // faster than real time.
    let payload = vec![0u8; 24000 * 2];
    for _ in 0..2 {
        endpoint
            .emit(EndpointEvent::Message(ServerEvent {
                audio: Some(payload.clone()),
                interrupted: false,
            }))
            .await;
    }

    let SinkCommand::Play(first) = sink.recv().await.unwrap() else {
        panic!("expected a playback entry");
    };
    let SinkCommand::Play(second) = sink.recv().await.unwrap() else {
        panic!("expected a playback entry");
    };
    assert_eq!(first.samples.len(), 24000);
    assert_eq!(first.duration, 1.0);
    // Appended contiguously, never overlapping.
    assert_eq!(second.start, first.start + first.duration);
}

#[tokio::test]
async fn barge_in_cancels_scheduled_playback() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;
    let mut sink = audio.take_sink();

    let payload = vec![0u8; 24000 * 2];
    for _ in 0..2 {
        endpoint
            .emit(EndpointEvent::Message(ServerEvent {
                audio: Some(payload.clone()),
                interrupted: false,
            }))
            .await;
    }
    endpoint
        .emit(EndpointEvent::Message(ServerEvent {
            audio: None,
            interrupted: true,
        }))
        .await;

    let SinkCommand::Play(first) = sink.recv().await.unwrap() else {
        panic!("expected a playback entry");
    };
    let SinkCommand::Play(second) = sink.recv().await.unwrap() else {
        panic!("expected a playback entry");
    };
    assert!(matches!(sink.recv().await.unwrap(), SinkCommand::Flush));
    assert!(first.is_cancelled());
    assert!(second.is_cancelled());

    // The next frame starts fresh at the clock, not after the cancelled
    // entries' stale offsets.
    endpoint
        .emit(EndpointEvent::Message(ServerEvent {
            audio: Some(payload.clone()),
            interrupted: false,
        }))
        .await;
    let SinkCommand::Play(third) = sink.recv().await.unwrap() else {
        panic!("expected a playback entry");
    };
    assert!(!third.is_cancelled());
    assert!(third.start < second.start + second.duration);
}

#[tokio::test]
async fn malformed_audio_payload_is_a_protocol_error() {
    let (endpoint, _audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;

    endpoint
        .emit(EndpointEvent::Message(ServerEvent {
            audio: Some(vec![0u8; 3]),
            interrupted: false,
        }))
        .await;
    let status = wait_for(&handle, |s| s.state == SessionState::Idle).await;
    assert!(matches!(status.last_error, Some(SessionError::Protocol(_))));
}

#[tokio::test]
async fn capture_windows_meter_and_forward() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;

    let frame = Bytes::from_static(&[0x12, 0x34]);
    audio
        .capture_sender()
        .send(CaptureEvent::Window {
            frame: frame.clone(),
            level: 0.7,
        })
        .await
        .unwrap();

    let status = wait_for(&handle, |s| s.volume > 0.0).await;
    assert!((status.volume - 0.7).abs() < f32::EPSILON);
    assert_eq!(endpoint.frames(), vec![frame]);

    // Teardown zeroes the meter.
    handle.stop().await;
    let status = wait_for(&handle, |s| s.state == SessionState::Idle).await;
    assert_eq!(status.volume, 0.0);
}

#[tokio::test]
async fn capture_device_failure_mid_session_tears_down() {
    let (endpoint, audio, handle) = spawn_controller(test_config(Some("key")));
    start_to_active(&endpoint, &handle).await;

    audio
        .capture_sender()
        .send(CaptureEvent::Failed("device unplugged".to_string()))
        .await
        .unwrap();
    let status = wait_for(&handle, |s| s.state == SessionState::Idle).await;
    assert!(matches!(status.last_error, Some(SessionError::Device(_))));
    assert_eq!(endpoint.closes(), 1);
}
