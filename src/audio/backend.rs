//! The seam between the session and real audio devices.
//!
//! The ALSA implementation runs capture and playback in dedicated OS
//! threads (NOT tokio tasks) to keep device I/O away from the async
//! network path; tests substitute stub backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use super::capture::{self, CaptureEvent};
use super::playback::{self, OutputClock, PlaybackEvent, SinkCommand};
use crate::error::SessionError;

/// Fixed stream parameters plus ALSA device names.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Microphone sample rate (mono)
    pub capture_sample_rate: u32,
    /// Samples per capture window (4096 ≈ 256 ms at 16 kHz)
    pub window_samples: usize,
    /// Synthesized speech sample rate (mono)
    pub playback_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            capture_sample_rate: 16000,
            window_samples: 4096,
            playback_sample_rate: 24000,
        }
    }
}

/// Handle to a running capture or playback worker. `stop` is idempotent
/// and releases the underlying device.
pub trait AudioHandle: Send {
    fn stop(&mut self);
}

/// Creates the capture and playback workers for one session.
pub trait AudioBackend: Send + Sync {
    fn start_capture(
        &self,
        config: &AudioConfig,
        events: mpsc::Sender<CaptureEvent>,
    ) -> Result<Box<dyn AudioHandle>, SessionError>;

    fn start_playback(
        &self,
        config: &AudioConfig,
        clock: OutputClock,
        commands: mpsc::Receiver<SinkCommand>,
        done: mpsc::Sender<PlaybackEvent>,
    ) -> Result<Box<dyn AudioHandle>, SessionError>;
}

pub struct AlsaBackend;

/// A worker thread plus its running flag. The capture side is joined on
/// stop so the microphone is provably released before the next session;
/// the playback side is detached and exits when its command channel closes.
struct ThreadHandle {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    join_on_stop: bool,
}

impl AudioHandle for ThreadHandle {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        match self.join.take() {
            Some(handle) if self.join_on_stop => {
                let _ = handle.join();
            }
            _ => {}
        }
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AudioBackend for AlsaBackend {
    fn start_capture(
        &self,
        config: &AudioConfig,
        events: mpsc::Sender<CaptureEvent>,
    ) -> Result<Box<dyn AudioHandle>, SessionError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let config = config.clone();
        let join = thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || capture::capture_thread(&config, events, &thread_running))
            .map_err(|e| SessionError::Runtime(format!("failed to spawn capture thread: {e}")))?;
        Ok(Box::new(ThreadHandle {
            running,
            join: Some(join),
            join_on_stop: true,
        }))
    }

    fn start_playback(
        &self,
        config: &AudioConfig,
        clock: OutputClock,
        commands: mpsc::Receiver<SinkCommand>,
        done: mpsc::Sender<PlaybackEvent>,
    ) -> Result<Box<dyn AudioHandle>, SessionError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let config = config.clone();
        let join = thread::Builder::new()
            .name("voice-playback".into())
            .spawn(move || {
                playback::sink_thread(&config, clock, commands, done, &thread_running)
            })
            .map_err(|e| SessionError::Runtime(format!("failed to spawn playback thread: {e}")))?;
        Ok(Box::new(ThreadHandle {
            running,
            join: Some(join),
            join_on_stop: false,
        }))
    }
}
