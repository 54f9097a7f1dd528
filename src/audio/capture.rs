//! Microphone capture thread: fixed windows of float samples at 16 kHz
//! mono, metered, encoded for the wire, and forwarded fire-and-forget.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

use super::alsa_device;
use super::backend::AudioConfig;
use super::pcm;

#[derive(Debug)]
pub enum CaptureEvent {
    /// One capture window, already encoded for the wire, plus its meter level.
    Window { frame: Bytes, level: f32 },
    /// The device failed; the session is expected to tear down.
    Failed(String),
}

pub fn capture_thread(
    config: &AudioConfig,
    events: mpsc::Sender<CaptureEvent>,
    running: &AtomicBool,
) {
    if let Err(e) = run(config, &events, running) {
        log::error!("Capture error: {:#}", e);
        let _ = events.try_send(CaptureEvent::Failed(format!("{e:#}")));
    }
    // The PCM handle is dropped on every exit path, so the microphone is
    // released even when the failure happened mid-callback.
    log::info!("Capture stopped");
}

fn run(
    config: &AudioConfig,
    events: &mpsc::Sender<CaptureEvent>,
    running: &AtomicBool,
) -> Result<()> {
    let (pcm, params) = alsa_device::open_capture(
        &config.capture_device,
        config.capture_sample_rate,
        config.window_samples,
    )?;

    // The hardware may negotiate a nearby window size; one period is one
    // outbound frame either way.
    let mut window = vec![0f32; params.period_size];
    let io = pcm.io_f32()?;

    log::info!(
        "Capture started: device={}, rate={}, window={}",
        config.capture_device,
        params.sample_rate,
        params.period_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut window) {
            Ok(frames) => {
                let samples = &window[..frames];
                let level = pcm::meter_level(samples);
                let frame = pcm::encode_frame(samples);
                // Fire and forget: the capture loop never blocks on the
                // session. A closed channel means teardown is underway.
                match events.try_send(CaptureEvent::Window { frame, level }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        log::warn!("Capture window dropped, session backlogged");
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                pcm.prepare()
                    .with_context(|| format!("failed to recover PCM capture after {e}"))?;
            }
        }
    }

    Ok(())
}
