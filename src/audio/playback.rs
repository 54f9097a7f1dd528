//! Gapless playback scheduling for synthesized speech frames.
//!
//! Inbound frames may arrive faster or slower than real time and in
//! arbitrary bursts. The scheduler binds each decoded buffer to a slot on
//! the output clock so entries never overlap and never play out of arrival
//! order; barge-in cancels everything scheduled and pulls the cursor back
//! to the current clock time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device;
use super::backend::AudioConfig;

/// Monotonic timeline of the output device, in seconds since the session's
/// sink started. Wall-clock time never enters scheduling.
#[derive(Debug, Clone)]
pub struct OutputClock {
    epoch: Instant,
}

impl OutputClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// A decoded inbound frame bound to its slot on the output clock.
#[derive(Debug)]
pub struct PlaybackEntry {
    pub id: u64,
    /// Decoded mono samples at the playback rate.
    pub samples: Vec<f32>,
    /// Output-clock time at which this entry begins.
    pub start: f64,
    pub duration: f64,
    cancelled: Arc<AtomicBool>,
}

impl PlaybackEntry {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// What the session hands the sink thread. Flush silences the device
/// immediately after a barge-in, ahead of any still-queued entries.
#[derive(Debug)]
pub enum SinkCommand {
    Play(PlaybackEntry),
    Flush,
}

/// Reported back by the sink thread.
#[derive(Debug)]
pub enum PlaybackEvent {
    /// The entry's samples were fully handed to the device.
    Finished(u64),
    /// The sink lost the device and cannot continue.
    Failed(String),
}

/// Owns the playback cursor and the set of scheduled-but-unfinished
/// entries. Touched only from the session's inbound-message and
/// interruption handling, so it needs no locking of its own.
pub struct PlaybackScheduler {
    sample_rate: u32,
    cursor: f64,
    next_id: u64,
    active: HashMap<u64, Arc<AtomicBool>>,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            cursor: 0.0,
            next_id: 0,
            active: HashMap::new(),
        }
    }

    /// Bind a decoded buffer to the next free slot on the output clock:
    /// immediately if the device is ahead of the cursor, appended
    /// contiguously if frames are arriving faster than real time.
    pub fn schedule(&mut self, samples: Vec<f32>, now: f64) -> PlaybackEntry {
        let start = self.cursor.max(now);
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let id = self.next_id;
        self.next_id += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.active.insert(id, cancelled.clone());
        self.cursor = start + duration;
        PlaybackEntry {
            id,
            samples,
            start,
            duration,
            cancelled,
        }
    }

    /// Natural completion. Unknown ids are ignored; the entry raced a
    /// cancellation, which is expected and not an error.
    pub fn finished(&mut self, id: u64) {
        self.active.remove(&id);
    }

    /// Barge-in: cancel everything scheduled, clear the set, and pull the
    /// cursor back to the current clock time so the next frame to arrive
    /// starts immediately rather than at a stale future offset.
    pub fn interrupt(&mut self, now: f64) -> usize {
        let cancelled = self.active.len();
        for flag in self.active.values() {
            flag.store(true, Ordering::Relaxed);
        }
        self.active.clear();
        self.cursor = now;
        cancelled
    }

    /// Teardown: cancel everything and forget the timeline.
    pub fn reset(&mut self) {
        for flag in self.active.values() {
            flag.store(true, Ordering::Relaxed);
        }
        self.active.clear();
        self.cursor = 0.0;
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }
}

// ======================== Sink thread ========================

/// Frames written to the device per chunk; cancellation is observed
/// between chunks.
const WRITE_CHUNK: usize = 1024;
/// Idle-gap sleeps happen in slices this long so stop and barge-in stay
/// responsive.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

pub fn sink_thread(
    config: &AudioConfig,
    clock: OutputClock,
    commands: mpsc::Receiver<SinkCommand>,
    done: mpsc::Sender<PlaybackEvent>,
    running: &AtomicBool,
) {
    if let Err(e) = run(config, &clock, commands, &done, running) {
        log::error!("Playback sink error: {:#}", e);
        let _ = done.try_send(PlaybackEvent::Failed(format!("{e:#}")));
    }
    log::info!("Playback stopped");
}

fn run(
    config: &AudioConfig,
    clock: &OutputClock,
    mut commands: mpsc::Receiver<SinkCommand>,
    done: &mpsc::Sender<PlaybackEvent>,
    running: &AtomicBool,
) -> Result<()> {
    let (pcm, params) = alsa_device::open_playback(
        &config.playback_device,
        config.playback_sample_rate,
        WRITE_CHUNK,
    )?;
    let io = pcm.io_f32()?;

    log::info!(
        "Playback started: device={}, rate={}",
        config.playback_device,
        params.sample_rate,
    );

    // Output-clock time up to which audio has been handed to the device.
    // Contiguous entries write back to back and the device paces us; a
    // sleep only happens across genuine silence gaps.
    let mut buffered_until: f64 = 0.0;

    while running.load(Ordering::Relaxed) {
        let Some(command) = commands.blocking_recv() else {
            break;
        };
        let entry = match command {
            SinkCommand::Play(entry) => entry,
            SinkCommand::Flush => {
                let _ = pcm.drop();
                let _ = pcm.prepare();
                buffered_until = clock.now();
                continue;
            }
        };
        if entry.is_cancelled() {
            continue;
        }

        // Wait out any idle gap before this entry's slot.
        loop {
            if !running.load(Ordering::Relaxed) {
                return Ok(());
            }
            if entry.is_cancelled() {
                break;
            }
            let gap = entry.start - clock.now().max(buffered_until);
            if gap <= 0.0 {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(Duration::from_secs_f64(gap)));
        }
        if entry.is_cancelled() {
            continue;
        }

        let begin = entry.start.max(clock.now().max(buffered_until));
        let mut offset = 0;
        let mut flushed = false;
        while offset < entry.samples.len() {
            if !running.load(Ordering::Relaxed) || entry.is_cancelled() {
                // Silence the device immediately, dropping whatever it
                // still has buffered.
                let _ = pcm.drop();
                let _ = pcm.prepare();
                flushed = true;
                break;
            }
            let end = (offset + WRITE_CHUNK).min(entry.samples.len());
            match io.writei(&entry.samples[offset..end]) {
                Ok(frames) => offset += frames,
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    if pcm.prepare().is_err() {
                        anyhow::bail!("failed to recover PCM playback after {e}");
                    }
                }
            }
        }

        buffered_until = if flushed {
            clock.now()
        } else {
            begin + entry.duration
        };
        let _ = done.try_send(PlaybackEvent::Finished(entry.id));
    }

    Ok(())
}
