//! Audio capture, playback scheduling, and PCM wire conversion.

pub mod alsa_device;
pub mod backend;
pub mod capture;
pub mod pcm;
pub mod playback;

pub use backend::{AlsaBackend, AudioBackend, AudioConfig, AudioHandle};
pub use capture::CaptureEvent;
pub use playback::{OutputClock, PlaybackEntry, PlaybackEvent, PlaybackScheduler, SinkCommand};
