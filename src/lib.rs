//! Real-time duplex voice sessions for Watson's AI front desk.
//!
//! Captures microphone audio at 16 kHz mono, streams it to a remote
//! conversational-audio endpoint over a websocket, and schedules the
//! synthesized 24 kHz speech coming back for gapless playback, with
//! barge-in interruption and persona switching.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod persona;
pub mod protocol;
pub mod transport;

pub use config::Config;
pub use controller::{SessionController, SessionHandle, SessionState, SessionStatus};
pub use error::SessionError;
pub use persona::VoiceMode;
pub use transport::WsEndpoint;
