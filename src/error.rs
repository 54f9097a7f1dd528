//! Error types for the duplex voice session.

use thiserror::Error;

/// Failures that end the current session.
///
/// None of these are retried here: each one forces a full teardown and is
/// surfaced to the host UI as a kind plus a human-readable message. Whether
/// to reconnect afterwards is the caller's decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Missing or invalid setup, detected before any resource acquisition.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Microphone or speaker unavailable, or permission denied.
    #[error("audio device error: {0}")]
    Device(String),

    /// Transport failed to open or closed unexpectedly.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unexpected failure during capture, decode, or playback.
    #[error("runtime error: {0}")]
    Runtime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = SessionError::Configuration("missing API credential".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: missing API credential"
        );

        let err = SessionError::Device("no capture device".to_string());
        assert_eq!(err.to_string(), "audio device error: no capture device");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SessionError>();
        assert_sync::<SessionError>();
    }
}
