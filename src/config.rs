//! Runtime configuration, sourced from environment variables.

use crate::audio::AudioConfig;

pub const DEFAULT_ENDPOINT_URL: &str = "wss://voice.watsonsplumbing.example/v1/live";

#[derive(Debug, Clone)]
pub struct Config {
    /// API credential for the remote endpoint. Sessions refuse to start
    /// without it, before any device or transport work.
    pub api_key: Option<String>,
    /// Websocket URL of the duplex voice endpoint.
    pub endpoint_url: String,
    /// ALSA device names and fixed stream parameters.
    pub audio: AudioConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let audio = AudioConfig {
            capture_device: env_or("FRONTDESK_CAPTURE_DEVICE", "default"),
            playback_device: env_or("FRONTDESK_PLAYBACK_DEVICE", "default"),
            ..AudioConfig::default()
        };
        Self {
            api_key: std::env::var("FRONTDESK_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            endpoint_url: env_or("FRONTDESK_ENDPOINT_URL", DEFAULT_ENDPOINT_URL),
            audio,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
