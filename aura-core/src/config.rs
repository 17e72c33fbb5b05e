use crate::pcm::{INPUT_SAMPLE_RATE_HZ, OUTPUT_SAMPLE_RATE_HZ};
use crate::prompt::DEFAULT_GREETING_TURN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_LIVE_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Session tuning. Every field has a default so partial config files load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub voice_name: String,
    pub ws_url: String,

    pub input_sample_rate_hz: u32,
    pub output_sample_rate_hz: u32,
    // Samples per upstream frame.
    pub capture_frame_len: usize,

    pub warmup_ms: u64,
    pub settle_ms: u64,
    pub connect_timeout_ms: u64,

    pub greeting: String,

    // Preferred input device name; falls back to the default device.
    pub microphone_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.0-flash-exp".into(),
            voice_name: "Kore".into(),
            ws_url: DEFAULT_LIVE_WS_URL.into(),
            input_sample_rate_hz: INPUT_SAMPLE_RATE_HZ,
            output_sample_rate_hz: OUTPUT_SAMPLE_RATE_HZ,
            capture_frame_len: 4096,
            warmup_ms: 1000,
            settle_ms: 1500,
            connect_timeout_ms: 10_000,
            greeting: DEFAULT_GREETING_TURN.into(),
            microphone_device: None,
        }
    }
}

impl SessionConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
