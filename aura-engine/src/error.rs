use aura_core::pcm::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("microphone unavailable: {0}")]
    Permission(String),

    #[error("audio output unavailable: {0}")]
    OutputDevice(String),

    #[error("failed to open live stream: {0}")]
    TransportOpen(String),

    #[error("failed to decode agent audio: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to acknowledge tool call {name}: {reason}")]
    ToolAck { name: String, reason: String },

    #[error("live stream failed: {0}")]
    Stream(String),
}

impl SessionError {
    /// Fatal errors end the session; the rest are logged and skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_) | Self::ToolAck { .. })
    }
}

/// Short, actionable message for the UI. Details go to the logs.
pub fn user_facing_error(e: &SessionError) -> String {
    match e {
        SessionError::Permission(raw) => {
            let raw = raw.to_lowercase();
            if raw.contains("no input device") {
                "No microphone detected. Check your mic and try again.".into()
            } else if raw.contains("not supported") {
                "Audio devices are not supported on this platform.".into()
            } else {
                "Microphone access appears blocked. Allow microphone access and try again.".into()
            }
        }
        SessionError::OutputDevice(_) => {
            "No speaker available. Check your audio output and try again.".into()
        }
        SessionError::TransportOpen(raw) => {
            if raw.to_lowercase().contains("api key") {
                "API key missing.".into()
            } else {
                "Could not reach Aura. Check your connection and try again.".into()
            }
        }
        SessionError::Stream(_) => "Connection lost. Please try reconnecting.".into(),
        SessionError::Decode(_) | SessionError::ToolAck { .. } => e.to_string(),
    }
}
