use std::sync::Arc;

use async_trait::async_trait;
use aura_core::pcm::AudioBuffer;
use aura_core::types::SessionSummary;
use aura_providers::wire::{FunctionResponse, LiveEvent, LiveSetup};
use tokio::sync::mpsc;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackId(pub u64);

/// Receives mono `f32` samples at the rate requested in `MicrophoneSource::open`.
///
/// Called on the capture device thread; must not block.
pub type SampleCallback = Arc<dyn Fn(&[f32]) + Send + Sync + 'static>;

pub trait MicrophoneSource: Send + Sync {
    /// Acquire the microphone. Fails with `SessionError::Permission` when the
    /// device is missing or access is denied.
    fn open(
        &self,
        sample_rate_hz: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, SessionError>;
}

pub trait CaptureStream: Send {
    /// Release the device. Must be idempotent.
    fn close(&mut self);
}

/// A playback device with its own clock.
pub trait AudioOutput: Send {
    /// Seconds of audio rendered since the device opened.
    fn current_time(&self) -> f64;

    /// Start `buffer` at `start_at` on the device clock. When it finishes on its
    /// own the device reports `id` on the `ended` channel given to `SpeakerSink::open`.
    fn start(&mut self, id: PlaybackId, buffer: &AudioBuffer, start_at: f64);

    /// Stop immediately. No end notification is sent.
    fn stop(&mut self, id: PlaybackId);

    /// Release the device. Must be idempotent.
    fn close(&mut self);
}

pub trait SpeakerSink: Send + Sync {
    fn open(
        &self,
        sample_rate_hz: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn AudioOutput>, SessionError>;
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Fire-and-forget; returns false when the frame was dropped.
    fn try_send_audio(&self, mime_type: &'static str, data_b64: String) -> bool;

    async fn send_user_turn(&self, text: &str) -> anyhow::Result<()>;

    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> anyhow::Result<()>;

    async fn shutdown(&self);
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open the stream. Resolves once the remote side accepted the setup.
    async fn connect(
        &self,
        setup: LiveSetup,
    ) -> anyhow::Result<(Arc<dyn LiveTransport>, mpsc::Receiver<LiveEvent>)>;
}

/// Callbacks into the UI shell.
pub trait SessionHost: Send + Sync {
    /// Fires at most once per session, after the agent's final words were heard.
    fn on_finish(&self, summary: SessionSummary);

    /// Fires once after the session released its resources.
    fn on_closed(&self) {}
}
