use std::sync::Arc;

use async_trait::async_trait;
use aura_providers::gemini_live::{GeminiLiveConfig, GeminiLiveHandle, spawn_live_session};
use aura_providers::wire::{FunctionResponse, LiveEvent, LiveSetup};
use tokio::sync::mpsc;

use crate::traits::{LiveConnector, LiveTransport};

#[async_trait]
impl LiveTransport for GeminiLiveHandle {
    fn try_send_audio(&self, mime_type: &'static str, data_b64: String) -> bool {
        GeminiLiveHandle::try_send_audio(self, mime_type, data_b64)
    }

    async fn send_user_turn(&self, text: &str) -> anyhow::Result<()> {
        GeminiLiveHandle::send_user_turn(self, text).await
    }

    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> anyhow::Result<()> {
        GeminiLiveHandle::send_tool_response(self, responses).await
    }

    async fn shutdown(&self) {
        GeminiLiveHandle::shutdown(self).await
    }
}

/// Opens Gemini Live sessions.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    cfg: GeminiLiveConfig,
}

impl GeminiConnector {
    pub fn new(cfg: GeminiLiveConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(
        &self,
        setup: LiveSetup,
    ) -> anyhow::Result<(Arc<dyn LiveTransport>, mpsc::Receiver<LiveEvent>)> {
        let (handle, events) = spawn_live_session(self.cfg.clone(), setup).await?;
        let transport: Arc<dyn LiveTransport> = Arc::new(handle);
        Ok((transport, events))
    }
}
