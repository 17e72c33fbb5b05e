use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use url::Url;

use crate::wire::{
    FunctionResponse, LiveEvent, LiveSetup, build_realtime_audio_message, build_setup_message,
    build_tool_response_message, build_user_text_turn, parse_server_message,
};

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);
const CTRL_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

fn should_emit_backpressure_warning(dropped: u64) -> bool {
    // Emit on first drop, then periodically.
    dropped > 0 && (dropped == 1 || dropped % 50 == 0)
}

fn frame_text(msg: Message) -> Option<String> {
    match msg {
        Message::Text(t) => Some(t.to_string()),
        // The live endpoint frequently sends JSON in binary frames.
        Message::Binary(b) => Some(String::from_utf8_lossy(&b).to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiLiveConfig {
    pub ws_url: Url,
    pub api_key: String,
    pub connect_timeout: Duration,
}

impl GeminiLiveConfig {
    pub fn production(api_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            ws_url: Url::parse(aura_core::config::DEFAULT_LIVE_WS_URL)
                .context("parse gemini live url")?,
            api_key: api_key.into(),
            connect_timeout: Duration::from_secs(10),
        })
    }
}

#[derive(Debug)]
enum LiveCmd {
    Audio {
        mime_type: &'static str,
        data_b64: String,
    },
    UserTurn {
        text: String,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    ToolResponse {
        responses: Vec<FunctionResponse>,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct GeminiLiveHandle {
    tx: mpsc::Sender<LiveCmd>,
}

impl GeminiLiveHandle {
    /// Non-blocking; returns false when the frame was dropped.
    pub fn try_send_audio(&self, mime_type: &'static str, data_b64: String) -> bool {
        self.tx
            .try_send(LiveCmd::Audio {
                mime_type,
                data_b64,
            })
            .is_ok()
    }

    pub async fn send_user_turn(&self, text: impl Into<String>) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(LiveCmd::UserTurn {
                text: text.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| anyhow!("live session closed"))?;
        rx.await.map_err(|_| anyhow!("live session closed"))?
    }

    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(LiveCmd::ToolResponse {
                responses,
                respond_to: tx,
            })
            .await
            .map_err(|_| anyhow!("live session closed"))?;
        rx.await.map_err(|_| anyhow!("live session closed"))?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(LiveCmd::Shutdown).await;
    }
}

/// Open the stream, send `setup`, and wait for `setupComplete`.
///
/// Returns once the server has accepted the setup, so callers can treat the
/// return as "connection open".
pub async fn spawn_live_session(
    cfg: GeminiLiveConfig,
    setup: LiveSetup,
) -> anyhow::Result<(GeminiLiveHandle, mpsc::Receiver<LiveEvent>)> {
    if cfg.api_key.trim().is_empty() {
        return Err(anyhow!("missing Gemini API key"));
    }

    let url = build_live_ws_url(&cfg);
    let req = url
        .as_str()
        .into_client_request()
        .context("build websocket request")?;

    let ws = tokio::time::timeout(cfg.connect_timeout, connect_and_setup(req, &setup))
        .await
        .map_err(|_| anyhow!("Gemini live connect timed out"))??;

    let (ws_write, mut ws_read) = ws.split();

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<LiveCmd>(64);
    let (evt_tx, evt_rx) = mpsc::channel::<LiveEvent>(256);

    // Writer task: reads never wait on socket writes. Control messages have their
    // own queue so acks and turns can't be starved by microphone audio.
    let (out_ctrl_tx, mut out_ctrl_rx) = mpsc::channel::<Message>(32);
    let (out_audio_tx, mut out_audio_rx) = mpsc::channel::<Message>(64);
    tokio::spawn(async move {
        let mut ws_write = ws_write;
        let mut ctrl_closed = false;
        let mut audio_closed = false;

        loop {
            let next_msg: Option<Message> = tokio::select! {
                biased;
                msg = out_ctrl_rx.recv(), if !ctrl_closed => {
                    match msg {
                        Some(m) => Some(m),
                        None => { ctrl_closed = true; None }
                    }
                }
                msg = out_audio_rx.recv(), if !audio_closed => {
                    match msg {
                        Some(m) => Some(m),
                        None => { audio_closed = true; None }
                    }
                }
            };

            let Some(msg) = next_msg else {
                if ctrl_closed && audio_closed {
                    break;
                }
                continue;
            };

            let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
            if !matches!(res, Ok(Ok(()))) {
                log::warn!("live websocket write failed; stopping writer");
                break;
            }
        }

        let _ = ws_write.send(Message::Close(None)).await;
    });

    tokio::spawn(async move {
        let mut dropped_outbound_audio_chunks: u64 = 0;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    match cmd {
                        LiveCmd::Audio { mime_type, data_b64 } => {
                            let msg = build_realtime_audio_message(mime_type, &data_b64);
                            match out_audio_tx.try_send(Message::Text(msg.into())) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    // Input audio is best-effort: drop rather than stall reads.
                                    dropped_outbound_audio_chunks = dropped_outbound_audio_chunks.saturating_add(1);
                                    if should_emit_backpressure_warning(dropped_outbound_audio_chunks) {
                                        let _ = evt_tx.try_send(LiveEvent::Warning {
                                            kind: "client_backpressure".into(),
                                            message: format!(
                                                "live backpressure: dropped {dropped_outbound_audio_chunks} microphone frames"
                                            ),
                                        });
                                    }
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    let _ = evt_tx.try_send(LiveEvent::Error { message: "websocket closed".into() });
                                    break;
                                }
                            }
                        }
                        LiveCmd::UserTurn { text, respond_to } => {
                            let msg = build_user_text_turn(&text);
                            let _ = respond_to.send(enqueue_ctrl(&out_ctrl_tx, msg).await);
                        }
                        LiveCmd::ToolResponse { responses, respond_to } => {
                            let msg = build_tool_response_message(&responses);
                            let _ = respond_to.send(enqueue_ctrl(&out_ctrl_tx, msg).await);
                        }
                        LiveCmd::Shutdown => {
                            break;
                        }
                    }
                }

                msg = ws_read.next() => {
                    let Some(msg) = msg else {
                        let _ = evt_tx.send(LiveEvent::Error { message: "live stream ended".into() }).await;
                        break;
                    };
                    let msg = match msg {
                        Ok(m) => m,
                        Err(e) => {
                            let _ = evt_tx.send(LiveEvent::Error { message: format!("websocket read failed: {e}") }).await;
                            break;
                        }
                    };

                    let text = match msg {
                        Message::Close(frame) => {
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            let _ = evt_tx.send(LiveEvent::Error { message: format!("live stream closed: {reason}") }).await;
                            break;
                        }
                        Message::Ping(p) => {
                            // Best-effort: if we can't respond with Pong, treat as disconnect.
                            if out_ctrl_tx.try_send(Message::Pong(p)).is_err() {
                                let _ = evt_tx.try_send(LiveEvent::Error { message: "failed to send pong".into() });
                                break;
                            }
                            continue;
                        }
                        other => match frame_text(other) {
                            Some(t) => t,
                            None => continue,
                        },
                    };

                    match parse_server_message(&text) {
                        Ok(parsed) => {
                            for evt in parsed.events {
                                if evt_tx.send(evt).await.is_err() {
                                    // Receiver dropped: nobody is listening anymore.
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            log::debug!("ignoring live frame: {e}");
                        }
                    }
                }
            }
        }

        // Dropping the outbound senders ends the writer task, which sends Close.
    });

    Ok((GeminiLiveHandle { tx: cmd_tx }, evt_rx))
}

type LiveSocket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect_and_setup(
    req: tokio_tungstenite::tungstenite::handshake::client::Request,
    setup: &LiveSetup,
) -> anyhow::Result<LiveSocket> {
    let (mut ws, _resp) = tokio_tungstenite::connect_async(req)
        .await
        .context("connect gemini live websocket")?;

    ws.send(Message::Text(build_setup_message(setup).into()))
        .await
        .context("send live setup")?;

    loop {
        let Some(msg) = ws.next().await else {
            return Err(anyhow!("live stream closed before setup completed"));
        };
        let msg = msg.context("read live setup response")?;
        if let Message::Close(frame) = &msg {
            let reason = frame
                .as_ref()
                .map(|f| f.reason.to_string())
                .unwrap_or_default();
            return Err(anyhow!("live stream rejected setup: {reason}"));
        }
        let Some(text) = frame_text(msg) else {
            continue;
        };
        if let Ok(parsed) = parse_server_message(&text) {
            if parsed.setup_complete {
                return Ok(ws);
            }
        }
    }
}

async fn enqueue_ctrl(out_ctrl_tx: &mpsc::Sender<Message>, msg: String) -> anyhow::Result<()> {
    let sent = tokio::time::timeout(CTRL_ENQUEUE_TIMEOUT, out_ctrl_tx.send(Message::Text(msg.into()))).await;
    match sent {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(anyhow!("websocket closed")),
        Err(_) => Err(anyhow!("timed out queueing live message")),
    }
}

fn build_live_ws_url(cfg: &GeminiLiveConfig) -> Url {
    let mut url = cfg.ws_url.clone();
    url.query_pairs_mut().append_pair("key", cfg.api_key.trim());
    url
}
