use std::sync::Arc;

use aura_core::config::SessionConfig;
use aura_core::types::{SessionId, SessionView};
use aura_providers::wire::LiveEvent;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::capture::CapturePipeline;
use crate::error::SessionError;
use crate::playback::PlaybackScheduler;
use crate::session::{Effect, SessionCore, live_setup};
use crate::traits::{
    CaptureStream, LiveConnector, LiveTransport, MicrophoneSource, PlaybackId, SampleCallback,
    SessionHost, SpeakerSink,
};

/// Everything a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub microphone: Arc<dyn MicrophoneSource>,
    pub speaker: Arc<dyn SpeakerSink>,
    pub connector: Arc<dyn LiveConnector>,
    pub host: Arc<dyn SessionHost>,
}

enum SessionCmd {
    SendText(String),
    Close { done: oneshot::Sender<()> },
}

/// Host-side handle to a running session.
pub struct SessionHandle {
    id: SessionId,
    cmd_tx: mpsc::Sender<SessionCmd>,
    view_rx: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Send a typed user turn, e.g. to nudge an agent that has not spoken.
    /// Ignored once the session has ended.
    pub async fn send_text(&self, text: impl Into<String>) {
        let _ = self.cmd_tx.send(SessionCmd::SendText(text.into())).await;
    }

    /// Release every resource. Safe to call more than once, and before the
    /// stream has opened; resolves once teardown finished.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCmd::Close { done: done_tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }
}

/// Releases the microphone when dropped, including when startup is abandoned
/// half-way.
struct CaptureGuard(Box<dyn CaptureStream>);

impl CaptureGuard {
    fn close(&mut self) {
        self.0.close();
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

struct Started {
    capture: CaptureGuard,
    playback: PlaybackScheduler,
    transport: Arc<dyn LiveTransport>,
    events: mpsc::Receiver<LiveEvent>,
}

/// Start a session on the current tokio runtime.
pub fn start_session(config: SessionConfig, is_first_time: bool, deps: SessionDeps) -> SessionHandle {
    let id = SessionId::new();
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (view_tx, view_rx) = watch::channel(SessionView::default());

    let driver = Driver {
        core: SessionCore::new(id, config.clone()),
        capture: CapturePipeline::new(config.capture_frame_len),
        config,
        is_first_time,
        deps,
        view_tx,
    };
    tokio::spawn(driver.run(cmd_rx));

    SessionHandle {
        id,
        cmd_tx,
        view_rx,
    }
}

// Acquire in order: microphone, speaker, stream. An early return drops what
// was already acquired, which releases it.
async fn open_resources(
    deps: SessionDeps,
    config: SessionConfig,
    is_first_time: bool,
    on_samples: SampleCallback,
    ended: mpsc::UnboundedSender<PlaybackId>,
) -> Result<Started, SessionError> {
    let microphone = Arc::clone(&deps.microphone);
    let input_rate = config.input_sample_rate_hz;
    let capture = tokio::task::spawn_blocking(move || {
        microphone.open(input_rate, on_samples).map(CaptureGuard)
    })
    .await
    .map_err(|e| SessionError::Permission(format!("microphone worker failed: {e}")))??;

    let speaker = Arc::clone(&deps.speaker);
    let output_rate = config.output_sample_rate_hz;
    let playback = tokio::task::spawn_blocking(move || {
        speaker.open(output_rate, ended).map(PlaybackScheduler::new)
    })
    .await
    .map_err(|e| SessionError::OutputDevice(format!("speaker worker failed: {e}")))??;

    let (transport, events) = deps
        .connector
        .connect(live_setup(&config, is_first_time))
        .await
        .map_err(|e| SessionError::TransportOpen(format!("{e:#}")))?;

    Ok(Started {
        capture,
        playback,
        transport,
        events,
    })
}

struct Driver {
    core: SessionCore,
    config: SessionConfig,
    is_first_time: bool,
    deps: SessionDeps,
    capture: Arc<CapturePipeline>,
    view_tx: watch::Sender<SessionView>,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCmd>) {
        self.publish();
        log::info!("session {}: connecting", self.core.id());

        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        let opening = open_resources(
            self.deps.clone(),
            self.config.clone(),
            self.is_first_time,
            self.capture.callback(),
            ended_tx,
        );

        let mut close_while_connecting = None;
        // Text typed before the stream opens has nowhere to go.
        let started = {
            tokio::pin!(opening);
            loop {
                tokio::select! {
                    r = &mut opening => break Some(r),
                    cmd = cmd_rx.recv() => match cmd {
                        Some(SessionCmd::SendText(_)) => {
                            log::warn!("session {}: not connected yet; dropping text turn", self.core.id());
                        }
                        other => {
                            close_while_connecting = other;
                            break None;
                        }
                    },
                }
            }
        };

        let started = match started {
            Some(Ok(s)) => s,
            Some(Err(e)) => {
                self.core.fail(&e);
                self.finish_without_stream();
                Self::drain_closes(cmd_rx).await;
                return;
            }
            None => {
                log::info!("session {}: closed while connecting", self.core.id());
                self.finish_without_stream();
                if let Some(SessionCmd::Close { done }) = close_while_connecting {
                    let _ = done.send(());
                }
                return;
            }
        };

        let Started {
            mut capture,
            playback,
            transport,
            mut events,
        } = started;

        self.core.activate(playback, Instant::now());
        self.capture.attach(Arc::clone(&transport));
        self.publish();

        let mut pending_close = None;
        loop {
            let deadline = self.core.next_deadline();
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::SendText(text)) => {
                        log::info!("session {}: sending typed turn", self.core.id());
                        self.send_user_turn(text, &transport);
                    }
                    Some(SessionCmd::Close { done }) => {
                        pending_close = Some(done);
                        log::info!("session {}: close requested", self.core.id());
                        break;
                    }
                    None => {
                        log::info!("session {}: every handle dropped", self.core.id());
                        break;
                    }
                },
                ev = events.recv() => {
                    let result = match ev {
                        Some(ev) => self.core.on_server_event(ev, Instant::now()),
                        None => Err(SessionError::Stream("live stream ended".into())),
                    };
                    match result {
                        Ok(effects) => self.apply(effects, &transport),
                        Err(e) if e.is_fatal() => {
                            self.core.fail(&e);
                            break;
                        }
                        Err(e) => log::warn!("session {}: {e}", self.core.id()),
                    }
                }
                Some(id) = ended_rx.recv() => {
                    self.core.on_playback_ended(id, Instant::now());
                }
                _ = wait_until(deadline) => {
                    let effects = self.core.on_timer(Instant::now());
                    self.apply(effects, &transport);
                }
            }
            self.publish();
        }

        // Timers and output first, then capture, then the stream.
        self.core.close();
        capture.close();
        self.capture.detach();
        transport.shutdown().await;
        self.publish();

        let stats = self.capture.stats();
        log::info!(
            "session {}: closed (frames sent {}, dropped {})",
            self.core.id(),
            stats.sent,
            stats.dropped
        );
        self.deps.host.on_closed();

        match pending_close {
            Some(done) => {
                let _ = done.send(());
            }
            None => Self::drain_closes(cmd_rx).await,
        }
    }

    fn finish_without_stream(&mut self) {
        self.core.close();
        self.capture.detach();
        self.publish();
        self.deps.host.on_closed();
    }

    fn apply(&self, effects: Vec<Effect>, transport: &Arc<dyn LiveTransport>) {
        let id = self.core.id();
        for effect in effects {
            match effect {
                Effect::Greet(text) => self.send_user_turn(text, transport),
                Effect::AckToolCalls(responses) => {
                    let transport = Arc::clone(transport);
                    let name = responses
                        .iter()
                        .map(|r| r.name.as_str())
                        .collect::<Vec<_>>()
                        .join(",");
                    tokio::spawn(async move {
                        if let Err(e) = transport.send_tool_response(responses).await {
                            let err = SessionError::ToolAck {
                                name,
                                reason: format!("{e:#}"),
                            };
                            log::warn!("session {id}: {err}");
                        }
                    });
                }
                Effect::Finish(summary) => self.deps.host.on_finish(summary),
            }
        }
    }

    fn send_user_turn(&self, text: String, transport: &Arc<dyn LiveTransport>) {
        let id = self.core.id();
        let transport = Arc::clone(transport);
        tokio::spawn(async move {
            if let Err(e) = transport.send_user_turn(&text).await {
                log::warn!("session {id}: failed to send user turn: {e:#}");
            }
        });
    }

    fn publish(&self) {
        let view = self.core.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    // The session ended on its own; keep answering close() until every
    // handle is gone.
    async fn drain_closes(mut cmd_rx: mpsc::Receiver<SessionCmd>) {
        cmd_rx.close();
        while let Some(cmd) = cmd_rx.recv().await {
            if let SessionCmd::Close { done } = cmd {
                let _ = done.send(());
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
