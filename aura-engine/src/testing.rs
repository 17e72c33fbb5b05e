//! In-memory devices and transport for tests and demos.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use aura_core::pcm::AudioBuffer;
use aura_core::types::SessionSummary;
use aura_providers::wire::{FunctionResponse, LiveEvent, LiveSetup};
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::traits::{
    AudioOutput, CaptureStream, LiveConnector, LiveTransport, MicrophoneSource, PlaybackId,
    SampleCallback, SessionHost, SpeakerSink,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartedBuffer {
    pub id: PlaybackId,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Default)]
struct OutputState {
    time: f64,
    started: Vec<StartedBuffer>,
    stopped: Vec<PlaybackId>,
    close_count: usize,
    ended: Option<mpsc::UnboundedSender<PlaybackId>>,
}

/// Output device whose clock only moves when told to.
#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, seconds: f64) {
        lock(&self.state).time = seconds;
    }

    pub fn started(&self) -> Vec<StartedBuffer> {
        lock(&self.state).started.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        lock(&self.state).stopped.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }

    /// Report a natural end for `id`, as the device would.
    pub fn finish(&self, id: PlaybackId) {
        if let Some(tx) = lock(&self.state).ended.as_ref() {
            let _ = tx.send(id);
        }
    }

    /// Advance the clock past everything started so far and report each end.
    pub fn finish_all(&self) {
        let (ids, end) = {
            let st = lock(&self.state);
            let stopped = &st.stopped;
            let ids: Vec<_> = st
                .started
                .iter()
                .filter(|b| !stopped.contains(&b.id))
                .map(|b| b.id)
                .collect();
            let end = st
                .started
                .iter()
                .map(|b| b.start_at + b.duration)
                .fold(st.time, f64::max);
            (ids, end)
        };
        self.set_time(end);
        for id in ids {
            self.finish(id);
        }
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        lock(&self.state).time
    }

    fn start(&mut self, id: PlaybackId, buffer: &AudioBuffer, start_at: f64) {
        lock(&self.state).started.push(StartedBuffer {
            id,
            start_at,
            duration: buffer.duration(),
        });
    }

    fn stop(&mut self, id: PlaybackId) {
        lock(&self.state).stopped.push(id);
    }

    fn close(&mut self) {
        let mut st = lock(&self.state);
        st.close_count += 1;
        st.ended = None;
    }
}

#[derive(Clone, Default)]
pub struct FakeSpeaker {
    output: FakeOutput,
    fail: Option<String>,
}

impl FakeSpeaker {
    pub fn new(output: FakeOutput) -> Self {
        Self { output, fail: None }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            output: FakeOutput::new(),
            fail: Some(reason.into()),
        }
    }
}

impl SpeakerSink for FakeSpeaker {
    fn open(
        &self,
        _sample_rate_hz: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn AudioOutput>, SessionError> {
        if let Some(reason) = &self.fail {
            return Err(SessionError::OutputDevice(reason.clone()));
        }
        lock(&self.output.state).ended = Some(ended);
        Ok(Box::new(self.output.clone()))
    }
}

#[derive(Default)]
struct MicState {
    callback: Option<SampleCallback>,
    sample_rate_hz: Option<u32>,
    close_count: usize,
}

/// Microphone that delivers whatever the test feeds it.
#[derive(Clone, Default)]
pub struct FakeMicrophone {
    state: Arc<Mutex<MicState>>,
    fail: Option<String>,
}

impl FakeMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            fail: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn feed(&self, samples: &[f32]) {
        let cb = lock(&self.state).callback.clone();
        if let Some(cb) = cb {
            cb(samples);
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).callback.is_some()
    }

    pub fn opened_at_rate(&self) -> Option<u32> {
        lock(&self.state).sample_rate_hz
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }
}

impl MicrophoneSource for FakeMicrophone {
    fn open(
        &self,
        sample_rate_hz: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, SessionError> {
        if let Some(reason) = &self.fail {
            return Err(SessionError::Permission(reason.clone()));
        }
        let mut st = lock(&self.state);
        st.callback = Some(on_samples);
        st.sample_rate_hz = Some(sample_rate_hz);
        Ok(Box::new(FakeCaptureStream {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct FakeCaptureStream {
    state: Arc<Mutex<MicState>>,
    closed: bool,
}

impl CaptureStream for FakeCaptureStream {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut st = lock(&self.state);
        st.callback = None;
        st.close_count += 1;
    }
}

/// Transport that records what the session sends. Server events are pushed
/// through the sender returned by `new`.
pub struct ScriptedTransport {
    events: Mutex<Option<mpsc::Receiver<LiveEvent>>>,
    audio: Mutex<Vec<(&'static str, String)>>,
    user_turns: Mutex<Vec<String>>,
    tool_responses: Mutex<Vec<Vec<FunctionResponse>>>,
    accept_audio: AtomicBool,
    fail_sends: AtomicBool,
    shutdowns: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, mpsc::Sender<LiveEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let transport = Arc::new(Self {
            events: Mutex::new(Some(rx)),
            audio: Mutex::new(Vec::new()),
            user_turns: Mutex::new(Vec::new()),
            tool_responses: Mutex::new(Vec::new()),
            accept_audio: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        });
        (transport, tx)
    }

    pub fn set_accept_audio(&self, accept: bool) {
        self.accept_audio.store(accept, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent_audio(&self) -> Vec<(&'static str, String)> {
        lock(&self.audio).clone()
    }

    pub fn user_turns(&self) -> Vec<String> {
        lock(&self.user_turns).clone()
    }

    pub fn tool_responses(&self) -> Vec<Vec<FunctionResponse>> {
        lock(&self.tool_responses).clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<LiveEvent>> {
        lock(&self.events).take()
    }
}

#[async_trait::async_trait]
impl LiveTransport for ScriptedTransport {
    fn try_send_audio(&self, mime_type: &'static str, data_b64: String) -> bool {
        if !self.accept_audio.load(Ordering::SeqCst) {
            return false;
        }
        lock(&self.audio).push((mime_type, data_b64));
        true
    }

    async fn send_user_turn(&self, text: &str) -> anyhow::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("transport closed"));
        }
        lock(&self.user_turns).push(text.to_string());
        Ok(())
    }

    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> anyhow::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("transport closed"));
        }
        lock(&self.tool_responses).push(responses);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a `ScriptedTransport` once.
pub struct ScriptedConnector {
    transport: Arc<ScriptedTransport>,
    setups: Mutex<Vec<LiveSetup>>,
    delay: Option<Duration>,
    fail: Option<String>,
}

impl ScriptedConnector {
    pub fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self {
            transport,
            setups: Mutex::new(Vec::new()),
            delay: None,
            fail: None,
        }
    }

    /// Take `delay` before the stream opens.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail = Some(reason.into());
        self
    }

    pub fn setups(&self) -> Vec<LiveSetup> {
        lock(&self.setups).clone()
    }
}

#[async_trait::async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(
        &self,
        setup: LiveSetup,
    ) -> anyhow::Result<(Arc<dyn LiveTransport>, mpsc::Receiver<LiveEvent>)> {
        lock(&self.setups).push(setup);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail {
            return Err(anyhow!("{reason}"));
        }
        let events = self
            .transport
            .take_events()
            .ok_or_else(|| anyhow!("scripted transport already connected"))?;
        let transport: Arc<dyn LiveTransport> = self.transport.clone();
        Ok((transport, events))
    }
}

#[derive(Default)]
pub struct RecordingHost {
    finished: Mutex<Vec<SessionSummary>>,
    closed: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finished(&self) -> Vec<SessionSummary> {
        lock(&self.finished).clone()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SessionHost for RecordingHost {
    fn on_finish(&self, summary: SessionSummary) {
        lock(&self.finished).push(summary);
    }

    fn on_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
