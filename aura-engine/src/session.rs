use aura_core::config::SessionConfig;
use aura_core::pcm::{self, AudioBuffer};
use aura_core::prompt::{
    COMPLETE_SESSION_DESCRIPTION, COMPLETE_SESSION_TOOL, QUOTE_DESCRIPTION, QUOTE_FIELD,
    THEME_DESCRIPTION, THEME_FIELD, system_instruction,
};
use aura_core::types::{SessionId, SessionStatus, SessionSummary, SessionView};
use aura_providers::wire::{FunctionCall, FunctionDeclaration, FunctionResponse, LiveEvent, LiveSetup};
use serde_json::json;
use tokio::time::Instant;

use crate::error::{SessionError, user_facing_error};
use crate::playback::PlaybackScheduler;
use crate::traits::PlaybackId;
use crate::transcript::TranscriptReconciler;

/// Side effects the driver performs on behalf of `SessionCore`.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Greet(String),
    AckToolCalls(Vec<FunctionResponse>),
    Finish(SessionSummary),
}

pub fn complete_session_declaration() -> FunctionDeclaration {
    FunctionDeclaration::with_string_args(
        COMPLETE_SESSION_TOOL,
        COMPLETE_SESSION_DESCRIPTION,
        &[(QUOTE_FIELD, QUOTE_DESCRIPTION), (THEME_FIELD, THEME_DESCRIPTION)],
    )
}

pub fn live_setup(config: &SessionConfig, is_first_time: bool) -> LiveSetup {
    LiveSetup {
        model: config.model.clone(),
        voice_name: config.voice_name.clone(),
        system_instruction: system_instruction(is_first_time),
        tools: vec![complete_session_declaration()],
        output_transcription: true,
    }
}

/// `audio/pcm;rate=24000` -> 24000.
fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.trim().parse().ok())
}

/// Session state without I/O. Every input carries `now`; outputs are returned
/// as `Effect`s, so the whole lifecycle is testable with a fake clock.
pub struct SessionCore {
    id: SessionId,
    config: SessionConfig,
    status: SessionStatus,
    error_message: Option<String>,

    playback: Option<PlaybackScheduler>,
    transcript: TranscriptReconciler,

    pending: Option<SessionSummary>,
    settle_at: Option<Instant>,
    greet_at: Option<Instant>,
    finished: bool,
    closed: bool,
}

impl SessionCore {
    pub fn new(id: SessionId, config: SessionConfig) -> Self {
        Self {
            id,
            config,
            status: SessionStatus::Connecting,
            error_message: None,
            playback: None,
            transcript: TranscriptReconciler::new(),
            pending: None,
            settle_at: None,
            greet_at: None,
            finished: false,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_speaking(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| p.is_speaking())
    }

    pub fn pending_completion(&self) -> Option<&SessionSummary> {
        self.pending.as_ref()
    }

    pub fn transcript(&self) -> &TranscriptReconciler {
        &self.transcript
    }

    fn accepts_events(&self) -> bool {
        self.status == SessionStatus::Active && !self.closed
    }

    /// Stream is open and devices are ready.
    pub fn activate(&mut self, playback: PlaybackScheduler, now: Instant) {
        if self.closed || self.status == SessionStatus::Error {
            return;
        }
        self.playback = Some(playback);
        self.status = SessionStatus::Active;
        self.greet_at = Some(now + self.config.warmup());
        log::info!("session {}: active", self.id);
    }

    pub fn fail(&mut self, err: &SessionError) {
        log::error!("session {}: {err}", self.id);
        self.status = SessionStatus::Error;
        self.error_message = Some(user_facing_error(err));
        self.cancel_timers();
    }

    pub fn on_server_event(
        &mut self,
        event: LiveEvent,
        now: Instant,
    ) -> Result<Vec<Effect>, SessionError> {
        if !self.accepts_events() {
            return Ok(Vec::new());
        }

        let mut effects = Vec::new();
        match event {
            LiveEvent::ToolCall { calls } => {
                let responses: Vec<FunctionResponse> =
                    calls.iter().map(|c| self.handle_tool_call(c)).collect();
                effects.push(Effect::AckToolCalls(responses));
            }
            LiveEvent::ToolCallCancellation { ids } => {
                log::info!(
                    "session {}: tool calls cancelled {ids:?}; keeping pending completion",
                    self.id
                );
            }
            LiveEvent::OutputTranscript { text } => {
                self.transcript.push_fragment(&text);
            }
            LiveEvent::Audio { mime_type, data } => {
                if let Err(e) = self.play_audio(&mime_type, &data, now) {
                    log::warn!("session {}: skipping audio chunk: {e}", self.id);
                }
            }
            LiveEvent::Interrupted => {
                let was_speaking = self.playback.as_mut().is_some_and(|p| p.interrupt());
                self.transcript.on_interrupt(now);
                log::debug!("session {}: interrupted (was speaking: {was_speaking})", self.id);
            }
            LiveEvent::TurnComplete => {
                let (until, clock) = self
                    .playback
                    .as_ref()
                    .map(|p| (p.scheduled_until(), p.clock()))
                    .unwrap_or((0.0, 0.0));
                self.transcript.on_turn_complete(until, clock, now);
            }
            LiveEvent::GoAway { time_left } => {
                log::warn!(
                    "session {}: server is going away (time left: {})",
                    self.id,
                    time_left.as_deref().unwrap_or("unknown")
                );
            }
            LiveEvent::Warning { kind, message } => {
                log::warn!("session {}: {kind}: {message}", self.id);
            }
            LiveEvent::Error { message } => {
                return Err(SessionError::Stream(message));
            }
        }

        self.update_completion(now);
        Ok(effects)
    }

    pub fn on_playback_ended(&mut self, id: PlaybackId, now: Instant) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        if playback.on_ended(id) {
            log::debug!("session {}: agent stopped speaking", self.id);
        }
        self.update_completion(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.transcript.next_deadline(), self.greet_at, self.settle_at]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn on_timer(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.closed {
            return effects;
        }

        self.transcript.fire_due(now);

        if self.greet_at.is_some_and(|t| t <= now) {
            self.greet_at = None;
            effects.push(Effect::Greet(self.config.greeting.clone()));
        }

        if self.settle_at.is_some_and(|t| t <= now) {
            self.settle_at = None;
            if !self.finished && !self.is_speaking() {
                if let Some(summary) = self.pending.clone() {
                    self.finished = true;
                    log::info!("session {}: complete ({})", self.id, summary.theme);
                    effects.push(Effect::Finish(summary));
                }
            }
        }

        effects
    }

    /// Cancel timers and release the output. Capture and transport belong to
    /// the driver and are released after this.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel_timers();
        if let Some(mut playback) = self.playback.take() {
            playback.shutdown();
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            status: self.status,
            messages: self.transcript.messages().to_vec(),
            is_speaking: self.is_speaking(),
            error_message: self.error_message.clone(),
        }
    }

    fn cancel_timers(&mut self) {
        self.transcript.cancel_all();
        self.greet_at = None;
        self.settle_at = None;
    }

    fn play_audio(&mut self, mime_type: &str, data: &str, now: Instant) -> Result<(), SessionError> {
        let Some(playback) = self.playback.as_mut() else {
            return Ok(());
        };
        let rate = rate_from_mime(mime_type).unwrap_or(self.config.output_sample_rate_hz);
        let bytes = pcm::decode(data)?;
        let buffer: AudioBuffer = pcm::decode_audio_data(&bytes, rate, 1)?;

        let clock = playback.clock();
        let handle = playback.schedule(&buffer);
        log::debug!(
            "session {}: audio {:.3}s at {:.3} (clock {:.3})",
            self.id,
            handle.duration,
            handle.start_at,
            clock
        );
        self.transcript.on_buffer_scheduled(handle.start_at, clock, now);
        Ok(())
    }

    fn handle_tool_call(&mut self, call: &FunctionCall) -> FunctionResponse {
        let response = if call.name != COMPLETE_SESSION_TOOL {
            log::warn!("session {}: unknown tool {:?}", self.id, call.name);
            json!({ "error": format!("unknown tool: {}", call.name) })
        } else {
            match (call.string_arg(QUOTE_FIELD), call.string_arg(THEME_FIELD)) {
                (Some(quote), Some(theme)) => {
                    if self.pending.is_none() {
                        log::info!("session {}: completion requested ({theme})", self.id);
                        self.pending = Some(SessionSummary {
                            quote: quote.to_string(),
                            theme: theme.to_string(),
                        });
                    } else {
                        log::info!(
                            "session {}: completion already pending; ignoring repeat",
                            self.id
                        );
                    }
                    json!({ "result": "ok" })
                }
                _ => {
                    log::warn!("session {}: {COMPLETE_SESSION_TOOL} missing arguments", self.id);
                    json!({ "error": "quote and theme are required" })
                }
            }
        };

        FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
        }
    }

    // Finish needs both a payload and silence; the settle timer runs only
    // while both hold.
    fn update_completion(&mut self, now: Instant) {
        if self.finished || self.pending.is_none() || self.is_speaking() {
            self.settle_at = None;
        } else if self.settle_at.is_none() {
            self.settle_at = Some(now + self.config.settle_delay());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOutput;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn audio_event(seconds: f64) -> LiveEvent {
        let samples = vec![0.1f32; (24_000.0 * seconds) as usize];
        LiveEvent::Audio {
            mime_type: "audio/pcm;rate=24000".into(),
            data: pcm::encode(&samples),
        }
    }

    fn complete_call(id: &str, quote: &str, theme: &str) -> LiveEvent {
        LiveEvent::ToolCall {
            calls: vec![FunctionCall {
                id: Some(id.into()),
                name: COMPLETE_SESSION_TOOL.into(),
                args: json!({ "quote": quote, "theme": theme }),
            }],
        }
    }

    fn active_core(t0: Instant) -> (SessionCore, FakeOutput) {
        let out = FakeOutput::new();
        let mut core = SessionCore::new(SessionId::new(), SessionConfig::default());
        core.activate(PlaybackScheduler::new(Box::new(out.clone())), t0);
        (core, out)
    }

    #[test]
    fn mime_rate_is_parsed() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(rate_from_mime("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
    }

    #[test]
    fn setup_declares_complete_session() {
        let setup = live_setup(&SessionConfig::default(), true);
        assert_eq!(setup.voice_name, "Kore");
        assert!(setup.output_transcription);
        assert_eq!(setup.tools.len(), 1);
        assert_eq!(setup.tools[0].name, COMPLETE_SESSION_TOOL);
        assert_eq!(setup.tools[0].parameters.required, vec!["quote", "theme"]);
    }

    #[test]
    fn greeting_is_sent_after_warmup() {
        let t0 = Instant::now();
        let (mut core, _out) = active_core(t0);

        assert_eq!(core.next_deadline(), Some(t0 + ms(1000)));
        assert!(core.on_timer(t0 + ms(999)).is_empty());

        let effects = core.on_timer(t0 + ms(1000));
        assert_eq!(effects, vec![Effect::Greet(SessionConfig::default().greeting)]);
        assert!(core.on_timer(t0 + ms(5000)).is_empty());
    }

    #[test]
    fn completion_waits_for_silence_and_settle() {
        let t0 = Instant::now();
        let (mut core, out) = active_core(t0);
        core.on_timer(t0 + ms(1000));

        core.on_server_event(audio_event(0.5), t0).unwrap();
        let effects = core
            .on_server_event(complete_call("c1", "Be here.", "Quiet Resilience"), t0)
            .unwrap();
        assert!(matches!(&effects[..], [Effect::AckToolCalls(r)] if r[0].response == json!({"result": "ok"})));

        // Still speaking: no settle timer.
        assert!(core.is_speaking());
        assert!(core.on_timer(t0 + ms(10_000)).is_empty());

        let id = out.started()[0].id;
        core.on_playback_ended(id, t0 + ms(500));
        assert!(!core.on_timer(t0 + ms(1999)).iter().any(|e| matches!(e, Effect::Finish(_))));

        let effects = core.on_timer(t0 + ms(2000));
        assert_eq!(
            effects,
            vec![Effect::Finish(SessionSummary {
                quote: "Be here.".into(),
                theme: "Quiet Resilience".into(),
            })]
        );

        // Exactly once.
        core.on_server_event(complete_call("c2", "x", "y"), t0 + ms(3000)).unwrap();
        assert!(core.on_timer(t0 + ms(10_000)).is_empty());
    }

    #[test]
    fn new_audio_disarms_the_settle_timer() {
        let t0 = Instant::now();
        let (mut core, out) = active_core(t0);
        core.on_timer(t0 + ms(1000));

        core.on_server_event(complete_call("c1", "q", "t"), t0).unwrap();
        assert!(core.next_deadline().is_some());

        core.on_server_event(audio_event(1.0), t0 + ms(1000)).unwrap();
        assert!(core.on_timer(t0 + ms(1500)).is_empty());

        out.set_time(1.0);
        let id = out.started()[0].id;
        core.on_playback_ended(id, t0 + ms(2000));
        assert_eq!(core.next_deadline(), Some(t0 + ms(3500)));
        assert!(matches!(&core.on_timer(t0 + ms(3500))[..], [Effect::Finish(_)]));
    }

    #[test]
    fn first_completion_payload_wins() {
        let t0 = Instant::now();
        let (mut core, _out) = active_core(t0);

        core.on_server_event(complete_call("a", "first", "one"), t0).unwrap();
        let effects = core.on_server_event(complete_call("b", "second", "two"), t0).unwrap();

        assert!(matches!(&effects[..], [Effect::AckToolCalls(r)] if r[0].id.as_deref() == Some("b")));
        assert_eq!(core.pending_completion().map(|s| s.quote.as_str()), Some("first"));
    }

    #[test]
    fn unknown_tool_is_acknowledged_with_error() {
        let t0 = Instant::now();
        let (mut core, _out) = active_core(t0);

        let effects = core
            .on_server_event(
                LiveEvent::ToolCall {
                    calls: vec![FunctionCall {
                        id: Some("x".into()),
                        name: "playMusic".into(),
                        args: json!({}),
                    }],
                },
                t0,
            )
            .unwrap();

        let [Effect::AckToolCalls(responses)] = &effects[..] else {
            panic!("expected ack, got {effects:?}");
        };
        assert_eq!(responses[0].name, "playMusic");
        assert!(responses[0].response.get("error").is_some());
        assert!(core.pending_completion().is_none());
    }

    #[test]
    fn undecodable_audio_is_skipped() {
        let t0 = Instant::now();
        let (mut core, out) = active_core(t0);

        let effects = core
            .on_server_event(
                LiveEvent::Audio {
                    mime_type: "audio/pcm;rate=24000".into(),
                    data: pcm::encode(&[0.1]).chars().take(3).collect(),
                },
                t0,
            )
            .unwrap();
        assert!(effects.is_empty());
        assert!(out.started().is_empty());
        assert_eq!(core.status(), SessionStatus::Active);
    }

    #[test]
    fn interrupt_silences_and_resets() {
        let t0 = Instant::now();
        let (mut core, out) = active_core(t0);

        core.on_server_event(audio_event(1.0), t0).unwrap();
        core.on_server_event(audio_event(1.0), t0).unwrap();
        core.on_server_event(LiveEvent::Interrupted, t0).unwrap();

        assert!(!core.is_speaking());
        assert_eq!(out.stopped().len(), 2);

        core.on_server_event(audio_event(0.5), t0).unwrap();
        let last = *out.started().last().unwrap();
        assert_eq!(last.start_at, 0.0);
    }

    #[test]
    fn interrupt_closes_the_turn_and_drops_unheard_captions() {
        let t0 = Instant::now();
        let (mut core, out) = active_core(t0);
        core.on_timer(t0 + ms(1000));

        let say = |core: &mut SessionCore, text: &str, at: Instant| {
            core.on_server_event(LiveEvent::OutputTranscript { text: text.into() }, at)
                .unwrap();
        };

        say(&mut core, "Turn one start.", t0);
        core.on_server_event(audio_event(5.0), t0).unwrap();
        say(&mut core, "Turn one end.", t0);
        core.on_server_event(audio_event(1.0), t0).unwrap();
        core.on_server_event(LiveEvent::TurnComplete, t0).unwrap();
        core.on_timer(t0);

        out.set_time(1.0);
        core.on_server_event(LiveEvent::Interrupted, t0 + ms(1000)).unwrap();

        say(&mut core, "Turn two.", t0 + ms(1000));
        core.on_server_event(audio_event(1.0), t0 + ms(1000)).unwrap();
        core.on_timer(t0 + ms(1000));
        core.on_timer(t0 + ms(10_000));

        let texts: Vec<_> = core.view().messages.into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["Turn one start.", "Turn two."]);
    }

    #[test]
    fn transcript_follows_audio() {
        let t0 = Instant::now();
        let (mut core, out) = active_core(t0);
        core.on_timer(t0 + ms(1000));

        core.on_server_event(audio_event(2.0), t0).unwrap();
        out.set_time(0.5);
        core.on_server_event(LiveEvent::OutputTranscript { text: "Breathe in.".into() }, t0)
            .unwrap();
        core.on_server_event(audio_event(1.0), t0).unwrap();

        core.on_timer(t0 + ms(1000));
        assert!(core.view().messages.is_empty());

        core.on_timer(t0 + ms(1500));
        let view = core.view();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].text, "Breathe in.");
        assert!(view.is_speaking);
    }

    #[test]
    fn stream_error_is_fatal() {
        let t0 = Instant::now();
        let (mut core, _out) = active_core(t0);

        let err = core
            .on_server_event(LiveEvent::Error { message: "socket closed".into() }, t0)
            .unwrap_err();
        core.fail(&err);

        let view = core.view();
        assert_eq!(view.status, SessionStatus::Error);
        assert_eq!(
            view.error_message.as_deref(),
            Some("Connection lost. Please try reconnecting.")
        );
        assert_eq!(core.next_deadline(), None);
        assert!(core.on_server_event(audio_event(0.5), t0).unwrap().is_empty());
    }

    #[test]
    fn close_is_idempotent_and_releases_output() {
        let t0 = Instant::now();
        let (mut core, out) = active_core(t0);
        core.on_server_event(audio_event(1.0), t0).unwrap();
        core.on_server_event(complete_call("c", "q", "t"), t0).unwrap();

        core.close();
        core.close();

        assert_eq!(out.close_count(), 1);
        assert_eq!(core.next_deadline(), None);
        assert!(core.on_timer(t0 + ms(60_000)).is_empty());
        assert!(core.on_server_event(audio_event(1.0), t0).unwrap().is_empty());
    }
}
