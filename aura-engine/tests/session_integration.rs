use std::sync::Arc;
use std::time::Duration;

use aura_core::config::SessionConfig;
use aura_core::pcm;
use aura_core::prompt::COMPLETE_SESSION_TOOL;
use aura_core::types::{SessionStatus, SessionSummary, SessionView};
use aura_engine::live::{SessionDeps, SessionHandle, start_session};
use aura_engine::testing::{
    FakeMicrophone, FakeOutput, FakeSpeaker, RecordingHost, ScriptedConnector, ScriptedTransport,
};
use aura_providers::wire::{FunctionCall, LiveEvent};
use serde_json::json;
use tokio::sync::mpsc;

struct Rig {
    mic: FakeMicrophone,
    out: FakeOutput,
    transport: Arc<ScriptedTransport>,
    connector: Arc<ScriptedConnector>,
    host: Arc<RecordingHost>,
    server: mpsc::Sender<LiveEvent>,
}

impl Rig {
    fn new() -> Self {
        Self::with_connector(|c| c)
    }

    fn with_connector(f: impl FnOnce(ScriptedConnector) -> ScriptedConnector) -> Self {
        let (transport, server) = ScriptedTransport::new();
        let connector = Arc::new(f(ScriptedConnector::new(transport.clone())));
        Self {
            mic: FakeMicrophone::new(),
            out: FakeOutput::new(),
            transport,
            connector,
            host: RecordingHost::new(),
            server,
        }
    }

    fn deps(&self) -> SessionDeps {
        SessionDeps {
            microphone: Arc::new(self.mic.clone()),
            speaker: Arc::new(FakeSpeaker::new(self.out.clone())),
            connector: self.connector.clone(),
            host: self.host.clone(),
        }
    }

    fn start(&self) -> SessionHandle {
        start_session(SessionConfig::default(), true, self.deps())
    }
}

async fn wait_for(handle: &SessionHandle, f: impl FnMut(&SessionView) -> bool) -> SessionView {
    let mut rx = handle.subscribe();
    let view = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(f))
        .await
        .expect("timed out waiting for session view")
        .expect("session view channel closed")
        .clone();
    view
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn audio(seconds: f64) -> LiveEvent {
    let samples = vec![0.25f32; (24_000.0 * seconds) as usize];
    LiveEvent::Audio {
        mime_type: "audio/pcm;rate=24000".into(),
        data: pcm::encode(&samples),
    }
}

fn complete_session(quote: &str, theme: &str) -> LiveEvent {
    LiveEvent::ToolCall {
        calls: vec![FunctionCall {
            id: Some("call-1".into()),
            name: COMPLETE_SESSION_TOOL.into(),
            args: json!({ "quote": quote, "theme": theme }),
        }],
    }
}

#[tokio::test(start_paused = true)]
async fn session_runs_from_greeting_to_summary() {
    let rig = Rig::new();
    let handle = rig.start();

    wait_for(&handle, |v| v.status == SessionStatus::Active).await;
    assert_eq!(rig.mic.opened_at_rate(), Some(16_000));

    let setups = rig.connector.setups();
    assert_eq!(setups.len(), 1);
    assert_eq!(setups[0].tools[0].name, COMPLETE_SESSION_TOOL);
    assert!(setups[0].output_transcription);

    // Microphone audio goes upstream in fixed frames.
    rig.mic.feed(&vec![0.1; 4096 * 2 + 10]);
    let sent = rig.transport.sent_audio();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, pcm::UPSTREAM_MIME_TYPE);

    // Greeting after the warm-up delay.
    assert!(rig.transport.user_turns().is_empty());
    settle(1100).await;
    assert_eq!(
        rig.transport.user_turns(),
        vec![SessionConfig::default().greeting]
    );

    rig.server
        .send(LiveEvent::OutputTranscript {
            text: "Take a breath. [MANTRA]I am enough[/MANTRA]".into(),
        })
        .await
        .unwrap();
    rig.server.send(audio(0.5)).await.unwrap();
    rig.server.send(LiveEvent::TurnComplete).await.unwrap();
    rig.server
        .send(complete_session("Be here now.", "Quiet Resilience"))
        .await
        .unwrap();

    let view = wait_for(&handle, |v| !v.messages.is_empty()).await;
    assert_eq!(
        view.messages[0].text,
        "Take a breath. [MANTRA]I am enough[/MANTRA]"
    );
    assert!(view.is_speaking);

    settle(10).await;
    let acks = rig.transport.tool_responses();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0][0].id.as_deref(), Some("call-1"));
    assert_eq!(acks[0][0].response, json!({ "result": "ok" }));

    // Still speaking: no summary however long we wait.
    settle(5000).await;
    assert!(rig.host.finished().is_empty());

    rig.out.finish_all();
    wait_for(&handle, |v| !v.is_speaking).await;
    settle(1400).await;
    assert!(rig.host.finished().is_empty());
    settle(200).await;
    assert_eq!(
        rig.host.finished(),
        vec![SessionSummary {
            quote: "Be here now.".into(),
            theme: "Quiet Resilience".into(),
        }]
    );

    handle.close().await;
    handle.close().await;

    assert_eq!(rig.out.close_count(), 1);
    assert_eq!(rig.mic.close_count(), 1);
    assert_eq!(rig.transport.shutdown_count(), 1);
    assert_eq!(rig.host.closed_count(), 1);
    assert_eq!(rig.host.finished().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn interruption_stops_playback() {
    let rig = Rig::new();
    let handle = rig.start();
    wait_for(&handle, |v| v.status == SessionStatus::Active).await;

    rig.server.send(audio(1.0)).await.unwrap();
    rig.server.send(audio(1.0)).await.unwrap();
    wait_for(&handle, |v| v.is_speaking).await;

    rig.server.send(LiveEvent::Interrupted).await.unwrap();
    wait_for(&handle, |v| !v.is_speaking).await;
    assert_eq!(rig.out.stopped().len(), 2);

    // The next buffer starts from the current clock, not after the stopped ones.
    rig.out.set_time(0.25);
    rig.server.send(audio(0.5)).await.unwrap();
    wait_for(&handle, |v| v.is_speaking).await;
    let last = *rig.out.started().last().unwrap();
    assert_eq!(last.start_at, 0.25);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn interrupted_turn_keeps_transcript_in_order() {
    let rig = Rig::new();
    let handle = rig.start();
    wait_for(&handle, |v| v.status == SessionStatus::Active).await;

    let say = |text: &str| LiveEvent::OutputTranscript { text: text.into() };
    rig.server.send(say("Turn one start.")).await.unwrap();
    rig.server.send(audio(5.0)).await.unwrap();
    rig.server.send(say("Turn one end.")).await.unwrap();
    rig.server.send(audio(1.0)).await.unwrap();
    rig.server.send(LiveEvent::TurnComplete).await.unwrap();
    wait_for(&handle, |v| v.messages.len() == 1).await;

    settle(1000).await;
    rig.out.set_time(1.0);
    rig.server.send(LiveEvent::Interrupted).await.unwrap();
    wait_for(&handle, |v| !v.is_speaking).await;

    rig.server.send(say("Turn two.")).await.unwrap();
    rig.server.send(audio(1.0)).await.unwrap();
    wait_for(&handle, |v| v.messages.len() == 2).await;

    // The stopped buffer's caption never shows up, even after its old due time.
    settle(10_000).await;
    let texts: Vec<_> = handle.view().messages.into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["Turn one start.", "Turn two."]);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn typed_text_goes_out_as_a_user_turn() {
    let rig = Rig::new();
    let handle = rig.start();
    wait_for(&handle, |v| v.status == SessionStatus::Active).await;

    handle.send_text("Hello Aura, are you there?").await;
    settle(10).await;
    assert_eq!(rig.transport.user_turns(), vec!["Hello Aura, are you there?".to_string()]);

    handle.close().await;
    // Ignored once closed.
    handle.send_text("too late").await;
    assert_eq!(rig.transport.user_turns().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_while_connecting_releases_devices() {
    let rig = Rig::with_connector(|c| c.with_delay(Duration::from_secs(5)));
    let handle = rig.start();

    settle(100).await;
    assert!(rig.mic.is_open());

    handle.close().await;

    assert_eq!(rig.mic.close_count(), 1);
    assert_eq!(rig.out.close_count(), 1);
    assert_eq!(rig.host.closed_count(), 1);
    assert_eq!(rig.transport.shutdown_count(), 0);
    assert_ne!(handle.view().status, SessionStatus::Active);

    // Second close on a finished session returns immediately.
    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn denied_microphone_is_reported() {
    let rig = Rig::new();
    let deps = SessionDeps {
        microphone: Arc::new(FakeMicrophone::denied("access denied by user")),
        ..rig.deps()
    };
    let handle = start_session(SessionConfig::default(), false, deps);

    let view = wait_for(&handle, |v| v.status == SessionStatus::Error).await;
    assert!(view.error_message.unwrap().contains("Microphone"));
    assert!(rig.connector.setups().is_empty());
    assert_eq!(rig.out.close_count(), 0);
    assert_eq!(rig.host.closed_count(), 1);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_connect_releases_devices() {
    let rig = Rig::with_connector(|c| c.failing("connection refused"));
    let handle = rig.start();

    let view = wait_for(&handle, |v| v.status == SessionStatus::Error).await;
    assert!(view.error_message.is_some());
    assert_eq!(rig.mic.close_count(), 1);
    assert_eq!(rig.out.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_stream_ends_the_session() {
    let Rig {
        mic,
        out,
        transport,
        connector,
        host,
        server,
    } = Rig::new();
    let deps = SessionDeps {
        microphone: Arc::new(mic.clone()),
        speaker: Arc::new(FakeSpeaker::new(out.clone())),
        connector,
        host: host.clone(),
    };
    let handle = start_session(SessionConfig::default(), true, deps);
    wait_for(&handle, |v| v.status == SessionStatus::Active).await;

    server.send(audio(1.0)).await.unwrap();
    drop(server);

    let view = wait_for(&handle, |v| v.status == SessionStatus::Error).await;
    assert_eq!(
        view.error_message.as_deref(),
        Some("Connection lost. Please try reconnecting.")
    );
    assert!(!view.is_speaking);
    assert_eq!(out.close_count(), 1);
    assert_eq!(mic.close_count(), 1);
    assert_eq!(transport.shutdown_count(), 1);
    assert_eq!(host.closed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_acknowledgement_does_not_block_completion() {
    let rig = Rig::new();
    let handle = rig.start();
    wait_for(&handle, |v| v.status == SessionStatus::Active).await;

    rig.transport.set_fail_sends(true);
    rig.server
        .send(complete_session("Rest easy.", "Gentle Strength"))
        .await
        .unwrap();

    settle(1600).await;
    assert_eq!(handle.view().status, SessionStatus::Active);
    assert_eq!(rig.host.finished().len(), 1);
    assert_eq!(rig.host.finished()[0].theme, "Gentle Strength");

    handle.close().await;
}
