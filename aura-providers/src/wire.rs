//! Gemini Live (`BidiGenerateContent`) JSON messages.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSchema {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: serde_json::Map<String, Value>,
    pub required: Vec<String>,
}

impl FunctionDeclaration {
    /// Declaration whose arguments are all required strings.
    pub fn with_string_args(
        name: impl Into<String>,
        description: impl Into<String>,
        args: &[(&str, &str)],
    ) -> Self {
        let mut properties = serde_json::Map::new();
        for (field, description) in args {
            properties.insert(
                (*field).to_string(),
                json!({ "type": "STRING", "description": description }),
            );
        }
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ObjectSchema {
                kind: "OBJECT",
                properties,
                required: args.iter().map(|(f, _)| (*f).to_string()).collect(),
            },
        }
    }
}

/// Everything the client announces in its first message.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub tools: Vec<FunctionDeclaration>,
    pub output_transcription: bool,
}

pub fn build_setup_message(setup: &LiveSetup) -> String {
    let mut inner = json!({
        "model": setup.model,
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": setup.voice_name } }
            }
        },
        "systemInstruction": { "parts": [{ "text": setup.system_instruction }] },
    });

    if let Some(map) = inner.as_object_mut() {
        if !setup.tools.is_empty() {
            map.insert(
                "tools".into(),
                json!([{ "functionDeclarations": setup.tools }]),
            );
        }
        if setup.output_transcription {
            map.insert("outputAudioTranscription".into(), json!({}));
        }
    }

    json!({ "setup": inner }).to_string()
}

pub fn build_realtime_audio_message(mime_type: &str, data_b64: &str) -> String {
    json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": mime_type, "data": data_b64 }]
        }
    })
    .to_string()
}

pub fn build_user_text_turn(text: &str) -> String {
    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": text }] }],
            "turnComplete": true
        }
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

pub fn build_tool_response_message(responses: &[FunctionResponse]) -> String {
    json!({ "toolResponse": { "functionResponses": responses } }).to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl FunctionCall {
    pub fn string_arg(&self, field: &str) -> Option<&str> {
        self.args.get(field).and_then(|v| v.as_str())
    }
}

/// Inbound events, in the order they should be applied.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    ToolCall { calls: Vec<FunctionCall> },
    ToolCallCancellation { ids: Vec<String> },
    OutputTranscript { text: String },
    Audio { mime_type: String, data: String },
    Interrupted,
    TurnComplete,
    GoAway { time_left: Option<String> },
    Warning { kind: String, message: String },
    Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallMsg>,
    tool_call_cancellation: Option<ToolCallCancellationMsg>,
    go_away: Option<GoAwayMsg>,
    usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<Content>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<Blob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallMsg {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCallCancellationMsg {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAwayMsg {
    time_left: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedServerMessage {
    pub setup_complete: bool,
    pub events: Vec<LiveEvent>,
}

pub fn parse_server_message(s: &str) -> anyhow::Result<ParsedServerMessage> {
    let msg: ServerMessage = serde_json::from_str(s).context("decode live server json")?;

    let known = msg.setup_complete.is_some()
        || msg.server_content.is_some()
        || msg.tool_call.is_some()
        || msg.tool_call_cancellation.is_some()
        || msg.go_away.is_some()
        || msg.usage_metadata.is_some();
    if !known {
        return Err(anyhow!("unrecognized live server message"));
    }

    let mut out = ParsedServerMessage {
        setup_complete: msg.setup_complete.is_some(),
        events: Vec::new(),
    };

    if let Some(tc) = msg.tool_call {
        if !tc.function_calls.is_empty() {
            out.events.push(LiveEvent::ToolCall {
                calls: tc.function_calls,
            });
        }
    }

    if let Some(c) = msg.tool_call_cancellation {
        out.events.push(LiveEvent::ToolCallCancellation { ids: c.ids });
    }

    if let Some(content) = msg.server_content {
        // Transcription before audio so text pairs with the audio in the same message.
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                out.events.push(LiveEvent::OutputTranscript { text });
            }
        }

        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(blob) = part.inline_data {
                out.events.push(LiveEvent::Audio {
                    mime_type: blob.mime_type.unwrap_or_default(),
                    data: blob.data,
                });
            }
        }

        if content.interrupted {
            out.events.push(LiveEvent::Interrupted);
        }
        if content.turn_complete {
            out.events.push(LiveEvent::TurnComplete);
        }
    }

    if let Some(g) = msg.go_away {
        out.events.push(LiveEvent::GoAway {
            time_left: g.time_left,
        });
    }

    Ok(out)
}
