//! Wire types for the Gemini Live `BidiGenerateContent` protocol.
//!
//! Client messages serialize as single-key objects (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`, ...) which is exactly how serde renders an
//! externally tagged enum. Server messages are parsed leniently: every field
//! is optional and unknown fields are ignored, so a newer server revision
//! does not break an older client.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Client -> server ---

/// A message written by the client onto the transport.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseMessage),
}

impl ClientMessage {
    /// Short name used in `log` events and traces.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::ClientContent(_) => "clientContent",
            ClientMessage::RealtimeInput(_) => "realtimeInput",
            ClientMessage::ToolResponse(_) => "toolResponse",
        }
    }
}

/// The first message of every session.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    #[default]
    Audio,
}

impl std::str::FromStr for ResponseModality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(ResponseModality::Audio),
            "text" => Ok(ResponseModality::Text),
            other => Err(format!("'{other}' is not a response modality (audio|text)")),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty marker object that switches a transcription stream on.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct TranscriptionConfig {}

/// One entry of the setup message's `tools` list.
///
/// Client-side tools contribute `{"functionDeclarations": [...]}`; tools the
/// remote service runs itself contribute a bare key such as `{"googleSearch": {}}`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ToolDeclaration {
    FunctionDeclarations(Vec<FunctionDeclaration>),
    GoogleSearch(serde_json::Map<String, Value>),
    CodeExecution(serde_json::Map<String, Value>),
}

impl ToolDeclaration {
    /// Names of the client-side functions advertised by this entry.
    pub fn function_names(&self) -> Vec<&str> {
        match self {
            ToolDeclaration::FunctionDeclarations(decls) => {
                decls.iter().map(|d| d.name.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A structured conversational turn (`clientContent`).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientContent {
    /// A complete user turn consisting of a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::Text(text.into())],
            }],
            turn_complete: true,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<bool>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub function_responses: Vec<ToolResponse>,
}

/// Base64 payload tagged with its MIME type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    pub fn encode(mime_type: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(payload),
        }
    }

    pub fn decode(&self) -> Result<Bytes, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map(Bytes::from)
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

/// A single element of a turn.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(Blob),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub response: Value,
}

// --- Tool call correlation ---

/// A request from the model to run a client-side tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// The answer to exactly one [`ToolCall`], correlated by `id`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub response: ToolResult,
}

impl ToolResponse {
    pub fn output(call: &ToolCall, output: Value) -> Self {
        Self {
            id: call.id.clone(),
            name: Some(call.name.clone()),
            response: ToolResult::Output(output),
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: Some(call.name.clone()),
            response: ToolResult::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.response, ToolResult::Error(_))
    }
}

/// Serialized as `{"output": ...}` or `{"error": "..."}`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolResult {
    Output(Value),
    Error(String),
}

// --- Server -> client ---

/// Any message the remote service may send. Exactly one field is usually set.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ServerToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
    pub usage_metadata: Option<Value>,
    pub error: Option<Value>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ServerTurn>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub generation_complete: Option<bool>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ServerTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

/// A part as it arrives on the wire; converted into [`Part`] by the coordinator.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<Blob>,
    pub function_call: Option<FunctionCall>,
    pub function_response: Option<FunctionResponse>,
}

impl ServerPart {
    pub fn into_part(self) -> Option<Part> {
        if let Some(call) = self.function_call {
            Some(Part::FunctionCall(call))
        } else if let Some(response) = self.function_response {
            Some(Part::FunctionResponse(response))
        } else if let Some(blob) = self.inline_data {
            Some(Part::InlineData(blob))
        } else {
            self.text.map(Part::Text)
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}
