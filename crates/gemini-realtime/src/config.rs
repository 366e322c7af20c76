//! Per-session configuration and the setup message derived from it.

use crate::error::{SessionError, SessionResult};
use crate::types::{
    Content, GenerationConfig, Part, PrebuiltVoiceConfig, ResponseModality, Setup, SpeechConfig,
    ToolDeclaration, TranscriptionConfig, VoiceConfig,
};
use std::time::Duration;
use url::Url;

/// Public Gemini Live websocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Everything needed to open one session. Cheap to clone; a fresh copy is
/// consumed by every `connect` call.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice: Option<String>,
    pub language: Option<String>,
    pub system_instruction: Option<String>,
    pub endpoint: String,
    /// Upper bound for opening the transport and for receiving `setupComplete`.
    pub setup_timeout: Duration,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            response_modality: ResponseModality::Audio,
            voice: None,
            language: None,
            system_instruction: None,
            endpoint: GEMINI_LIVE_URL.to_string(),
            setup_timeout: Duration::from_secs(10),
            input_transcription: false,
            output_transcription: false,
        }
    }
}

impl SessionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(text.into());
        self
    }

    pub fn with_response_modality(mut self, modality: ResponseModality) -> Self {
        self.response_modality = modality;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn with_transcriptions(mut self, input: bool, output: bool) -> Self {
        self.input_transcription = input;
        self.output_transcription = output;
        self
    }

    /// The websocket URL with the API key attached as the `key` query parameter.
    pub fn endpoint_url(&self, api_key: &str) -> SessionResult<String> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            SessionError::Connection(format!("invalid endpoint '{}': {e}", self.endpoint))
        })?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url.into())
    }

    /// Builds the setup message. `tools` is captured once per session.
    pub fn setup_message(&self, tools: Vec<ToolDeclaration>) -> Setup {
        let speech_config = if self.voice.is_some() || self.language.is_some() {
            Some(SpeechConfig {
                language_code: self.language.clone(),
                voice_config: self.voice.as_ref().map(|voice| VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.clone(),
                    },
                }),
            })
        } else {
            None
        };

        Setup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![self.response_modality],
                speech_config,
            },
            system_instruction: self.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::Text(text.clone())],
            }),
            tools,
            input_audio_transcription: self
                .input_transcription
                .then(TranscriptionConfig::default),
            output_audio_transcription: self
                .output_transcription
                .then(TranscriptionConfig::default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientMessage, FunctionDeclaration};
    use serde_json::json;

    #[test]
    fn test_setup_carries_voice_and_instruction() {
        let config = SessionConfig::new("m")
            .with_voice("Kore")
            .with_language("en-US")
            .with_system_instruction("S");

        let setup = serde_json::to_value(config.setup_message(vec![])).unwrap();

        assert_eq!(setup["model"], "m");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["languageCode"],
            "en-US"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "S");
        assert_eq!(
            setup["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert!(setup.get("tools").is_none());
    }

    #[test]
    fn test_setup_minimal() {
        let setup = serde_json::to_value(
            SessionConfig::new("m")
                .with_response_modality(ResponseModality::Text)
                .setup_message(vec![]),
        )
        .unwrap();
        assert_eq!(
            setup,
            json!({ "model": "m", "generationConfig": { "responseModalities": ["TEXT"] } })
        );
    }

    #[test]
    fn test_setup_wraps_in_setup_key_with_tools() {
        let decl = ToolDeclaration::FunctionDeclarations(vec![FunctionDeclaration {
            name: "calculate".into(),
            description: "d".into(),
            parameters: json!({}),
        }]);
        let config = SessionConfig::default().with_transcriptions(true, false);
        let msg = ClientMessage::Setup(config.setup_message(vec![decl]));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "calculate"
        );
        assert_eq!(value["setup"]["inputAudioTranscription"], json!({}));
        assert!(value["setup"].get("outputAudioTranscription").is_none());
    }

    #[test]
    fn test_endpoint_url() {
        let config = SessionConfig::default().with_endpoint("ws://127.0.0.1:9000/live");
        assert_eq!(config.endpoint_url("abc").unwrap(), "ws://127.0.0.1:9000/live?key=abc");
        let config = SessionConfig::default().with_endpoint("ws://h/p?alt=1");
        assert_eq!(config.endpoint_url("abc").unwrap(), "ws://h/p?alt=1&key=abc");
    }

    #[test]
    fn test_endpoint_url_encodes_key() {
        let config = SessionConfig::default().with_endpoint("ws://h/p?alt=1");
        let url = config.endpoint_url("a&b=c+d e#f").unwrap();
        assert_eq!(url, "ws://h/p?alt=1&key=a%26b%3Dc%2Bd+e%23f");

        let pairs: Vec<(String, String)> = Url::parse(&url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("alt".to_string(), "1".to_string()),
                ("key".to_string(), "a&b=c+d e#f".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_endpoint_is_connection_error() {
        let config = SessionConfig::default().with_endpoint("not a url");
        assert!(matches!(
            config.endpoint_url("abc"),
            Err(SessionError::Connection(_))
        ));
    }
}
