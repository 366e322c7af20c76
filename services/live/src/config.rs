use gemini_realtime::{ResponseModality, SessionConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Host configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub gemini_api_key: String,
    pub model: String,
    pub voice: Option<String>,
    pub language: Option<String>,
    pub response_modality: ResponseModality,
    pub system_instruction: Option<String>,
    pub ws_url: Option<String>,
    pub setup_timeout: Duration,
    pub tools_config_path: Option<PathBuf>,
    pub log_level: Level,
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = optional_var("GEMINI_API_KEY")
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = optional_var("GEMINI_MODEL")
            .unwrap_or_else(|| gemini_realtime::config::DEFAULT_MODEL.to_string());

        let response_modality = match optional_var("RESPONSE_MODALITY") {
            Some(raw) => raw
                .parse::<ResponseModality>()
                .map_err(|e| ConfigError::InvalidValue("RESPONSE_MODALITY".to_string(), e))?,
            None => ResponseModality::Audio,
        };

        let setup_timeout = match optional_var("SETUP_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "SETUP_TIMEOUT_SECS".to_string(),
                        format!("'{raw}' is not a positive number of seconds"),
                    )
                })?,
            None => Duration::from_secs(10),
        };

        let log_level_str = optional_var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{log_level_str}' is not a valid log level"),
            )
        })?;

        Ok(Self {
            gemini_api_key,
            model,
            voice: optional_var("GEMINI_VOICE"),
            language: optional_var("GEMINI_LANGUAGE"),
            response_modality,
            system_instruction: optional_var("SYSTEM_INSTRUCTION"),
            ws_url: optional_var("GEMINI_WS_URL"),
            setup_timeout,
            tools_config_path: optional_var("TOOLS_CONFIG_PATH").map(PathBuf::from),
            log_level,
        })
    }

    /// The engine configuration for one session. Transcriptions are requested
    /// whenever the model answers with audio.
    pub fn session_config(&self) -> SessionConfig {
        let audio = self.response_modality == ResponseModality::Audio;
        let mut session = SessionConfig::new(self.model.clone())
            .with_response_modality(self.response_modality)
            .with_setup_timeout(self.setup_timeout)
            .with_transcriptions(audio, audio);
        if let Some(voice) = &self.voice {
            session = session.with_voice(voice.clone());
        }
        if let Some(language) = &self.language {
            session = session.with_language(language.clone());
        }
        if let Some(text) = &self.system_instruction {
            session = session.with_system_instruction(text.clone());
        }
        if let Some(url) = &self.ws_url {
            session = session.with_endpoint(url.clone());
        }
        session
    }
}
