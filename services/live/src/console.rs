//! Renders session events as console lines.

use gemini_realtime::{LiveClient, SessionEvent, SubscriptionId, TranscriptionSource};

/// One line for the operator, or `None` for events that are not shown.
pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Open => Some("[connected]".to_string()),
        SessionEvent::SetupComplete => Some("[ready] type a message and press enter".to_string()),
        SessionEvent::Close { code, reason } if reason.is_empty() => {
            Some(format!("[closed {code}]"))
        }
        SessionEvent::Close { code, reason } => Some(format!("[closed {code}: {reason}]")),
        SessionEvent::Content(turn) => {
            let text = turn.text();
            (!text.is_empty()).then(|| format!("model: {text}"))
        }
        SessionEvent::Transcription { source, text } => {
            let who = match source {
                TranscriptionSource::Input => "you (heard)",
                TranscriptionSource::Output => "model (said)",
            };
            Some(format!("{who}: {text}"))
        }
        SessionEvent::ToolCall(call) => Some(format!("[tool] {}({})", call.name, call.args)),
        SessionEvent::Interrupted => Some("[interrupted]".to_string()),
        SessionEvent::TurnComplete(_) => Some("[turn complete]".to_string()),
        SessionEvent::Error(err) => Some(format!("[error] {err}")),
        SessionEvent::ServerError(message) => Some(format!("[server error] {message}")),
        SessionEvent::Log { kind, message } if kind.starts_with("server.") => {
            Some(format!("[{kind}] {message}"))
        }
        SessionEvent::Log { .. }
        | SessionEvent::Audio(_)
        | SessionEvent::Message(_) => None,
    }
}

/// Prints every renderable event to stdout.
pub fn attach(client: &LiveClient) -> SubscriptionId {
    client.on_any(|event| {
        if let Some(line) = render(event) {
            println!("{line}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemini_realtime::{ModelTurn, Part, SessionError, SessionState, ToolCall};
    use serde_json::json;

    #[test]
    fn test_renders_model_text_and_skips_audio_only_content() {
        let turn = ModelTurn {
            parts: vec![Part::Text("Hello".into()), Part::Text(" there".into())],
        };
        assert_eq!(
            render(&SessionEvent::Content(turn)).as_deref(),
            Some("model: Hello there")
        );
        assert_eq!(render(&SessionEvent::Content(ModelTurn::default())), None);
        assert_eq!(render(&SessionEvent::Audio(vec![0u8; 4].into())), None);
    }

    #[test]
    fn test_renders_lifecycle_and_tools() {
        assert_eq!(
            render(&SessionEvent::Close {
                code: 1000,
                reason: String::new()
            })
            .as_deref(),
            Some("[closed 1000]")
        );
        let call = ToolCall {
            id: "1".into(),
            name: "calculate".into(),
            args: json!({ "expression": "2+2" }),
        };
        assert_eq!(
            render(&SessionEvent::ToolCall(call)).as_deref(),
            Some(r#"[tool] calculate({"expression":"2+2"})"#)
        );
        assert_eq!(
            render(&SessionEvent::Error(SessionError::NotOpen(SessionState::Closed))).as_deref(),
            Some("[error] Session is not open (state: closed)")
        );
    }

    #[test]
    fn test_only_server_logs_are_shown() {
        let client_log = SessionEvent::Log {
            kind: "client.clientContent".into(),
            message: "hi".into(),
        };
        let server_log = SessionEvent::Log {
            kind: "server.goAway".into(),
            message: "timeLeft=10s".into(),
        };
        assert_eq!(render(&client_log), None);
        assert_eq!(
            render(&server_log).as_deref(),
            Some("[server.goAway] timeLeft=10s")
        );
    }
}
