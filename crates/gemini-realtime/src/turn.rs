//! Turn-taking and interruption bookkeeping for the receive path.
//!
//! [`TurnCoordinator`] turns each parsed [`ServerMessage`] into an ordered list
//! of [`Inbound`] actions for the session to carry out. It owns the model turn
//! being assembled and shares a [`ToolPhase`] with the input multiplexer.

use crate::types::{Part, ServerMessage, ServerPart, ToolCall};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Tracks tool calls that are awaiting a response, an interruption or the end
/// of the turn.
///
/// The phase is active exactly while the outstanding set is non-empty. All
/// transitions happen under one lock, so the send path never observes a
/// half-applied update.
#[derive(Debug, Default)]
pub struct ToolPhase {
    outstanding: Mutex<HashSet<String>>,
}

impl ToolPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.outstanding.lock().is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Records a dispatched call. Returns `true` if this started the phase.
    pub(crate) fn begin(&self, id: &str) -> bool {
        let mut outstanding = self.outstanding.lock();
        let was_idle = outstanding.is_empty();
        outstanding.insert(id.to_string());
        was_idle
    }

    /// Records the answer for `id`. Returns `true` if this ended the phase.
    pub(crate) fn complete(&self, id: &str) -> bool {
        let mut outstanding = self.outstanding.lock();
        outstanding.remove(id) && outstanding.is_empty()
    }

    /// Ends the phase regardless of outstanding calls. Returns `true` if it was active.
    pub(crate) fn clear(&self) -> bool {
        let mut outstanding = self.outstanding.lock();
        let was_active = !outstanding.is_empty();
        outstanding.clear();
        was_active
    }
}

/// Whose turn it currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Speaker {
    #[default]
    User,
    Model,
}

/// The model's output for one turn, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

impl ModelTurn {
    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Classification of one inbound message, in the order it must be acted on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SetupComplete,
    /// Non-audio parts of this message.
    Content(ModelTurn),
    Audio(Bytes),
    ToolCall(ToolCall),
    Interrupted,
    TurnComplete(ModelTurn),
    InputTranscription(String),
    OutputTranscription(String),
    ServerError(String),
    Log { kind: String, message: String },
}

#[derive(Debug)]
pub struct TurnCoordinator {
    tool_phase: std::sync::Arc<ToolPhase>,
    turn: ModelTurn,
    speaker: Speaker,
    anonymous_calls: u64,
}

impl TurnCoordinator {
    pub fn new(tool_phase: std::sync::Arc<ToolPhase>) -> Self {
        Self {
            tool_phase,
            turn: ModelTurn::default(),
            speaker: Speaker::User,
            anonymous_calls: 0,
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    /// The turn assembled so far.
    pub fn current_turn(&self) -> &ModelTurn {
        &self.turn
    }

    pub fn handle(&mut self, msg: ServerMessage) -> Vec<Inbound> {
        let mut out = Vec::new();

        if msg.setup_complete.is_some() {
            out.push(Inbound::SetupComplete);
        }

        if let Some(error) = msg.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            warn!(%message, "Server reported an error.");
            out.push(Inbound::ServerError(message));
        }

        if let Some(content) = msg.server_content {
            if let Some(t) = content.input_transcription {
                out.push(Inbound::InputTranscription(t.text));
            }
            if let Some(t) = content.output_transcription {
                out.push(Inbound::OutputTranscription(t.text));
            }
            if let Some(model_turn) = content.model_turn {
                self.on_model_parts(model_turn.parts, &mut out);
            }
            if content.interrupted == Some(true) {
                self.on_interrupted(&mut out);
            }
            if content.turn_complete == Some(true) {
                self.on_turn_complete(&mut out);
            }
        }

        if let Some(tool_call) = msg.tool_call {
            for call in tool_call.function_calls {
                let call = self.correlate(call.id, call.name, call.args);
                out.push(Inbound::ToolCall(call));
            }
        }

        if let Some(cancellation) = msg.tool_call_cancellation {
            for id in &cancellation.ids {
                self.tool_phase.complete(id);
            }
            out.push(Inbound::Log {
                kind: "server.toolCallCancellation".to_string(),
                message: cancellation.ids.join(","),
            });
        }

        if let Some(go_away) = msg.go_away {
            out.push(Inbound::Log {
                kind: "server.goAway".to_string(),
                message: go_away.time_left.unwrap_or_default(),
            });
        }

        if let Some(usage) = msg.usage_metadata {
            out.push(Inbound::Log {
                kind: "server.usageMetadata".to_string(),
                message: usage.to_string(),
            });
        }

        out
    }

    /// Called when a response for `id` is written to the transport.
    pub fn response_sent(&self, id: &str) {
        if self.tool_phase.complete(id) {
            info!("Tool usage completed.");
        }
    }

    fn on_model_parts(&mut self, parts: Vec<ServerPart>, out: &mut Vec<Inbound>) {
        self.speaker = Speaker::Model;
        let mut visible = Vec::new();
        let mut calls = Vec::new();

        for part in parts.into_iter().filter_map(ServerPart::into_part) {
            match part {
                Part::InlineData(blob) if blob.is_audio() => match blob.decode() {
                    Ok(pcm) => out.push(Inbound::Audio(pcm)),
                    Err(e) => out.push(Inbound::Log {
                        kind: "server.audio".to_string(),
                        message: format!("dropped undecodable audio part: {e}"),
                    }),
                },
                Part::FunctionCall(call) => {
                    let correlated = self.correlate(call.id.clone(), call.name.clone(), call.args.clone());
                    calls.push(correlated.clone());
                    visible.push(Part::FunctionCall(crate::types::FunctionCall {
                        id: Some(correlated.id),
                        ..call
                    }));
                }
                Part::FunctionResponse(response) => {
                    let ended = match &response.id {
                        Some(id) => self.tool_phase.complete(id),
                        None => self.tool_phase.clear(),
                    };
                    if ended {
                        info!("Tool usage completed.");
                    }
                    visible.push(Part::FunctionResponse(response));
                }
                other => visible.push(other),
            }
        }

        if !visible.is_empty() {
            self.turn.parts.extend(visible.iter().cloned());
            out.push(Inbound::Content(ModelTurn { parts: visible }));
        }
        out.extend(calls.into_iter().map(Inbound::ToolCall));
    }

    fn on_interrupted(&mut self, out: &mut Vec<Inbound>) {
        if self.tool_phase.clear() {
            info!("Interruption ended the tool phase.");
        }
        debug!(parts = self.turn.parts.len(), "Model turn discarded by interruption.");
        self.turn = ModelTurn::default();
        self.speaker = Speaker::User;
        out.push(Inbound::Interrupted);
    }

    fn on_turn_complete(&mut self, out: &mut Vec<Inbound>) {
        self.tool_phase.clear();
        self.speaker = Speaker::User;
        out.push(Inbound::TurnComplete(std::mem::take(&mut self.turn)));
    }

    /// Gives the call a stable id and opens (or extends) the tool phase.
    fn correlate(&mut self, id: Option<String>, name: String, args: serde_json::Value) -> ToolCall {
        let id = id.unwrap_or_else(|| {
            self.anonymous_calls += 1;
            format!("{name}-{}", self.anonymous_calls)
        });
        if self.tool_phase.begin(&id) {
            info!(tool = %name, "Model is using a tool.");
        }
        ToolCall { id, name, args }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn parse(raw: serde_json::Value) -> ServerMessage {
        serde_json::from_value(raw).unwrap()
    }

    fn coordinator() -> (TurnCoordinator, Arc<ToolPhase>) {
        let phase = Arc::new(ToolPhase::new());
        (TurnCoordinator::new(phase.clone()), phase)
    }

    #[test]
    fn test_tool_phase_transitions() {
        let phase = ToolPhase::new();
        assert!(!phase.is_active());
        assert!(phase.begin("a"));
        assert!(!phase.begin("b"));
        assert!(!phase.complete("a"));
        assert!(phase.is_active());
        assert!(!phase.complete("unknown"));
        assert!(phase.complete("b"));
        assert!(!phase.is_active());
        assert!(!phase.clear());
    }

    #[test]
    fn test_setup_complete_classification() {
        let (mut c, _) = coordinator();
        assert_eq!(
            c.handle(parse(json!({ "setupComplete": {} }))),
            vec![Inbound::SetupComplete]
        );
    }

    #[test]
    fn test_content_accumulates_and_audio_is_split_out() {
        let (mut c, _) = coordinator();
        let out = c.handle(parse(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "text": "Hel" },
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQI=" } }
            ] } }
        })));
        assert_eq!(
            out,
            vec![
                Inbound::Audio(Bytes::from_static(&[1, 2])),
                Inbound::Content(ModelTurn {
                    parts: vec![Part::Text("Hel".into())]
                }),
            ]
        );
        assert_eq!(c.speaker(), Speaker::Model);

        c.handle(parse(json!({
            "serverContent": { "modelTurn": { "parts": [ { "text": "lo" } ] } }
        })));
        let out = c.handle(parse(json!({ "serverContent": { "turnComplete": true } })));
        match &out[..] {
            [Inbound::TurnComplete(turn)] => assert_eq!(turn.text(), "Hello"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(c.current_turn().is_empty());
        assert_eq!(c.speaker(), Speaker::User);
    }

    #[test]
    fn test_function_call_part_starts_tool_phase() {
        let (mut c, phase) = coordinator();
        let out = c.handle(parse(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "functionCall": { "id": "42", "name": "calculate", "args": { "expression": "2+2" } } }
            ] } }
        })));
        assert!(phase.is_active());
        assert!(out.contains(&Inbound::ToolCall(ToolCall {
            id: "42".into(),
            name: "calculate".into(),
            args: json!({ "expression": "2+2" }),
        })));

        c.handle(parse(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "functionResponse": { "id": "42", "response": { "output": 4 } } }
            ] } }
        })));
        assert!(!phase.is_active());
    }

    #[test]
    fn test_top_level_tool_call_and_response_sent() {
        let (mut c, phase) = coordinator();
        let out = c.handle(parse(json!({
            "toolCall": { "functionCalls": [
                { "id": "1", "name": "a", "args": {} },
                { "id": "2", "name": "b" }
            ] }
        })));
        assert_eq!(out.len(), 2);
        assert_eq!(phase.outstanding(), 2);

        c.response_sent("2");
        assert!(phase.is_active());
        c.response_sent("1");
        assert!(!phase.is_active());
    }

    #[test]
    fn test_calls_without_id_get_distinct_ids() {
        let (mut c, phase) = coordinator();
        let out = c.handle(parse(json!({
            "toolCall": { "functionCalls": [ { "name": "a" }, { "name": "a" } ] }
        })));
        let ids: Vec<_> = out
            .iter()
            .filter_map(|i| match i {
                Inbound::ToolCall(call) => Some(call.id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a-1".to_string(), "a-2".to_string()]);
        assert_eq!(phase.outstanding(), 2);
    }

    #[test]
    fn test_interrupted_clears_tool_phase_and_discards_turn() {
        let (mut c, phase) = coordinator();
        c.handle(parse(json!({ "toolCall": { "functionCalls": [ { "id": "9", "name": "slow" } ] } })));
        c.handle(parse(json!({
            "serverContent": { "modelTurn": { "parts": [ { "text": "partial" } ] } }
        })));
        assert!(phase.is_active());

        let out = c.handle(parse(json!({ "serverContent": { "interrupted": true } })));
        assert_eq!(out, vec![Inbound::Interrupted]);
        assert!(!phase.is_active());
        assert!(c.current_turn().is_empty());
    }

    #[test]
    fn test_turn_complete_clears_tool_phase() {
        let (mut c, phase) = coordinator();
        c.handle(parse(json!({ "toolCall": { "functionCalls": [ { "id": "1", "name": "x" } ] } })));
        c.handle(parse(json!({ "serverContent": { "turnComplete": true } })));
        assert!(!phase.is_active());
    }

    #[test]
    fn test_cancellation_completes_listed_ids() {
        let (mut c, phase) = coordinator();
        c.handle(parse(json!({ "toolCall": { "functionCalls": [
            { "id": "1", "name": "x" }, { "id": "2", "name": "y" }
        ] } })));
        let out = c.handle(parse(json!({ "toolCallCancellation": { "ids": ["1"] } })));
        assert_eq!(phase.outstanding(), 1);
        assert!(matches!(&out[0], Inbound::Log { kind, message } if kind == "server.toolCallCancellation" && message == "1"));
    }

    #[test]
    fn test_server_error_and_transcriptions() {
        let (mut c, _) = coordinator();
        let out = c.handle(parse(json!({ "error": { "code": 400, "message": "bad request" } })));
        assert_eq!(out, vec![Inbound::ServerError("bad request".into())]);

        let out = c.handle(parse(json!({ "serverContent": {
            "inputTranscription": { "text": "hi there" },
            "outputTranscription": { "text": "hello" }
        } })));
        assert_eq!(
            out,
            vec![
                Inbound::InputTranscription("hi there".into()),
                Inbound::OutputTranscription("hello".into())
            ]
        );
    }
}
