//! The session state machine and the task that owns the websocket.
//!
//! A [`LiveClient`] is the host-facing handle. Every `connect` builds a fresh
//! [`Session`]; a session walks `Idle -> Connecting -> Open -> Closing -> Closed`
//! (or ends in `Failed`) exactly once and is never reconnected.
//!
//! One spawned task owns both halves of the socket. All writes go through an
//! unbounded channel into that task, so realtime input, text turns and tool
//! responses reach the wire in submission order without interleaving.

use crate::audio::AudioSink;
use crate::config::SessionConfig;
use crate::dispatch::{NoTools, ToolDispatch};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, EventKind, SessionEvent, SubscriptionId, TranscriptionSource};
use crate::input::{InputMultiplexer, MediaChunk};
use crate::turn::{Inbound, ToolPhase, TurnCoordinator};
use crate::types::{
    ClientContent, ClientMessage, ServerMessage, ToolCall, ToolResponse, ToolResponseMessage,
};
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode};
use tracing::{debug, error, info, instrument, warn};

const NORMAL_CLOSE: u16 = 1000;
const ABNORMAL_CLOSE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Open)
                | (Connecting, Failed)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Failed)
                | (Closing, Closed)
                | (Failed, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One connection attempt and everything that lives exactly as long as it.
pub struct Session {
    state: Mutex<SessionState>,
    tool_phase: Arc<ToolPhase>,
    input: InputMultiplexer,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    shutdown: watch::Sender<bool>,
    tool_tasks: Mutex<JoinSet<()>>,
}

impl Session {
    fn new(outbound: mpsc::UnboundedSender<ClientMessage>) -> Self {
        let tool_phase = Arc::new(ToolPhase::new());
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(SessionState::Idle),
            input: InputMultiplexer::new(tool_phase.clone()),
            tool_phase,
            outbound,
            shutdown,
            tool_tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_using_tool(&self) -> bool {
        self.tool_phase.is_active()
    }

    /// Applies `next` if it is a legal edge from the current state.
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "Session state change.");
            *state = next;
            true
        } else {
            false
        }
    }

    fn enqueue(&self, message: ClientMessage) -> SessionResult<()> {
        let state = self.state();
        if state != SessionState::Open {
            return Err(SessionError::NotOpen(state));
        }
        self.outbound
            .send(message)
            .map_err(|_| SessionError::Connection("transport task has stopped".to_string()))
    }

    /// Stops the transport task and abandons in-flight tool calls.
    fn release(&self) {
        self.shutdown.send_replace(true);
        self.tool_tasks.lock().abort_all();
        self.tool_phase.clear();
    }

    /// Moves a live session to `Failed` and reports `err` once.
    fn fail(&self, bus: &EventBus, err: SessionError) -> bool {
        if !self.transition(SessionState::Failed) {
            debug!(error = %err, "Ignoring failure for a session that is no longer live.");
            return false;
        }
        error!(error = %err, "Session failed.");
        self.release();
        bus.emit(SessionEvent::Error(err));
        true
    }

    /// Closes the session from any state. Returns the state it was in.
    fn close(&self, bus: &EventBus, code: u16, reason: &str) -> SessionState {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == SessionState::Closed {
                return previous;
            }
            *state = SessionState::Closed;
            previous
        };
        debug!(from = %previous, "Session closed.");
        self.release();
        if matches!(
            previous,
            SessionState::Connecting | SessionState::Open | SessionState::Closing
        ) {
            bus.emit(SessionEvent::Close {
                code,
                reason: reason.to_string(),
            });
        }
        previous
    }

    /// Remote-initiated close of an established session.
    fn remote_close(&self, bus: &EventBus, code: u16, reason: String) {
        if self.transition(SessionState::Closing) {
            info!(code, %reason, "Session closed by remote.");
            self.close(bus, code, &reason);
        } else if self.state() == SessionState::Connecting {
            let err = SessionError::Connection(format!(
                "transport closed before setup completed (code {code}): {reason}"
            ));
            self.fail(bus, err);
            bus.emit(SessionEvent::Close { code, reason });
        }
    }
}

/// Host-facing handle for a Gemini Live conversation.
///
/// Subscriptions and the tool dispatcher outlive individual sessions, so a
/// host can reconnect by calling `connect` again after a failure.
pub struct LiveClient {
    bus: Arc<EventBus>,
    tools: Arc<dyn ToolDispatch>,
    playback: Arc<RwLock<Option<Arc<dyn AudioSink>>>>,
    session: Mutex<Option<Arc<Session>>>,
}

impl LiveClient {
    pub fn new(tools: Arc<dyn ToolDispatch>) -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            tools,
            playback: Arc::new(RwLock::new(None)),
            session: Mutex::new(None),
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, handler)
    }

    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.bus.on_any(handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.off(id)
    }

    /// Routes model audio to `sink` and flushes it on interruption.
    pub fn attach_playback(&self, sink: Arc<dyn AudioSink>) {
        *self.playback.write() = Some(sink);
    }

    pub fn state(&self) -> SessionState {
        self.current()
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    pub fn is_using_tool(&self) -> bool {
        self.current().is_some_and(|s| s.is_using_tool())
    }

    /// Opens a new session and waits for the setup acknowledgement.
    ///
    /// Fails with [`SessionError::Connection`] on an unparsable endpoint, transport failure, setup
    /// timeout, a malformed acknowledgement, or a `disconnect` that lands
    /// first. The session is left `Failed` (or `Closed` after a disconnect).
    pub async fn connect(&self, config: SessionConfig, api_key: &str) -> SessionResult<()> {
        let url = config.endpoint_url(api_key)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(outbound_tx));
        {
            let mut current = self.session.lock();
            if let Some(existing) = current.as_ref() {
                match existing.state() {
                    SessionState::Connecting | SessionState::Open | SessionState::Closing => {
                        return Err(SessionError::Connection(format!(
                            "a session is already {}",
                            existing.state()
                        )));
                    }
                    _ => {
                        existing.close(&self.bus, NORMAL_CLOSE, "replaced");
                    }
                }
            }
            session.transition(SessionState::Connecting);
            *current = Some(session.clone());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let setup_timeout = config.setup_timeout;
        let connection = Connection {
            session: session.clone(),
            bus: self.bus.clone(),
            tools: self.tools.clone(),
            playback: self.playback.clone(),
            coordinator: TurnCoordinator::new(session.tool_phase.clone()),
            ready: Some(ready_tx),
        };
        tokio::spawn(connection.run(config, url, outbound_rx));

        match tokio::time::timeout(setup_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Connection(
                "session ended before setup completed".to_string(),
            )),
            Err(_) => {
                let err = SessionError::Connection(format!(
                    "setup not acknowledged within {setup_timeout:?}"
                ));
                session.fail(&self.bus, err.clone());
                Err(err)
            }
        }
    }

    /// Closes the current session. Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        if let Some(session) = self.current() {
            let previous = session.close(&self.bus, NORMAL_CLOSE, "client disconnect");
            if previous != SessionState::Closed {
                info!(from = %previous, "Disconnected.");
            }
        }
    }

    /// Writes a structured message. Failures are reported as `error` events.
    pub fn send(&self, message: ClientMessage) {
        let result = match self.current() {
            Some(session) => session.enqueue(message),
            None => Err(SessionError::NotOpen(SessionState::Idle)),
        };
        if let Err(err) = result {
            warn!(error = %err, "Dropping outbound message.");
            self.bus.emit(SessionEvent::Error(err));
        }
    }

    /// Sends a complete user text turn.
    pub fn send_text(&self, text: impl Into<String>) {
        self.send(ClientMessage::ClientContent(ClientContent::user_text(text)));
    }

    /// Sends one batch of realtime media as a single message.
    pub fn send_realtime_input(&self, fragments: &[MediaChunk]) {
        let Some(session) = self.current() else {
            self.bus
                .emit(SessionEvent::Error(SessionError::NotOpen(SessionState::Idle)));
            return;
        };
        if let Some(input) = session.input.build(fragments) {
            self.send(ClientMessage::RealtimeInput(input));
        }
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }
}

impl Default for LiveClient {
    fn default() -> Self {
        Self::new(Arc::new(NoTools))
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// State owned by the transport task.
struct Connection {
    session: Arc<Session>,
    bus: Arc<EventBus>,
    tools: Arc<dyn ToolDispatch>,
    playback: Arc<RwLock<Option<Arc<dyn AudioSink>>>>,
    coordinator: TurnCoordinator,
    ready: Option<oneshot::Sender<SessionResult<()>>>,
}

impl Connection {
    #[instrument(skip_all, fields(model = %config.model))]
    async fn run(
        mut self,
        config: SessionConfig,
        url: String,
        mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) {
        let mut shutdown = self.session.shutdown.subscribe();

        let opened = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return,
            opened = connect_async(url) => opened,
        };
        let ws_stream = match opened {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                self.fail_connect(SessionError::Connection(e.to_string()));
                return;
            }
        };
        info!("Connected to Gemini Live websocket.");
        self.bus.emit(SessionEvent::Open);
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let setup = ClientMessage::Setup(config.setup_message(self.tools.declarations()));
        if let Err(err) = self.write(&mut ws_tx, &setup).await {
            self.fail_connect(err);
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    let close = Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    }));
                    if let Err(e) = ws_tx.send(close).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    break;
                }
                Some(message) = outbound.recv() => {
                    if let Err(err) = self.write(&mut ws_tx, &message).await {
                        self.session.fail(&self.bus, err);
                        break;
                    }
                    if let ClientMessage::ToolResponse(responses) = &message {
                        for response in &responses.function_responses {
                            self.coordinator.response_sent(&response.id);
                        }
                    }
                }
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(text.as_bytes()),
                        Some(Ok(Message::Binary(data))) => self.handle_frame(&data),
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((ABNORMAL_CLOSE, String::new()));
                            self.session.remote_close(&self.bus, code, reason);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let err = SessionError::Connection(e.to_string());
                            if self.session.state() == SessionState::Connecting {
                                self.fail_connect(err);
                            } else {
                                self.session.fail(&self.bus, err);
                            }
                            break;
                        }
                        None => {
                            self.session
                                .remote_close(&self.bus, ABNORMAL_CLOSE, "stream ended".to_string());
                            break;
                        }
                    }
                }
            }
            if self.ready.is_none() && !matches!(self.session.state(), SessionState::Open) {
                break;
            }
        }
        debug!("Connection task finished.");
    }

    async fn write<S>(&self, ws_tx: &mut S, message: &ClientMessage) -> SessionResult<()>
    where
        S: futures_util::Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        let payload = serde_json::to_string(message)?;
        ws_tx
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        match message {
            ClientMessage::RealtimeInput(input) => {
                debug!(chunks = input.media_chunks.len(), interrupt = ?input.interrupt, "Sent realtime input.");
            }
            other => {
                debug!(kind = other.kind(), "Sent client message.");
                self.bus.emit(SessionEvent::log(
                    format!("client.{}", other.kind()),
                    describe(other),
                ));
            }
        }
        Ok(())
    }

    fn fail_connect(&mut self, err: SessionError) {
        self.session.fail(&self.bus, err.clone());
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(err));
        }
    }

    fn handle_frame(&mut self, raw: &[u8]) {
        let value: serde_json::Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => return self.protocol_error(format!("inbound frame is not JSON: {e}")),
        };
        self.bus.emit(SessionEvent::Message(value.clone()));

        let message: ServerMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => return self.protocol_error(format!("unrecognised server message: {e}")),
        };

        for inbound in self.coordinator.handle(message) {
            self.apply(inbound);
        }
    }

    fn protocol_error(&mut self, message: String) {
        if self.ready.is_some() {
            self.fail_connect(SessionError::Connection(format!(
                "malformed setup acknowledgement: {message}"
            )));
        } else {
            warn!(%message, "Dropping inbound frame.");
            self.bus
                .emit(SessionEvent::Error(SessionError::Protocol(message)));
        }
    }

    fn apply(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::SetupComplete => {
                if self.session.transition(SessionState::Open) {
                    info!("Gemini session setup is complete.");
                }
                self.bus.emit(SessionEvent::SetupComplete);
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(()));
                }
            }
            Inbound::Content(turn) => self.bus.emit(SessionEvent::Content(turn)),
            Inbound::Audio(pcm) => {
                if let Some(sink) = self.playback.read().as_ref() {
                    sink.push(&pcm);
                }
                self.bus.emit(SessionEvent::Audio(pcm));
            }
            Inbound::ToolCall(call) => {
                self.bus.emit(SessionEvent::ToolCall(call.clone()));
                self.spawn_dispatch(call);
            }
            Inbound::Interrupted => {
                if let Some(sink) = self.playback.read().as_ref() {
                    let dropped = sink.flush();
                    debug!(dropped, "Playback flushed.");
                }
                self.bus.emit(SessionEvent::Interrupted);
            }
            Inbound::TurnComplete(turn) => self.bus.emit(SessionEvent::TurnComplete(turn)),
            Inbound::InputTranscription(text) => self.bus.emit(SessionEvent::Transcription {
                source: TranscriptionSource::Input,
                text,
            }),
            Inbound::OutputTranscription(text) => self.bus.emit(SessionEvent::Transcription {
                source: TranscriptionSource::Output,
                text,
            }),
            Inbound::ServerError(message) => {
                if self.ready.is_some() {
                    self.fail_connect(SessionError::Connection(format!(
                        "server rejected setup: {message}"
                    )));
                }
                self.bus.emit(SessionEvent::ServerError(message));
            }
            Inbound::Log { kind, message } => self.bus.emit(SessionEvent::log(kind, message)),
        }
    }

    /// Runs the call off the receive loop. Exactly one response is queued for
    /// it unless the session is torn down first.
    fn spawn_dispatch(&self, call: ToolCall) {
        let tools = self.tools.clone();
        let outbound = self.session.outbound.clone();
        let mut tasks = self.session.tool_tasks.lock();
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            info!(tool = %call.name, id = %call.id, "Dispatching tool call.");
            let mut response = AssertUnwindSafe(tools.dispatch(call.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(tool = %call.name, "Tool dispatch panicked.");
                    ToolResponse::error(&call, "tool execution panicked")
                });
            response.id = call.id.clone();
            let message = ClientMessage::ToolResponse(ToolResponseMessage {
                function_responses: vec![response],
            });
            if outbound.send(message).is_err() {
                debug!(id = %call.id, "Session gone; discarding tool response.");
            }
        });
    }
}

fn describe(message: &ClientMessage) -> String {
    match message {
        ClientMessage::Setup(setup) => setup.model.clone(),
        ClientMessage::ClientContent(content) => content
            .turns
            .iter()
            .flat_map(|t| &t.parts)
            .filter_map(|p| match p {
                crate::types::Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
        ClientMessage::ToolResponse(responses) => responses
            .function_responses
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(","),
        ClientMessage::RealtimeInput(input) => format!("{} chunk(s)", input.media_chunks.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Failed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Connecting));
        assert!(!Failed.can_transition_to(Connecting));
        assert!(!Open.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Failed));
    }

    #[test]
    fn test_disconnect_without_session_is_noop() {
        let client = LiveClient::default();
        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), SessionState::Idle);
    }

    #[test]
    fn test_send_before_connect_emits_error() {
        let client = LiveClient::default();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        client.on(EventKind::Error, move |event| {
            if let SessionEvent::Error(err) = event {
                e.lock().push(err.clone());
            }
        });

        client.send_text("hello");
        client.send_realtime_input(&[MediaChunk::audio_pcm16(vec![0u8; 2])]);

        assert_eq!(
            *errors.lock(),
            vec![
                SessionError::NotOpen(SessionState::Idle),
                SessionError::NotOpen(SessionState::Idle)
            ]
        );
    }

    #[test]
    fn test_close_from_each_state_ends_closed() {
        let bus = EventBus::new();
        for start in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Closing,
            SessionState::Failed,
        ] {
            let (tx, _rx) = mpsc::unbounded_channel();
            let session = Session::new(tx);
            *session.state.lock() = start;
            session.tool_phase.begin("x");

            assert_eq!(session.close(&bus, NORMAL_CLOSE, "test"), start);
            assert_eq!(session.state(), SessionState::Closed);
            assert!(!session.is_using_tool());
            assert_eq!(session.close(&bus, NORMAL_CLOSE, "test"), SessionState::Closed);
        }
    }

    #[test]
    fn test_enqueue_requires_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(tx);
        let msg = ClientMessage::ClientContent(ClientContent::user_text("hi"));

        assert_eq!(
            session.enqueue(msg.clone()),
            Err(SessionError::NotOpen(SessionState::Idle))
        );
        *session.state.lock() = SessionState::Open;
        assert!(session.enqueue(msg.clone()).is_ok());
        assert_eq!(rx.try_recv().ok(), Some(msg));
    }
}
