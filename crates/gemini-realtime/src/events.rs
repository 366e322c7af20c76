//! Typed publish/subscribe surface between the engine and its host.
//!
//! Delivery is synchronous and fire-and-forget: [`EventBus::emit`] calls every
//! matching handler in subscription order on the emitting task. A handler
//! that panics is logged and skipped; the remaining handlers still run.

use crate::error::SessionError;
use crate::turn::ModelTurn;
use crate::types::ToolCall;
use bytes::Bytes;
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Which side produced a transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionSource {
    Input,
    Output,
}

/// Everything the engine reports to its host.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The transport is open; setup has been sent but not yet acknowledged.
    Open,
    Close { code: u16, reason: String },
    Log { kind: String, message: String },
    /// Raw little-endian PCM16 from the model.
    Audio(Bytes),
    /// Non-audio parts received in one message of the current model turn.
    Content(ModelTurn),
    ToolCall(ToolCall),
    Interrupted,
    SetupComplete,
    /// The finalized model turn.
    TurnComplete(ModelTurn),
    Transcription {
        source: TranscriptionSource,
        text: String,
    },
    Error(SessionError),
    /// An `error` payload sent by the remote service.
    ServerError(String),
    /// Every inbound message, as parsed JSON.
    Message(serde_json::Value),
}

/// Discriminant of [`SessionEvent`], used to subscribe to one event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Log,
    Audio,
    Content,
    ToolCall,
    Interrupted,
    SetupComplete,
    TurnComplete,
    Transcription,
    Error,
    ServerError,
    Message,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Open => EventKind::Open,
            SessionEvent::Close { .. } => EventKind::Close,
            SessionEvent::Log { .. } => EventKind::Log,
            SessionEvent::Audio(_) => EventKind::Audio,
            SessionEvent::Content(_) => EventKind::Content,
            SessionEvent::ToolCall(_) => EventKind::ToolCall,
            SessionEvent::Interrupted => EventKind::Interrupted,
            SessionEvent::SetupComplete => EventKind::SetupComplete,
            SessionEvent::TurnComplete(_) => EventKind::TurnComplete,
            SessionEvent::Transcription { .. } => EventKind::Transcription,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::ServerError(_) => EventKind::ServerError,
            SessionEvent::Message(_) => EventKind::Message,
        }
    }

    pub(crate) fn log(kind: impl Into<String>, message: impl Into<String>) -> Self {
        SessionEvent::Log {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(handler))
    }

    /// Subscribes `handler` to every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        // Snapshot so handlers may subscribe or unsubscribe while being called.
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(event = ?kind, "Event handler panicked; continuing delivery.");
            }
        }
    }

    fn subscribe(&self, kind: Option<EventKind>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .push(Subscription { id, kind, handler });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_handlers_receive_only_their_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.on(EventKind::Interrupted, move |e| s.lock().push(e.kind()));
        let s = seen.clone();
        bus.on_any(move |e| s.lock().push(e.kind()));

        bus.emit(SessionEvent::Interrupted);
        bus.emit(SessionEvent::SetupComplete);

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::Interrupted,
                EventKind::Interrupted,
                EventKind::SetupComplete
            ]
        );
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let delivered = Arc::new(Mutex::new(0));

        bus.on(EventKind::Open, |_| panic!("handler failure"));
        let d = delivered.clone();
        bus.on(EventKind::Open, move |_| *d.lock() += 1);

        bus.emit(SessionEvent::Open);
        bus.emit(SessionEvent::Open);

        assert_eq!(*delivered.lock(), 2);
    }

    #[test]
    fn test_off_removes_subscription() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = bus.on_any(move |_| *c.lock() += 1);

        bus.emit(SessionEvent::Open);
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(SessionEvent::Open);

        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let b = bus.clone();
        bus.on(EventKind::Open, move |_| {
            b.on(EventKind::Open, |_| {});
        });
        bus.emit(SessionEvent::Open);
        assert_eq!(bus.subscriptions.read().len(), 2);
    }
}
