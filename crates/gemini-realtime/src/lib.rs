//! Realtime multimodal session engine for the Gemini Live API.
//!
//! The engine owns one duplex websocket per session, multiplexes realtime
//! media and text into it, and demultiplexes model audio, text and tool calls
//! back out through a typed event bus.

pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod input;
pub mod session;
pub mod turn;
pub mod types;

pub use audio::{AudioSink, FrameChunker, PlaybackQueue};
pub use config::SessionConfig;
pub use dispatch::{NoTools, ToolDispatch};
pub use error::{SessionError, SessionResult};
pub use events::{EventBus, EventKind, SessionEvent, SubscriptionId, TranscriptionSource};
pub use input::MediaChunk;
pub use session::{LiveClient, SessionState};
pub use turn::ModelTurn;
pub use types::{
    FunctionDeclaration, Part, ResponseModality, ToolCall, ToolDeclaration, ToolResponse,
    ToolResult,
};
