//! Realtime input multiplexing: media fragments from any producer become one
//! `realtimeInput` message per submission.

use crate::audio::INPUT_MIME;
use crate::turn::ToolPhase;
use crate::types::{Blob, RealtimeInput};
use bytes::Bytes;
use std::sync::Arc;

/// One fragment of realtime media. The payload is raw bytes; base64 happens on
/// the way to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: Bytes,
    /// The producer wants to end the model's current turn.
    pub interrupt: bool,
}

impl MediaChunk {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
            interrupt: false,
        }
    }

    /// 16 kHz mono little-endian PCM16 from a capture callback.
    pub fn audio_pcm16(data: impl Into<Bytes>) -> Self {
        Self::new(INPUT_MIME, data)
    }

    /// A still frame from a camera or screen share.
    pub fn jpeg(data: impl Into<Bytes>) -> Self {
        Self::new("image/jpeg", data)
    }

    pub fn with_interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

/// Builds the wire message for one submission.
///
/// Fragment order is preserved. The message is flagged `interrupt` when a
/// fragment asks for it, or when it carries audio while a tool is in use.
/// Returns `None` for an empty submission.
pub fn build_realtime_input(fragments: &[MediaChunk], tool_active: bool) -> Option<RealtimeInput> {
    if fragments.is_empty() {
        return None;
    }

    let interrupt = fragments
        .iter()
        .any(|f| f.interrupt || (tool_active && f.is_audio()));

    Some(RealtimeInput {
        media_chunks: fragments
            .iter()
            .map(|f| Blob::encode(f.mime_type.clone(), &f.data))
            .collect(),
        interrupt: interrupt.then_some(true),
    })
}

/// Reads the shared tool phase at submission time and stamps the batch.
#[derive(Debug, Clone)]
pub struct InputMultiplexer {
    tool_phase: Arc<ToolPhase>,
}

impl InputMultiplexer {
    pub fn new(tool_phase: Arc<ToolPhase>) -> Self {
        Self { tool_phase }
    }

    pub fn tool_active(&self) -> bool {
        self.tool_phase.is_active()
    }

    pub fn build(&self, fragments: &[MediaChunk]) -> Option<RealtimeInput> {
        build_realtime_input(fragments, self.tool_phase.is_active())
    }
}
