use crate::types::{ToolCall, ToolDeclaration, ToolResponse};
use async_trait::async_trait;

/// Executes tool calls on behalf of a session.
///
/// Implementations must always produce a response for the call they were
/// given, converting any failure into [`ToolResponse::error`]. The session
/// writes exactly one response per dispatched call.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    /// Declarations for the setup message. Read once per `connect`.
    fn declarations(&self) -> Vec<ToolDeclaration>;

    async fn dispatch(&self, call: ToolCall) -> ToolResponse;
}

/// A dispatcher with no tools; every call is answered with an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolDispatch for NoTools {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        Vec::new()
    }

    async fn dispatch(&self, call: ToolCall) -> ToolResponse {
        let message = format!("Unknown tool: {}", call.name);
        ToolResponse::error(&call, message)
    }
}
