use crate::tool::{Tool, ToolError};
use async_trait::async_trait;
use gemini_realtime::ToolDeclaration;
use serde_json::Value;
use tracing::warn;

/// Google Search grounding. The model service runs the search itself; the
/// client only advertises the capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoogleSearchTool;

#[async_trait]
impl Tool for GoogleSearchTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::GoogleSearch(Default::default())
    }

    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        warn!("Received a client-side call for the server-side search tool.");
        Err(ToolError::Execution(
            "google_search is handled server-side".to_string(),
        ))
    }
}
