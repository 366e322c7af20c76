//! Tools the live session can call, the catalog that configures them and the
//! manager that dispatches calls to them.

pub mod calculator;
pub mod catalog;
pub mod manager;
pub mod search;
pub mod tool;
pub mod weather;

pub use catalog::{
    CatalogError, CatalogStats, ToolCatalog, ToolCategory, ToolConfig, ToolConfigInput,
    ToolConfigUpdate,
};
pub use manager::{RegistryError, ToolInfo, ToolManager, builtin_tool};
pub use tool::{Tool, ToolError};
