//! Tool Dispatch Loop.
//!
//! [`ToolManager`] owns the registry of tools and the alias table that routes
//! alternate call names to them. Dispatch always resolves to a response, so a
//! failing or unknown tool can never stall the remote turn.
//!
//! Reloads wait for in-flight calls: every dispatch holds the read side of an
//! async gate while the tool runs, and [`ToolManager::reload`] takes the write
//! side before swapping the registry.

use crate::calculator::CalculatorTool;
use crate::catalog::{ToolCatalog, ToolConfig};
use crate::search::GoogleSearchTool;
use crate::tool::{Tool, ToolError};
use crate::weather::{self, WeatherTool};
use async_trait::async_trait;
use gemini_realtime::{ToolCall, ToolDeclaration, ToolDispatch, ToolResponse};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Tool {0} is already registered")]
    DuplicateTool(String),

    #[error("Alias {alias} is already taken by {owner}")]
    AliasConflict { alias: String, owner: String },

    #[error("Alias {alias} targets unregistered tool {target}")]
    UnknownAliasTarget { alias: String, target: String },
}

struct Entry {
    name: String,
    tool: Arc<dyn Tool>,
}

/// Registered tools in registration order plus the alias table.
#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    aliases: HashMap<String, String>,
}

impl Registry {
    fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    fn insert(&mut self, name: &str, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        if self.contains(name) {
            return Err(RegistryError::DuplicateTool(name.to_string()));
        }
        if let Some(owner) = self.aliases.get(name) {
            return Err(RegistryError::AliasConflict {
                alias: name.to_string(),
                owner: owner.clone(),
            });
        }

        let aliases: Vec<String> = tool.aliases().into_iter().filter(|a| a != name).collect();
        for alias in &aliases {
            if self.contains(alias) {
                return Err(RegistryError::AliasConflict {
                    alias: alias.clone(),
                    owner: alias.clone(),
                });
            }
            if let Some(owner) = self.aliases.get(alias) {
                return Err(RegistryError::AliasConflict {
                    alias: alias.clone(),
                    owner: owner.clone(),
                });
            }
        }

        for alias in aliases {
            self.aliases.insert(alias, name.to_string());
        }
        self.entries.push(Entry {
            name: name.to_string(),
            tool,
        });
        Ok(())
    }

    fn add_alias(&mut self, alias: &str, target: &str) -> Result<(), RegistryError> {
        if !self.contains(target) {
            return Err(RegistryError::UnknownAliasTarget {
                alias: alias.to_string(),
                target: target.to_string(),
            });
        }
        if self.contains(alias) {
            return Err(RegistryError::AliasConflict {
                alias: alias.to_string(),
                owner: alias.to_string(),
            });
        }
        if let Some(owner) = self.aliases.get(alias) {
            if owner != target {
                return Err(RegistryError::AliasConflict {
                    alias: alias.to_string(),
                    owner: owner.clone(),
                });
            }
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    /// Direct names win over aliases.
    fn resolve(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .or_else(|| {
                let target = self.aliases.get(name)?;
                self.entries.iter().find(|e| &e.name == target)
            })
    }
}

/// What [`ToolManager::tools_info`] reports for one registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub enabled: bool,
    pub config: Option<ToolConfig>,
    pub functions: Vec<String>,
    pub aliases: Vec<String>,
}

/// Builds the implementation for a catalog entry, if this crate provides one.
pub fn builtin_tool(config: &ToolConfig) -> Option<Arc<dyn Tool>> {
    match config.id.as_str() {
        "google_search" => Some(Arc::new(GoogleSearchTool)),
        "calculator" => Some(Arc::new(CalculatorTool)),
        "weather" => Some(Arc::new(WeatherTool::with_urls(
            config
                .setting_str("geocodingUrl")
                .unwrap_or(weather::GEOCODING_URL),
            config
                .setting_str("forecastUrl")
                .unwrap_or(weather::FORECAST_URL),
        ))),
        _ => None,
    }
}

fn registry_from_catalog(catalog: &ToolCatalog) -> Result<Registry, RegistryError> {
    let mut registry = Registry::default();
    for config in catalog.enabled() {
        match builtin_tool(config) {
            Some(tool) => registry.insert(&config.id, tool)?,
            None => warn!(tool = %config.id, "Enabled tool has no implementation; skipping."),
        }
    }
    Ok(registry)
}

#[derive(Default)]
pub struct ToolManager {
    registry: RwLock<Registry>,
    drain: tokio::sync::RwLock<()>,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in tools whose catalog entries are enabled.
    pub fn from_catalog(catalog: &ToolCatalog) -> Result<Self, RegistryError> {
        let registry = registry_from_catalog(catalog)?;
        info!(tools = ?registry.entries.iter().map(|e| &e.name).collect::<Vec<_>>(), "Registered tools from catalog.");
        Ok(Self {
            registry: RwLock::new(registry),
            drain: tokio::sync::RwLock::new(()),
        })
    }

    /// Fails with [`RegistryError::DuplicateTool`] if `name` is taken; the
    /// existing registration is left untouched.
    pub fn register(&self, name: &str, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        self.registry.write().insert(name, tool)?;
        info!(tool = %name, "Tool registered.");
        Ok(())
    }

    /// Routes calls named `alias` to the registered tool `target`.
    pub fn register_alias(&self, alias: &str, target: &str) -> Result<(), RegistryError> {
        self.registry.write().add_alias(alias, target)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry
            .read()
            .entries
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The registry key a call name routes to.
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.registry.read().resolve(name).map(|e| e.name.clone())
    }

    /// Replaces the tool set with the catalog's enabled tools.
    ///
    /// Waits until no call is executing. If the new set is invalid the old
    /// one stays in place.
    pub async fn reload(&self, catalog: &ToolCatalog) -> Result<(), RegistryError> {
        let registry = registry_from_catalog(catalog)?;
        let _drained = self.drain.write().await;
        *self.registry.write() = registry;
        info!(tools = ?self.names(), "Tools reloaded from catalog.");
        Ok(())
    }

    pub fn tools_info(&self, catalog: &ToolCatalog) -> Vec<ToolInfo> {
        let registry = self.registry.read();
        registry
            .entries
            .iter()
            .map(|entry| {
                let config = catalog.get(&entry.name).cloned();
                let mut aliases: Vec<String> = registry
                    .aliases
                    .iter()
                    .filter(|(_, target)| **target == entry.name)
                    .map(|(alias, _)| alias.clone())
                    .collect();
                aliases.sort();
                ToolInfo {
                    name: entry.name.clone(),
                    enabled: config.as_ref().is_some_and(|c| c.enabled),
                    config,
                    functions: entry
                        .tool
                        .declaration()
                        .function_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    aliases,
                }
            })
            .collect()
    }

    async fn execute(&self, call: &ToolCall) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .registry
            .read()
            .resolve(&call.name)
            .map(|e| e.tool.clone())
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        tool.execute(call.args.clone()).await
    }
}

#[async_trait]
impl ToolDispatch for ToolManager {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry
            .read()
            .entries
            .iter()
            .map(|e| e.tool.declaration())
            .collect()
    }

    async fn dispatch(&self, call: ToolCall) -> ToolResponse {
        let _in_flight = self.drain.read().await;
        info!(tool = %call.name, id = %call.id, "Handling tool call.");
        match self.execute(&call).await {
            Ok(output) => ToolResponse::output(&call, output),
            Err(err) => {
                error!(tool = %call.name, error = %err, "Tool execution failed.");
                ToolResponse::error(&call, err.to_string())
            }
        }
    }
}
