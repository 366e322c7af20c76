//! Tool configuration catalog.
//!
//! The catalog decides which tools are offered to the model. It holds one
//! [`ToolConfig`] per tool id, validates every insert and update, and
//! round-trips through JSON so hosts can persist it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("Missing required fields in tool config: {}", .0.join(", "))]
    MissingField(Vec<String>),

    #[error("Invalid category: {0}. Must be one of: {cats}", cats = ToolCategory::names().join(", "))]
    InvalidCategory(String),

    #[error("Tool config not found: {0}")]
    NotFound(String),

    #[error("Failed to import configs: {0}")]
    Import(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Search,
    Information,
    Utility,
    System,
    Development,
    Data,
    Communication,
    Creative,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 8] = [
        ToolCategory::Search,
        ToolCategory::Information,
        ToolCategory::Utility,
        ToolCategory::System,
        ToolCategory::Development,
        ToolCategory::Data,
        ToolCategory::Communication,
        ToolCategory::Creative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolCategory::Search => "search",
            ToolCategory::Information => "information",
            ToolCategory::Utility => "utility",
            ToolCategory::System => "system",
            ToolCategory::Development => "development",
            ToolCategory::Data => "data",
            ToolCategory::Communication => "communication",
            ToolCategory::Creative => "creative",
        }
    }

    fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.as_str()).collect()
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCategory {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CatalogError::InvalidCategory(s.to_string()))
    }
}

/// A validated tool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub enabled: bool,
    /// Executed by the model service rather than by this process.
    pub server_side: bool,
    pub icon: String,
    pub color: String,
    pub permissions: Vec<String>,
    pub settings: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolConfig {
    /// A string entry of `settings`.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

/// Unvalidated input for a config, as found in JSON imports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfigInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub server_side: bool,
    pub icon: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl ToolConfigInput {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        enabled: bool,
    ) -> Self {
        Self {
            name: Some(name.into()),
            description: Some(description.into()),
            category: Some(category.as_str().to_string()),
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn server_side(mut self, server_side: bool) -> Self {
        self.server_side = server_side;
        self
    }

    pub fn icon(mut self, icon: &str, color: &str) -> Self {
        self.icon = Some(icon.to_string());
        self.color = Some(color.to_string());
        self
    }

    fn validate(self, id: &str, now: DateTime<Utc>) -> Result<ToolConfig, CatalogError> {
        let missing: Vec<String> = [
            ("name", self.name.is_none()),
            ("description", self.description.is_none()),
            ("category", self.category.is_none()),
            ("enabled", self.enabled.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(field, _)| field.to_string())
        .collect();
        if !missing.is_empty() {
            return Err(CatalogError::MissingField(missing));
        }

        let category = self.category.unwrap_or_default().parse::<ToolCategory>()?;
        Ok(ToolConfig {
            id: id.to_string(),
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            category,
            enabled: self.enabled.unwrap_or_default(),
            server_side: self.server_side,
            icon: self.icon.unwrap_or_else(|| "🔧".to_string()),
            color: self.color.unwrap_or_else(|| "#666666".to_string()),
            permissions: self.permissions,
            settings: self.settings,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A partial change applied by [`ToolCatalog::update`].
#[derive(Debug, Clone, Default)]
pub struct ToolConfigUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub enabled: Option<bool>,
    pub server_side: Option<bool>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub settings: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub categories: BTreeMap<ToolCategory, usize>,
    pub server_side: usize,
    pub client_side: usize,
}

/// Insertion-ordered set of tool configurations keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    configs: Vec<ToolConfig>,
}

impl ToolCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in tools: search and weather enabled, the rest disabled.
    pub fn with_defaults() -> Self {
        use ToolCategory::*;
        let defaults = [
            (
                "google_search",
                ToolConfigInput::new("Google Search", "Search the web using Google", Search, true)
                    .server_side(true)
                    .icon("🔍", "#4285f4"),
            ),
            (
                "weather",
                ToolConfigInput::new(
                    "Weather Forecast",
                    "Get weather information for any location",
                    Information,
                    true,
                )
                .icon("🌤️", "#ff9800"),
            ),
            (
                "calculator",
                ToolConfigInput::new("Calculator", "Perform mathematical calculations", Utility, false)
                    .icon("🧮", "#9c27b0"),
            ),
            (
                "file_manager",
                ToolConfigInput::new("File Manager", "Manage files and directories", System, false)
                    .icon("📁", "#607d8b"),
            ),
            (
                "code_executor",
                ToolConfigInput::new("Code Executor", "Execute code snippets safely", Development, false)
                    .icon("💻", "#4caf50"),
            ),
            (
                "database_query",
                ToolConfigInput::new("Database Query", "Query databases and data sources", Data, false)
                    .icon("🗄️", "#2196f3"),
            ),
            (
                "email_sender",
                ToolConfigInput::new("Email Sender", "Send emails and notifications", Communication, false)
                    .icon("📧", "#f44336"),
            ),
            (
                "image_generator",
                ToolConfigInput::new("Image Generator", "Generate images using AI", Creative, false)
                    .server_side(true)
                    .icon("🎨", "#e91e63"),
            ),
        ];

        let now = Utc::now();
        let configs = defaults
            .into_iter()
            .filter_map(|(id, input)| input.validate(id, now).ok())
            .collect();
        Self { configs }
    }

    /// Adds or replaces the config for `id`.
    pub fn add(&mut self, id: &str, input: ToolConfigInput) -> Result<(), CatalogError> {
        let config = input.validate(id, Utc::now())?;
        info!(tool = %id, category = %config.category, enabled = config.enabled, "Tool config added.");
        match self.position(id) {
            Some(i) => self.configs[i] = config,
            None => self.configs.push(config),
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ToolConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    pub fn all(&self) -> &[ToolConfig] {
        &self.configs
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ToolConfig> {
        self.configs.iter().filter(|c| c.enabled)
    }

    pub fn by_category(&self, category: ToolCategory) -> impl Iterator<Item = &ToolConfig> {
        self.configs.iter().filter(move |c| c.category == category)
    }

    /// Applies `update` to an existing config. The config is unchanged if the
    /// result would be invalid.
    pub fn update(&mut self, id: &str, update: ToolConfigUpdate) -> Result<(), CatalogError> {
        let index = self
            .position(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        let current = &self.configs[index];

        let category = match update.category {
            Some(raw) => raw.parse::<ToolCategory>()?,
            None => current.category,
        };
        let updated = ToolConfig {
            id: current.id.clone(),
            name: update.name.unwrap_or_else(|| current.name.clone()),
            description: update
                .description
                .unwrap_or_else(|| current.description.clone()),
            category,
            enabled: update.enabled.unwrap_or(current.enabled),
            server_side: update.server_side.unwrap_or(current.server_side),
            icon: update.icon.unwrap_or_else(|| current.icon.clone()),
            color: update.color.unwrap_or_else(|| current.color.clone()),
            permissions: update
                .permissions
                .unwrap_or_else(|| current.permissions.clone()),
            settings: update.settings.unwrap_or_else(|| current.settings.clone()),
            created_at: current.created_at,
            updated_at: Utc::now(),
        };
        info!(tool = %id, "Tool config updated.");
        self.configs[index] = updated;
        Ok(())
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), CatalogError> {
        self.update(
            id,
            ToolConfigUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
    }

    /// Returns `true` if a config was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(i) => {
                self.configs.remove(i);
                info!(tool = %id, "Tool config removed.");
                true
            }
            None => false,
        }
    }

    /// Pretty-printed JSON object keyed by tool id.
    pub fn export_json(&self) -> Result<String, CatalogError> {
        let map: Map<String, Value> = self
            .configs
            .iter()
            .map(|c| {
                serde_json::to_value(c)
                    .map(|v| (c.id.clone(), v))
                    .map_err(|e| CatalogError::Import(e.to_string()))
            })
            .collect::<Result<_, _>>()?;
        serde_json::to_string_pretty(&map).map_err(|e| CatalogError::Import(e.to_string()))
    }

    /// Adds every config in a JSON object keyed by tool id. Nothing is
    /// applied if any entry is invalid. Returns the number imported.
    pub fn import_json(&mut self, json: &str) -> Result<usize, CatalogError> {
        let entries: BTreeMap<String, ToolConfigInput> =
            serde_json::from_str(json).map_err(|e| CatalogError::Import(e.to_string()))?;

        let now = Utc::now();
        let validated = entries
            .into_iter()
            .map(|(id, input)| {
                input
                    .validate(&id, now)
                    .map_err(|e| CatalogError::Import(format!("{id}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = validated.len();
        for config in validated {
            match self.position(&config.id) {
                Some(i) => self.configs[i] = config,
                None => self.configs.push(config),
            }
        }
        info!(count, "Tool configs imported.");
        Ok(count)
    }

    pub fn stats(&self) -> CatalogStats {
        let mut categories = BTreeMap::new();
        for config in &self.configs {
            *categories.entry(config.category).or_insert(0) += 1;
        }
        let enabled = self.enabled().count();
        let server_side = self.configs.iter().filter(|c| c.server_side).count();
        CatalogStats {
            total: self.configs.len(),
            enabled,
            disabled: self.configs.len() - enabled,
            categories,
            server_side,
            client_side: self.configs.len() - server_side,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.configs.iter().position(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let catalog = ToolCatalog::with_defaults();
        assert_eq!(catalog.all().len(), 8);
        let enabled: Vec<_> = catalog.enabled().map(|c| c.id.as_str()).collect();
        assert_eq!(enabled, vec!["google_search", "weather"]);

        let search = catalog.get("google_search").unwrap();
        assert!(search.server_side);
        assert_eq!(search.category, ToolCategory::Search);
        assert!(!catalog.get("calculator").unwrap().enabled);
    }

    #[test]
    fn test_add_validates_required_fields_and_category() {
        let mut catalog = ToolCatalog::empty();
        let missing = ToolConfigInput {
            name: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(
            catalog.add("x", missing),
            Err(CatalogError::MissingField(vec![
                "description".into(),
                "category".into(),
                "enabled".into()
            ]))
        );

        let mut bad = ToolConfigInput::new("x", "d", ToolCategory::Data, true);
        bad.category = Some("weather".into());
        assert_eq!(
            catalog.add("x", bad),
            Err(CatalogError::InvalidCategory("weather".into()))
        );
        assert!(catalog.all().is_empty());
    }

    #[test]
    fn test_add_fills_presentation_defaults() {
        let mut catalog = ToolCatalog::empty();
        catalog
            .add("t", ToolConfigInput::new("T", "d", ToolCategory::Utility, true))
            .unwrap();
        let config = catalog.get("t").unwrap();
        assert_eq!(config.icon, "🔧");
        assert_eq!(config.color, "#666666");
        assert!(config.permissions.is_empty());
        assert!(!config.server_side);
    }

    #[test]
    fn test_update_and_set_enabled() {
        let mut catalog = ToolCatalog::with_defaults();
        catalog.set_enabled("calculator", true).unwrap();
        assert!(catalog.get("calculator").unwrap().enabled);

        let err = catalog.update(
            "calculator",
            ToolConfigUpdate {
                category: Some("nope".into()),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(CatalogError::InvalidCategory(_))));
        assert_eq!(
            catalog.get("calculator").unwrap().category,
            ToolCategory::Utility
        );

        assert_eq!(
            catalog.set_enabled("missing", true),
            Err(CatalogError::NotFound("missing".into()))
        );
    }

    #[test]
    fn test_queries_and_remove() {
        let mut catalog = ToolCatalog::with_defaults();
        assert_eq!(catalog.by_category(ToolCategory::Creative).count(), 1);
        assert!(catalog.remove("image_generator"));
        assert!(!catalog.remove("image_generator"));
        assert_eq!(catalog.by_category(ToolCategory::Creative).count(), 0);
    }

    #[test]
    fn test_stats() {
        let stats = ToolCatalog::with_defaults().stats();
        assert_eq!(stats.total, 8);
        assert_eq!(stats.enabled, 2);
        assert_eq!(stats.disabled, 6);
        assert_eq!(stats.server_side, 2);
        assert_eq!(stats.client_side, 6);
        assert_eq!(stats.categories[&ToolCategory::Utility], 1);
    }

    #[test]
    fn test_export_then_import_into_empty_catalog() {
        let mut source = ToolCatalog::with_defaults();
        source.set_enabled("calculator", true).unwrap();
        let json = source.export_json().unwrap();

        let mut target = ToolCatalog::empty();
        assert_eq!(target.import_json(&json).unwrap(), 8);
        let calculator = target.get("calculator").unwrap();
        assert!(calculator.enabled);
        assert_eq!(calculator.icon, "🧮");
        assert_eq!(target.stats().enabled, 3);
    }

    #[test]
    fn test_import_is_all_or_nothing() {
        let mut catalog = ToolCatalog::empty();
        let json = r#"{
            "a": { "name": "A", "description": "d", "category": "data", "enabled": true },
            "b": { "name": "B", "description": "d", "category": "bogus", "enabled": true }
        }"#;
        assert!(matches!(
            catalog.import_json(json),
            Err(CatalogError::Import(_))
        ));
        assert!(catalog.all().is_empty());
        assert!(matches!(
            catalog.import_json("not json"),
            Err(CatalogError::Import(_))
        ));
    }

    #[test]
    fn test_settings_lookup() {
        let mut catalog = ToolCatalog::empty();
        let mut input = ToolConfigInput::new("W", "d", ToolCategory::Information, true);
        input
            .settings
            .insert("forecastUrl".into(), Value::String("http://x".into()));
        catalog.add("weather", input).unwrap();
        assert_eq!(
            catalog.get("weather").unwrap().setting_str("forecastUrl"),
            Some("http://x")
        );
    }
}
