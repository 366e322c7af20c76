use anyhow::Context;
use foxlive_core::{ToolCatalog, ToolManager};
use std::path::Path;
use tracing::info;

/// The default catalog, overlaid with the JSON file at `path` when one is given.
pub fn load_catalog(path: Option<&Path>) -> anyhow::Result<ToolCatalog> {
    let mut catalog = ToolCatalog::with_defaults();
    if let Some(path) = path {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tool config {}", path.display()))?;
        let count = catalog
            .import_json(&json)
            .with_context(|| format!("Invalid tool config {}", path.display()))?;
        info!(path = %path.display(), count, "Loaded tool configuration.");
    }
    Ok(catalog)
}

/// Registers the enabled tools of `catalog`.
pub fn build_manager(catalog: &ToolCatalog) -> anyhow::Result<ToolManager> {
    let manager = ToolManager::from_catalog(catalog).context("Failed to register tools")?;
    let stats = catalog.stats();
    info!(
        registered = manager.len(),
        enabled = stats.enabled,
        total = stats.total,
        "Tools ready."
    );
    Ok(manager)
}
