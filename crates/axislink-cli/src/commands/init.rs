//! Write a starter settings file.

use std::path::Path;

use anyhow::{Context, Result, bail};
use axislink_core::{AppConfig, JsonSettingsStore, SettingsStore};

pub fn run(settings: &Path, force: bool) -> Result<()> {
    let store = JsonSettingsStore::new(settings);
    if store.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            settings.display()
        );
    }

    let config = AppConfig::with_default_targets();
    store
        .save(&config)
        .with_context(|| format!("Failed to write {}", settings.display()))?;

    println!("Wrote {} target(s) to {}", config.targets.len(), settings.display());
    for target in &config.targets {
        println!("  {:<12} {}", target.name, target.backend.kind());
    }
    Ok(())
}
