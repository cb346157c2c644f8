//! CLI command implementations.

pub mod check;
pub mod devices;
pub mod init;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Settings file under the user config directory.
pub const SETTINGS_FILE: &str = "settings.json";
const APP_DIR: &str = "axislink";

/// Explicit path if given, else `<config dir>/axislink/settings.json`.
pub fn settings_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let base = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(base.join(APP_DIR).join(SETTINGS_FILE))
}
