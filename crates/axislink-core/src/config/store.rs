//! Settings persistence.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::AppConfig;
use crate::error::Result;

pub trait SettingsStore {
    fn load(&self) -> Result<AppConfig>;
    fn save(&self, config: &AppConfig) -> Result<()>;

    /// Load, falling back to an empty configuration when nothing is stored yet.
    fn load_or_default(&self) -> Result<AppConfig> {
        match self.load() {
            Ok(config) => Ok(config),
            Err(e) if e.is_not_found() => {
                debug!("No stored settings, using defaults");
                Ok(AppConfig::default())
            }
            Err(e) => Err(e),
        }
    }
}

/// Stores the whole configuration as one pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<AppConfig> {
        let content = fs::read_to_string(&self.path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        debug!(
            "Loaded {} target(s) from {}",
            config.targets.len(),
            self.path.display()
        );
        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)?;
        info!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, TargetConfig, TcpConfig};
    use crate::error::Error;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("nested").join("settings.json"));

        let config = AppConfig::with_default_targets();
        store.save(&config).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("absent.json"));

        assert!(store.load().unwrap_err().is_not_found());
        assert_eq!(store.load_or_default().unwrap(), AppConfig::default());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonSettingsStore::new(&path);
        assert!(matches!(store.load_or_default(), Err(Error::Json(_))));
    }

    #[test]
    fn test_targets_are_stored_under_their_name() {
        let dir = tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("settings.json"));
        let config = AppConfig {
            targets: vec![TargetConfig::new(
                "stroker",
                BackendConfig::Tcp(TcpConfig::builder().update_rate(90).build()),
            )],
        };
        store.save(&config).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["targets"][0]["name"], "stroker");
        assert_eq!(raw["targets"][0]["backend"]["kind"], "tcp");
        assert_eq!(raw["targets"][0]["backend"]["update_rate"], 90);
    }
}
