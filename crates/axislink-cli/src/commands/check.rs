//! Validate settings and probe every target endpoint.

use std::path::Path;

use anyhow::{Context, Result, bail};
use axislink_core::{AppConfig, CancelToken, JsonSettingsStore, SettingsStore, probe};
use tracing::debug;

pub fn run(settings: &Path) -> Result<()> {
    let store = JsonSettingsStore::new(settings);
    let config = store
        .load()
        .with_context(|| format!("Failed to load {}", settings.display()))?;
    config.validate().context("Invalid settings")?;
    println!(
        "{}: {} target(s), settings valid",
        settings.display(),
        config.targets.len()
    );

    let unreachable = report_reachability(&config, &CancelToken::new());
    if unreachable > 0 {
        bail!("{} target(s) unreachable", unreachable);
    }
    Ok(())
}

/// Print one line per enabled target; returns how many failed the probe.
fn report_reachability(config: &AppConfig, cancel: &CancelToken) -> usize {
    let mut unreachable = 0;
    for target in &config.targets {
        if !target.enabled {
            println!("  {:<12} disabled", target.name);
            continue;
        }

        debug!("Probing {} ({})", target.name, target.backend.kind());
        let reachable = probe(&target.backend, cancel);
        if !reachable {
            unreachable += 1;
        }
        println!(
            "  {:<12} {:<10} {}",
            target.name,
            target.backend.kind(),
            if reachable { "reachable" } else { "unreachable" }
        );
    }
    unreachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use axislink_core::config::Endpoint;
    use axislink_core::{BackendConfig, TargetConfig, TcpConfig};
    use std::net::TcpListener;
    use tempfile::tempdir;

    #[test]
    fn test_check_reachable_target() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let config = AppConfig {
            targets: vec![TargetConfig::new(
                "tcode",
                BackendConfig::Tcp(
                    TcpConfig::builder()
                        .endpoint(Endpoint::new("127.0.0.1", port))
                        .build(),
                ),
            )],
        };
        JsonSettingsStore::new(&path).save(&config).unwrap();

        run(&path).unwrap();
    }

    #[test]
    fn test_check_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(run(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_disabled_targets_are_not_probed() {
        let mut target = TargetConfig::new(
            "tcode",
            BackendConfig::Tcp(
                TcpConfig::builder()
                    .endpoint(Endpoint::new("127.0.0.1", 9))
                    .build(),
            ),
        );
        target.enabled = false;
        let config = AppConfig {
            targets: vec![target],
        };
        assert_eq!(report_reachability(&config, &CancelToken::new()), 0);
    }
}
