//! Main streaming command.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axislink_core::config::Endpoint;
use axislink_core::source::{PlaybackClock, Script, ScriptPlayer, TelemetryClient};
use axislink_core::{
    AppConfig, CancelToken, ConnectionStatus, JsonSettingsStore, OutputTarget, SettingsStore,
    TargetConfig, TargetEvent, TargetEventKind, ValueSources,
};
use crossbeam_channel::{select, unbounded};
use tracing::{debug, error, info, warn};

use crate::input::{self, KeyAction};
use crate::retry::follow_telemetry_with_retry;
use crate::validation::{ScriptBinding, find_duplicate_axis};

const IDLE_TICK: Duration = Duration::from_millis(200);

pub struct RunOptions {
    pub scripts: Vec<ScriptBinding>,
    pub telemetry: Option<Endpoint>,
    pub update_rate: Option<u32>,
    pub targets: Vec<String>,
}

/// Run the main streaming mode
pub fn run(settings: &Path, options: RunOptions) -> Result<()> {
    let config = load_config(settings)?;
    let selected = select_targets(&config, &options)?;

    if let Some(axis) = find_duplicate_axis(&options.scripts) {
        bail!("More than one script given for {}", axis);
    }

    let cancel = CancelToken::new();
    let cancel_ctrlc = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping...");
        cancel_ctrlc.cancel();
    })?;

    info!("axislink {}", env!("CARGO_PKG_VERSION"));

    // Value sources
    let clock = PlaybackClock::new();
    let player = Arc::new(ScriptPlayer::new(clock.clone()));
    for binding in &options.scripts {
        let script = Script::load(&binding.path)
            .with_context(|| format!("Failed to load script {}", binding.path.display()))?;
        info!("{}: {} ({} keyframes)", binding.axis, binding.path.display(), script.len());
        player.set_script(binding.axis, script);
    }

    let telemetry = match &options.telemetry {
        Some(endpoint) => Some(spawn_telemetry(endpoint.clone(), clock.clone(), cancel.child())?),
        None => {
            // without a player the scripts run on the wall clock
            clock.set_playing(true);
            None
        }
    };

    let sources = ValueSources::new(player.clone()).with_keyframes(player);

    // Targets
    let (event_tx, event_rx) = unbounded();
    let mut targets: Vec<OutputTarget> = selected
        .into_iter()
        .map(|mut target| {
            if let Some(hz) = options.update_rate {
                target.backend.set_update_rate(hz);
            }
            OutputTarget::new(target, sources.clone()).with_events(event_tx.clone())
        })
        .collect();
    drop(event_tx);

    for target in &mut targets {
        if let Err(e) = target.connect(&cancel) {
            error!("{}: {}", target.name(), e);
        }
    }

    let (key_tx, key_rx) = unbounded();
    let _keyboard_handle = input::spawn_keyboard_monitor(cancel.clone(), key_tx);
    println!("Streaming... (s: toggle scan, r: reconnect, Esc or q: quit)");

    while !cancel.is_cancelled() {
        select! {
            recv(event_rx) -> event => match event {
                Ok(event) => report_event(&event),
                Err(_) => break,
            },
            recv(key_rx) -> action => {
                if let Ok(action) = action {
                    handle_key(action, &mut targets, &cancel);
                }
            },
            default(IDLE_TICK) => {}
        }
    }

    info!("Shutting down...");
    cancel.cancel();
    for target in &mut targets {
        target.disconnect();
    }
    if let Some(handle) = telemetry
        && handle.join().is_err()
    {
        warn!("Telemetry thread panicked");
    }
    Ok(())
}

fn load_config(settings: &Path) -> Result<AppConfig> {
    let store = JsonSettingsStore::new(settings);
    let mut config = store
        .load_or_default()
        .with_context(|| format!("Failed to load {}", settings.display()))?;

    if config.targets.is_empty() {
        warn!(
            "No targets in {}, using defaults (run `axislink init` to create the file)",
            settings.display()
        );
        config = AppConfig::with_default_targets();
    } else {
        info!("Loaded {} target(s) from {}", config.targets.len(), settings.display());
    }

    config.validate().context("Invalid settings")?;
    Ok(config)
}

/// Enabled targets, narrowed to `--target` names when any are given.
fn select_targets(config: &AppConfig, options: &RunOptions) -> Result<Vec<TargetConfig>> {
    for name in &options.targets {
        if config.target(name).is_none() {
            bail!("Unknown target \"{}\"", name);
        }
    }

    let selected: Vec<TargetConfig> = config
        .targets
        .iter()
        .filter(|t| {
            if options.targets.is_empty() {
                t.enabled
            } else {
                options.targets.contains(&t.name)
            }
        })
        .cloned()
        .collect();

    if selected.is_empty() {
        bail!("No enabled targets to run");
    }
    Ok(selected)
}

fn spawn_telemetry(
    endpoint: Endpoint,
    clock: PlaybackClock,
    cancel: CancelToken,
) -> Result<JoinHandle<()>> {
    info!("Following player telemetry at {}", endpoint);
    let client = TelemetryClient::new(endpoint);
    let handle = thread::Builder::new()
        .name("telemetry".into())
        .spawn(move || follow_telemetry_with_retry(&client, &clock, &cancel))?;
    Ok(handle)
}

fn report_event(event: &TargetEvent) {
    let target = &event.target;
    match &event.kind {
        TargetEventKind::StatusChanged(ConnectionStatus::Connected) => {
            println!("{}: connected", target)
        }
        TargetEventKind::StatusChanged(ConnectionStatus::Disconnected) => {
            println!("{}: disconnected", target)
        }
        TargetEventKind::StatusChanged(status) => debug!("{}: {}", target, status),
        TargetEventKind::Failed { message } => println!("{}: failed: {}", target, message),
        TargetEventKind::DevicesChanged(count) => println!("{}: {} device(s)", target, count),
        TargetEventKind::ScanningChanged(scanning) => {
            println!("{}: scanning {}", target, if *scanning { "started" } else { "stopped" })
        }
    }
}

fn handle_key(action: KeyAction, targets: &mut [OutputTarget], cancel: &CancelToken) {
    match action {
        KeyAction::Quit => cancel.cancel(),
        KeyAction::ToggleScan => {
            let toggled = targets.iter().filter(|t| t.toggle_scan()).count();
            if toggled == 0 {
                println!("No connected device-bus target to scan with");
            }
        }
        KeyAction::Reconnect => {
            for target in targets.iter_mut() {
                if target.status() == ConnectionStatus::Disconnected
                    && let Err(e) = target.connect(cancel)
                {
                    error!("{}: {}", target.name(), e);
                }
            }
        }
    }
}
