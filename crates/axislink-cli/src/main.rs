use std::path::PathBuf;

use anyhow::Result;
use axislink_core::config::Endpoint;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod input;
mod retry;
mod validation;

use commands::run::RunOptions;
use validation::{ScriptBinding, parse_script_binding};

#[derive(Parser)]
#[command(name = "axislink")]
#[command(about = "Stream axis values to TCode, device-bus and audio outputs")]
#[command(version)]
struct Args {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "AXISLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect every enabled target and stream until quit
    Run {
        /// Play a funscript on an axis, e.g. `L0=clip.funscript`
        #[arg(short, long = "script", value_parser = parse_script_binding)]
        scripts: Vec<ScriptBinding>,

        /// Follow player telemetry at this endpoint
        #[arg(short, long, num_args = 0..=1, default_missing_value = "127.0.0.1:23554")]
        telemetry: Option<Endpoint>,

        /// Override the update rate of every target (Hz)
        #[arg(short, long)]
        update_rate: Option<u32>,

        /// Only run the named targets
        #[arg(long = "target")]
        targets: Vec<String>,
    },
    /// Validate settings and probe every endpoint
    Check,
    /// Write a settings file with one target of each kind
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// List audio output devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("axislink=info".parse()?))
        .init();

    let args = Args::parse();
    let settings = commands::settings_path(args.config)?;

    match args.command {
        Command::Run {
            scripts,
            telemetry,
            update_rate,
            targets,
        } => commands::run::run(
            &settings,
            RunOptions {
                scripts,
                telemetry,
                update_rate,
                targets,
            },
        ),
        Command::Check => commands::check::run(&settings),
        Command::Init { force } => commands::init::run(&settings, force),
        Command::Devices => commands::devices::run(),
    }
}
