// SPDX-License-Identifier: GPL-3.0-only

use camfx::daemon::{self, StartOptions};
use clap::{Parser, Subcommand};
use cli::EffectArgs;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camfx")]
#[command(about = "Virtual camera with live video effects")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Start {
        /// Config file (default: ~/.config/camfx/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Capture device index (from 'camfx list-devices')
        #[arg(short, long)]
        input: Option<u32>,

        /// Output width
        #[arg(long)]
        width: Option<u32>,

        /// Output height
        #[arg(long)]
        height: Option<u32>,

        /// Output framerate
        #[arg(long)]
        fps: Option<u32>,

        /// Name of the virtual camera
        #[arg(short, long)]
        name: Option<String>,

        /// Do not register the D-Bus control interface
        #[arg(long)]
        no_dbus: bool,
    },

    /// List capture devices
    ListDevices,

    /// Replace the effect chain with one effect
    SetEffect {
        /// Effect type (blur, replace, brightness, beautify, autoframe, gaze-correct)
        #[arg(short, long)]
        effect: String,

        #[command(flatten)]
        params: EffectArgs,
    },

    /// Add an effect, or update it if it is already in the chain
    AddEffect {
        #[arg(short, long)]
        effect: String,

        #[command(flatten)]
        params: EffectArgs,
    },

    /// Remove an effect by position or type
    RemoveEffect {
        #[arg(short, long, conflicts_with = "effect", required_unless_present = "effect")]
        index: Option<i32>,

        #[arg(short, long)]
        effect: Option<String>,
    },

    /// Change one parameter of an effect in the chain
    UpdateParameter {
        #[arg(short, long)]
        effect: String,

        #[arg(short, long)]
        parameter: String,

        #[arg(short, long, allow_hyphen_values = true)]
        value: String,
    },

    /// Show the effect chain
    GetEffects,

    /// Open the camera regardless of consumers
    CameraStart,

    /// Close the camera
    CameraStop,

    /// Show the camera state
    CameraStatus,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set RUST_LOG to control the log level
    // Examples: RUST_LOG=debug, RUST_LOG=camfx=trace
    let default_filter = match cli.command {
        Commands::Start { .. } => "warn,camfx=info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::Start {
            config,
            input,
            width,
            height,
            fps,
            name,
            no_dbus,
        } => {
            let options = StartOptions {
                config_path: config,
                device_index: input,
                width,
                height,
                fps,
                sink_name: name,
                no_dbus,
            };
            daemon::run(&options)?;
            Ok(())
        }
        Commands::ListDevices => cli::list_devices_cmd(),
        Commands::SetEffect { effect, params } => cli::set_effect(effect, &params),
        Commands::AddEffect { effect, params } => cli::add_effect(effect, &params),
        Commands::RemoveEffect { index, effect } => cli::remove_effect(index, effect),
        Commands::UpdateParameter {
            effect,
            parameter,
            value,
        } => cli::update_parameter(effect, parameter, value),
        Commands::GetEffects => cli::get_effects(),
        Commands::CameraStart => cli::camera_start(),
        Commands::CameraStop => cli::camera_stop(),
        Commands::CameraStatus => cli::camera_status(),
    }
}
