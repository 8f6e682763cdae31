// SPDX-License-Identifier: GPL-3.0-only

use camera_mux::Config;
use camera_mux::backends::camera::CameraBackendType;
use camera_mux::shaders::FilterType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-mux")]
#[command(about = "Share one camera between several viewers")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: ~/.config/camera-mux/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Camera backend overriding the configured one (virtual, v4l2)
    #[arg(short, long, global = true)]
    backend: Option<CameraBackendType>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Preview one camera in several headless viewers
    Preview {
        /// Camera index to use (from 'camera-mux list')
        #[arg(short = 'i', long, default_value = "0")]
        camera: u32,

        /// Number of viewers sharing the camera
        #[arg(short, long, default_value = "2")]
        viewers: usize,

        /// Preview duration in seconds, 0 runs until Ctrl-C
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },

    /// Apply a colour filter to an image file
    Filter {
        /// Input image
        input: PathBuf,

        /// Output image, format taken from the extension
        output: PathBuf,

        /// Filter to apply (standard, mono, sepia, negative)
        #[arg(short, long, default_value_t = FilterType::Mono)]
        filter: FilterType,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_mux=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    match cli.command {
        Commands::List => cli::list_cameras(&config)?,
        Commands::Preview {
            camera,
            viewers,
            duration,
        } => cli::run_preview(&config, camera, viewers, duration)?,
        Commands::Filter {
            input,
            output,
            filter,
        } => cli::filter_image(&config, &input, &output, filter)?,
    }

    Ok(())
}
