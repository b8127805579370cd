//! NVVK CLI - developer tool for the frame generation and low-latency libraries
//!
//! # Commands
//!
//! - `nvvk info` - Library version, Vulkan extensions and NVIDIA detection
//! - `nvvk config` - Print the effective configuration as TOML
//! - `nvvk simulate` - Drive a headless frame loop through both contexts
//!
//! # Usage
//!
//! ```bash
//! # What would the libraries see on this machine?
//! nvvk info
//!
//! # Where is the config file, and what does it resolve to?
//! nvvk config --path
//! nvvk config
//!
//! # 300 frames in quality mode with a hard cut at frame 120
//! nvvk simulate --frames 300 --mode quality --scene-cut 120
//! ```
//!
//! Set `RUST_LOG=nvvk_core=debug` to see per-frame decisions.

mod config;
mod info;
mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// NVVK CLI - frame generation and low-latency pacing tools
#[derive(Parser)]
#[command(name = "nvvk")]
#[command(about = "Developer tool for nvvk frame generation and low-latency pacing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show library version, extension names and GPU detection
    Info,

    /// Print the effective configuration
    Config(config::ConfigArgs),

    /// Run a headless frame loop and report statistics
    Simulate(simulate::SimulateArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info => info::execute(),
        Commands::Config(args) => config::execute(args),
        Commands::Simulate(args) => simulate::execute(args),
    }
}
