//! Config command - inspect the configuration the libraries resolve

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use nvvk_core::NvvkConfig;
use nvvk_core::config;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Print the config file path instead of its contents
    #[arg(long)]
    pub path: bool,

    /// Print built-in defaults, ignoring any file on disk
    #[arg(long, conflicts_with = "path")]
    pub defaults: bool,

    /// Write the effective configuration back to the config file
    #[arg(long, conflicts_with_all = ["path", "defaults"])]
    pub write: bool,

    /// Read this file instead of the platform config path
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    if args.path {
        let path = resolve_path(&args)?;
        println!("{}", path.display());
        return Ok(());
    }

    let effective = if args.defaults {
        NvvkConfig::default()
    } else {
        effective_config(args.file.as_deref())?
    };

    if args.write {
        let path = resolve_path(&args)?;
        config::save_to(&effective, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());
        return Ok(());
    }

    print!("{}", render(&effective)?);
    Ok(())
}

/// Load the configuration the libraries would use.
///
/// An explicit file must exist and parse; the platform file falls back to
/// defaults like [`config::load`] does.
pub fn effective_config(file: Option<&std::path::Path>) -> Result<NvvkConfig> {
    match file {
        Some(path) => config::load_from(path).map_err(Into::into),
        None => Ok(config::load()),
    }
}

fn resolve_path(args: &ConfigArgs) -> Result<PathBuf> {
    match &args.file {
        Some(path) => Ok(path.clone()),
        None => config::config_path().context("cannot determine config directory"),
    }
}

fn render(config: &NvvkConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize configuration")
}
