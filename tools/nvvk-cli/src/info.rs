//! Info command - what the libraries would see on this machine

use anyhow::Result;

use nvvk_core::config;
use nvvk_core::detect_nvidia_gpu;
use nvvk_shared::{
    DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME, DIAGNOSTICS_CONFIG_EXTENSION_NAME,
    LOW_LATENCY_EXTENSION_NAME, OPTICAL_FLOW_EXTENSION_NAME, version, version_string,
};

/// Device extensions the contexts look for, with the feature each one backs.
const EXTENSIONS: [(&str, &str); 4] = [
    (OPTICAL_FLOW_EXTENSION_NAME, "frame generation motion estimation"),
    (LOW_LATENCY_EXTENSION_NAME, "pacing sleeps and driver timings"),
    (DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME, "checkpoint markers"),
    (DIAGNOSTICS_CONFIG_EXTENSION_NAME, "crash dump configuration"),
];

pub fn execute() -> Result<()> {
    println!("nvvk {} (packed {:#010x})", version_string(), version());
    println!();

    println!("Extensions:");
    for (name, purpose) in EXTENSIONS {
        println!("  {:<40} {}", name, purpose);
    }
    println!();

    let gpu = if detect_nvidia_gpu() {
        "detected"
    } else {
        "not detected"
    };
    println!("NVIDIA driver: {}", gpu);

    match config::config_path() {
        Some(path) => {
            let state = if path.exists() { "" } else { " (not created)" };
            println!("Config file:   {}{}", path.display(), state);
        }
        None => println!("Config file:   unavailable (no home directory)"),
    }

    Ok(())
}
