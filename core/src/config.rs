//! Configuration management (config.toml)
//!
//! Every scene-change, interpolation and pacing tunable lives here. Settings
//! are stored in TOML in the platform-specific config directory, or at the
//! path named by `NVVK_CONFIG`. Missing fields fall back to defaults so
//! partial files work.

use std::path::{Path, PathBuf};

use nvvk_shared::{DiagnosticsPreset, FrameGenMode};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "NVVK_CONFIG";

/// Library configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NvvkConfig {
    #[serde(default)]
    pub frame_gen: FrameGenConfig,
    #[serde(default)]
    pub scene_change: SceneChangeConfig,
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    #[serde(default)]
    pub low_latency: LowLatencyConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Frame generation engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameGenConfig {
    /// Mode used when none is given explicitly (default: performance)
    #[serde(default)]
    pub default_mode: FrameGenMode,
    /// Temporal position of the generated frame (default: 0.5, range: 0.05-0.95)
    #[serde(default = "default_temporal_position")]
    pub temporal_position: f32,
    /// Smoothing factor for all exponential averages (default: 0.1, range: 0.01-1.0)
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f32,
    /// Add the real-frame hold-back to latency compensation (default: true)
    #[serde(default = "default_true")]
    pub hold_back_compensation: bool,
}

/// Thresholds a block must stay under to agree with its neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeThresholds {
    /// Motion magnitude as a fraction of the frame diagonal (range: 0.0-1.0)
    pub motion_fraction: f32,
    /// Residual colour delta (range: 0.0-1.0)
    pub color_delta: f32,
}

/// Scene change gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneChangeConfig {
    /// Fraction of disagreeing blocks that marks a cut (default: 0.6)
    #[serde(default = "default_disagreement_ratio")]
    pub disagreement_ratio: f32,
    /// Global histogram delta that marks a cut on its own (default: 0.5)
    #[serde(default = "default_histogram_delta_limit")]
    pub histogram_delta_limit: f32,
    #[serde(default = "default_performance_thresholds")]
    pub performance: ModeThresholds,
    #[serde(default = "default_balanced_thresholds")]
    pub balanced: ModeThresholds,
    #[serde(default = "default_quality_thresholds")]
    pub quality: ModeThresholds,
}

/// Interpolator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    /// Generated frames below this confidence are not presented (default: 0.5)
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// Blocks below this estimator confidence count as invalid (default: 0.2)
    #[serde(default = "default_occlusion_confidence_floor")]
    pub occlusion_confidence_floor: f32,
    /// Neighbour fill passes in quality mode (default: 3, range: 0-16)
    #[serde(default = "default_hole_fill_passes")]
    pub hole_fill_passes: u32,
    /// Share of a valid block's weight a filled block contributes (default: 0.5)
    #[serde(default = "default_filled_block_credit")]
    pub filled_block_credit: f32,
    #[serde(default = "default_budget_performance_us")]
    pub budget_performance_us: u64,
    #[serde(default = "default_budget_balanced_us")]
    pub budget_balanced_us: u64,
    #[serde(default = "default_budget_quality_us")]
    pub budget_quality_us: u64,
}

/// Low-latency pacing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowLatencyConfig {
    /// Boost used by callers that enable pacing without arguments (default: false)
    #[serde(default)]
    pub boost: bool,
    /// Minimum frame interval in microseconds, 0 for uncapped (default: 0)
    #[serde(default)]
    pub min_interval_us: u32,
    /// Upper bound on a single sleep (default: 100000)
    #[serde(default = "default_max_sleep_us")]
    pub max_sleep_us: u64,
    /// Marker rows kept for timing queries (default: 64, range: 1-4096)
    #[serde(default = "default_marker_retention")]
    pub marker_retention: usize,
    /// Smoothing factor for latency averages (default: 0.1)
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f32,
}

/// Diagnostic checkpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Config flag preset chained into device creation (default: minimal)
    #[serde(default)]
    pub preset: DiagnosticsPreset,
    /// Checkpoints retained per queue (default: 256)
    #[serde(default = "default_checkpoint_capacity")]
    pub checkpoint_capacity: usize,
}

fn default_true() -> bool {
    true
}
fn default_temporal_position() -> f32 {
    0.5
}
fn default_ema_alpha() -> f32 {
    0.1
}

fn default_performance_thresholds() -> ModeThresholds {
    ModeThresholds {
        motion_fraction: 0.05,
        color_delta: 0.35,
    }
}
fn default_balanced_thresholds() -> ModeThresholds {
    ModeThresholds {
        motion_fraction: 0.08,
        color_delta: 0.45,
    }
}
fn default_quality_thresholds() -> ModeThresholds {
    ModeThresholds {
        motion_fraction: 0.12,
        color_delta: 0.55,
    }
}
fn default_disagreement_ratio() -> f32 {
    0.6
}
fn default_histogram_delta_limit() -> f32 {
    0.5
}

fn default_confidence_floor() -> f32 {
    0.5
}
fn default_occlusion_confidence_floor() -> f32 {
    0.2
}
fn default_hole_fill_passes() -> u32 {
    3
}
fn default_filled_block_credit() -> f32 {
    0.5
}
fn default_budget_performance_us() -> u64 {
    FrameGenMode::Performance.nominal_budget_us()
}
fn default_budget_balanced_us() -> u64 {
    FrameGenMode::Balanced.nominal_budget_us()
}
fn default_budget_quality_us() -> u64 {
    FrameGenMode::Quality.nominal_budget_us()
}

fn default_max_sleep_us() -> u64 {
    100_000
}
fn default_marker_retention() -> usize {
    64
}
fn default_checkpoint_capacity() -> usize {
    256
}

impl Default for FrameGenConfig {
    fn default() -> Self {
        Self {
            default_mode: FrameGenMode::default(),
            temporal_position: default_temporal_position(),
            ema_alpha: default_ema_alpha(),
            hold_back_compensation: default_true(),
        }
    }
}

impl Default for SceneChangeConfig {
    fn default() -> Self {
        Self {
            disagreement_ratio: default_disagreement_ratio(),
            histogram_delta_limit: default_histogram_delta_limit(),
            performance: default_performance_thresholds(),
            balanced: default_balanced_thresholds(),
            quality: default_quality_thresholds(),
        }
    }
}

impl SceneChangeConfig {
    /// Thresholds for `mode`. Off uses the performance set.
    pub fn thresholds(&self, mode: FrameGenMode) -> ModeThresholds {
        match mode {
            FrameGenMode::Off | FrameGenMode::Performance => self.performance,
            FrameGenMode::Balanced => self.balanced,
            FrameGenMode::Quality => self.quality,
        }
    }
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            occlusion_confidence_floor: default_occlusion_confidence_floor(),
            hole_fill_passes: default_hole_fill_passes(),
            filled_block_credit: default_filled_block_credit(),
            budget_performance_us: default_budget_performance_us(),
            budget_balanced_us: default_budget_balanced_us(),
            budget_quality_us: default_budget_quality_us(),
        }
    }
}

impl InterpolationConfig {
    /// Generation time budget for `mode`.
    pub fn budget_us(&self, mode: FrameGenMode) -> u64 {
        match mode {
            FrameGenMode::Off => 0,
            FrameGenMode::Performance => self.budget_performance_us,
            FrameGenMode::Balanced => self.budget_balanced_us,
            FrameGenMode::Quality => self.budget_quality_us,
        }
    }
}

impl Default for LowLatencyConfig {
    fn default() -> Self {
        Self {
            boost: false,
            min_interval_us: 0,
            max_sleep_us: default_max_sleep_us(),
            marker_retention: default_marker_retention(),
            ema_alpha: default_ema_alpha(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            preset: DiagnosticsPreset::default(),
            checkpoint_capacity: default_checkpoint_capacity(),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

fn clamp_field<T: PartialOrd + Copy + std::fmt::Display>(
    warnings: &mut Vec<String>,
    name: &str,
    value: &mut T,
    min: T,
    max: T,
) {
    if *value < min || *value > max {
        let clamped = if *value < min { min } else { max };
        warnings.push(format!(
            "{name} = {value} is outside {min}..={max}, using {clamped}"
        ));
        *value = clamped;
    }
}

fn clamp_unit(warnings: &mut Vec<String>, name: &str, value: &mut f32) {
    if value.is_nan() {
        warnings.push(format!("{name} is NaN, using 0"));
        *value = 0.0;
    }
    clamp_field(warnings, name, value, 0.0, 1.0);
}

impl NvvkConfig {
    /// Clamp out-of-range tunables, returning one warning per fix.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        let fg = &mut self.frame_gen;
        clamp_field(
            &mut warnings,
            "frame_gen.temporal_position",
            &mut fg.temporal_position,
            0.05,
            0.95,
        );
        clamp_field(&mut warnings, "frame_gen.ema_alpha", &mut fg.ema_alpha, 0.01, 1.0);

        let sc = &mut self.scene_change;
        for (name, t) in [
            ("performance", &mut sc.performance),
            ("balanced", &mut sc.balanced),
            ("quality", &mut sc.quality),
        ] {
            clamp_unit(
                &mut warnings,
                &format!("scene_change.{name}.motion_fraction"),
                &mut t.motion_fraction,
            );
            clamp_unit(
                &mut warnings,
                &format!("scene_change.{name}.color_delta"),
                &mut t.color_delta,
            );
        }
        clamp_unit(
            &mut warnings,
            "scene_change.disagreement_ratio",
            &mut sc.disagreement_ratio,
        );
        clamp_unit(
            &mut warnings,
            "scene_change.histogram_delta_limit",
            &mut sc.histogram_delta_limit,
        );

        let interp = &mut self.interpolation;
        clamp_unit(
            &mut warnings,
            "interpolation.confidence_floor",
            &mut interp.confidence_floor,
        );
        clamp_unit(
            &mut warnings,
            "interpolation.occlusion_confidence_floor",
            &mut interp.occlusion_confidence_floor,
        );
        clamp_unit(
            &mut warnings,
            "interpolation.filled_block_credit",
            &mut interp.filled_block_credit,
        );
        clamp_field(
            &mut warnings,
            "interpolation.hole_fill_passes",
            &mut interp.hole_fill_passes,
            0,
            16,
        );

        let ll = &mut self.low_latency;
        clamp_field(
            &mut warnings,
            "low_latency.marker_retention",
            &mut ll.marker_retention,
            1,
            4096,
        );
        clamp_field(&mut warnings, "low_latency.ema_alpha", &mut ll.ema_alpha, 0.01, 1.0);
        clamp_field(
            &mut warnings,
            "low_latency.max_sleep_us",
            &mut ll.max_sleep_us,
            1_000,
            1_000_000,
        );

        clamp_field(
            &mut warnings,
            "diagnostics.checkpoint_capacity",
            &mut self.diagnostics.checkpoint_capacity,
            1,
            65_536,
        );

        warnings
    }
}

// ============================================================================
// Loading and saving
// ============================================================================

/// Failure reading an explicit config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Returns the platform-specific configuration directory.
///
/// On Linux: `~/.config/nvvk`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "nvvk", "nvvk").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path of the active config file: `NVVK_CONFIG`, else `config.toml` in
/// [`config_dir`].
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Loads the configuration from disk.
///
/// Returns defaults if the file doesn't exist or cannot be parsed. Out of
/// range values are clamped and logged.
pub fn load() -> NvvkConfig {
    let Some(path) = config_path() else {
        return NvvkConfig::default();
    };

    match load_from(&path) {
        Ok(config) => config,
        Err(ConfigError::Io { .. }) => NvvkConfig::default(),
        Err(err) => {
            tracing::warn!("{}, using defaults", err);
            NvvkConfig::default()
        }
    }
}

/// Loads and validates the configuration at `path`.
pub fn load_from(path: &Path) -> Result<NvvkConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: NvvkConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    for warning in config.validate() {
        tracing::warn!("{}: {}", path.display(), warning);
    }
    Ok(config)
}

/// Saves the configuration to [`config_path`].
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file
/// cannot be written.
pub fn save(config: &NvvkConfig) -> std::io::Result<()> {
    match config_path() {
        Some(path) => save_to(config, &path),
        None => Ok(()),
    }
}

/// Saves the configuration to `path`, creating parent directories.
pub fn save_to(config: &NvvkConfig, path: &Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(config).map_err(std::io::Error::other)?;
    std::fs::write(path, content)
}
