//! Frame generation quality modes.

use serde::{Deserialize, Serialize};

/// Quality mode (`NvvkFrameGenMode`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameGenMode {
    /// Disabled, real frames pass straight through
    Off = 0,
    /// Single forward warp, linear blend (~1ms)
    #[default]
    Performance = 1,
    /// Bidirectional warp with occlusion-aware weights (~2ms)
    Balanced = 2,
    /// Bidirectional warp plus hole filling (~3ms)
    Quality = 3,
}

impl FrameGenMode {
    pub const ALL: [FrameGenMode; 4] = [Self::Off, Self::Performance, Self::Balanced, Self::Quality];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// True for every mode that synthesizes frames.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Nominal generation budget in microseconds.
    pub const fn nominal_budget_us(self) -> u64 {
        match self {
            Self::Off => 0,
            Self::Performance => 1_000,
            Self::Balanced => 2_000,
            Self::Quality => 3_000,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Performance => "performance",
            Self::Balanced => "balanced",
            Self::Quality => "quality",
        }
    }
}

impl std::fmt::Display for FrameGenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for FrameGenMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "performance" | "perf" => Ok(Self::Performance),
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            other => Err(format!("unknown frame generation mode '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_raw_values() {
        assert_eq!(FrameGenMode::Off.as_raw(), 0);
        assert_eq!(FrameGenMode::Quality.as_raw(), 3);
        assert_eq!(FrameGenMode::from_raw(2), Some(FrameGenMode::Balanced));
        assert_eq!(FrameGenMode::from_raw(4), None);
    }

    #[test]
    fn test_mode_budgets_increase_with_quality() {
        assert_eq!(FrameGenMode::Off.nominal_budget_us(), 0);
        assert!(
            FrameGenMode::Performance.nominal_budget_us()
                < FrameGenMode::Balanced.nominal_budget_us()
        );
        assert!(
            FrameGenMode::Balanced.nominal_budget_us() < FrameGenMode::Quality.nominal_budget_us()
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Quality".parse::<FrameGenMode>(), Ok(FrameGenMode::Quality));
        assert_eq!("perf".parse::<FrameGenMode>(), Ok(FrameGenMode::Performance));
        assert!("ultra".parse::<FrameGenMode>().is_err());
        assert!(!FrameGenMode::Off.is_active());
    }
}
