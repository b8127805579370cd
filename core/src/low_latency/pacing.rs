//! Sleep deadline computation.
//!
//! The controller aims to start the next simulation so that its present lands
//! one minimum interval after the last observed `PresentEnd`. The expected
//! simulation-to-present latency is subtracted from that target. When frame
//! generation presented a generated frame in the last interval, the real frame
//! was held back behind it, so the deadline moves later by the compensation.

use super::driver::SleepMode;

/// Settings latched at the start of each `sleep()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacingSettings {
    pub enabled: bool,
    pub boost: bool,
    pub min_interval_us: u32,
}

impl PacingSettings {
    pub fn sleep_mode(&self) -> SleepMode {
        SleepMode {
            enabled: self.enabled,
            boost: self.enabled && self.boost,
            min_interval_us: if self.enabled { self.min_interval_us } else { 0 },
        }
    }
}

/// Inputs observed since the previous sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacingInputs {
    pub now_us: u64,
    pub last_present_end_us: Option<u64>,
    /// Smoothed simulation start to present end
    pub avg_latency_us: u64,
    /// Frame generation hold-back, 0 when no generated frame was presented
    pub compensation_us: u64,
}

#[derive(Debug)]
pub struct PacingController {
    active: PacingSettings,
    pending: Option<PacingSettings>,
    max_sleep_us: u64,
}

impl PacingController {
    pub fn new(max_sleep_us: u64) -> Self {
        Self {
            active: PacingSettings::default(),
            pending: None,
            max_sleep_us,
        }
    }

    pub fn settings(&self) -> PacingSettings {
        self.active
    }

    /// Settings the next `sleep()` will use.
    pub fn upcoming(&self) -> PacingSettings {
        self.pending.unwrap_or(self.active)
    }

    pub fn enable(&mut self, boost: bool, min_interval_us: u32) {
        self.pending = Some(PacingSettings {
            enabled: true,
            boost,
            min_interval_us,
        });
    }

    pub fn disable(&mut self) {
        self.pending = Some(PacingSettings::default());
    }

    /// Apply pending settings. Returns the new mode when it changed.
    pub fn latch(&mut self) -> Option<SleepMode> {
        let next = self.pending.take()?;
        let changed = next != self.active;
        self.active = next;
        changed.then(|| next.sleep_mode())
    }

    /// When the waiter should be released, never earlier than `now_us` and
    /// never more than the sleep cap after it.
    pub fn deadline(&self, inputs: PacingInputs) -> u64 {
        let now = inputs.now_us;
        if !self.active.enabled {
            return now;
        }
        let Some(last_present) = inputs.last_present_end_us else {
            return now;
        };

        let target = (last_present + u64::from(self.active.min_interval_us))
            .saturating_sub(inputs.avg_latency_us)
            + inputs.compensation_us;

        target.clamp(now, now.saturating_add(self.max_sleep_us))
    }
}
