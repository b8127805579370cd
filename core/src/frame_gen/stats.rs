//! Frame generation statistics.

use serde::Serialize;

/// Snapshot returned by `get_stats` (`NvvkFrameGenStats` plus extras).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameGenStats {
    /// Generated frames that were presented
    pub generated_frames: u64,
    /// Intervals where generation was attempted but nothing was presented
    pub skipped_frames: u64,
    /// Exponential average of generation time
    pub avg_gen_time_us: u64,
    /// Exponential average of interpolation confidence, in [0, 1]
    pub confidence: f32,
    /// A scene change happened since the last read
    pub scene_change_detected: bool,
    pub budget_overruns: u64,
    /// Results dropped because the engine was disabled mid-generation
    pub discarded_frames: u64,
    pub real_frames: u64,
    /// Exponential average of the interval between real frames
    pub avg_real_interval_us: u64,
}

/// Owns the counters and averages; everything else reads copies.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    stats: FrameGenStats,
    alpha: f64,
    gen_time_ema: Option<f64>,
    confidence_ema: Option<f64>,
    interval_ema: Option<f64>,
    last_real_us: Option<u64>,
}

fn ema(current: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match current {
        Some(avg) => avg + alpha * (sample - avg),
        None => sample,
    }
}

impl StatsAggregator {
    pub fn new(alpha: f32) -> Self {
        Self {
            stats: FrameGenStats::default(),
            alpha: f64::from(alpha.clamp(0.01, 1.0)),
            gen_time_ema: None,
            confidence_ema: None,
            interval_ema: None,
            last_real_us: None,
        }
    }

    pub fn record_real(&mut self, timestamp_us: u64) {
        self.stats.real_frames += 1;
        if let Some(last) = self.last_real_us {
            let interval = timestamp_us.saturating_sub(last) as f64;
            let avg = ema(self.interval_ema, interval, self.alpha);
            self.interval_ema = Some(avg);
            self.stats.avg_real_interval_us = avg.round() as u64;
        }
        self.last_real_us = Some(timestamp_us);
    }

    /// Account for an interpolation pass, presented or not.
    pub fn record_generation(&mut self, generation_time_us: u64, confidence: f32, over_budget: bool) {
        let avg = ema(self.gen_time_ema, generation_time_us as f64, self.alpha);
        self.gen_time_ema = Some(avg);
        self.stats.avg_gen_time_us = avg.round() as u64;

        let conf = ema(
            self.confidence_ema,
            f64::from(confidence.clamp(0.0, 1.0)),
            self.alpha,
        );
        self.confidence_ema = Some(conf);
        self.stats.confidence = (conf as f32).clamp(0.0, 1.0);

        if over_budget {
            self.stats.budget_overruns += 1;
        }
    }

    pub fn record_presented(&mut self) {
        self.stats.generated_frames += 1;
    }

    pub fn record_low_confidence(&mut self) {
        self.stats.skipped_frames += 1;
    }

    pub fn record_scene_change(&mut self) {
        self.stats.skipped_frames += 1;
        self.stats.scene_change_detected = true;
    }

    pub fn record_discarded(&mut self) {
        self.stats.discarded_frames += 1;
    }

    /// Copy without side effects.
    pub fn snapshot(&self) -> FrameGenStats {
        self.stats
    }

    /// Copy for a stats read; clears the scene change flag.
    pub fn read(&mut self) -> FrameGenStats {
        let out = self.stats;
        self.stats.scene_change_detected = false;
        out
    }

    /// Forget the real-frame timeline, e.g. after a history reset.
    pub fn restart_timeline(&mut self) {
        self.last_real_us = None;
    }
}
