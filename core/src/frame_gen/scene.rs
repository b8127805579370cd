//! Scene change gate.
//!
//! Interpolating across a cut produces a smeared blend of two unrelated
//! images, so every interval is classified before generation. A block
//! disagrees with the scene when it is occluded, when its motion exceeds a
//! mode-dependent fraction of the frame diagonal, or when its compensated
//! colour delta exceeds a mode-dependent bound. Too many disagreeing blocks,
//! or a large global histogram shift, classify the interval as a cut.

use nvvk_shared::FrameGenMode;

use super::frame::Frame;
use super::motion::MotionField;
use crate::config::SceneChangeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneClass {
    Continuous,
    SceneChange,
}

/// Classification plus the measurements that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneVerdict {
    pub class: SceneClass,
    /// Fraction of blocks that disagree, in [0, 1]
    pub disagreeing_fraction: f32,
    /// Global histogram delta, when both frames carry colour statistics
    pub histogram_delta: Option<f32>,
}

impl SceneVerdict {
    pub fn is_scene_change(&self) -> bool {
        self.class == SceneClass::SceneChange
    }
}

#[derive(Debug, Clone)]
pub struct SceneChangeDetector {
    config: SceneChangeConfig,
}

impl SceneChangeDetector {
    pub fn new(config: SceneChangeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SceneChangeConfig {
        &self.config
    }

    pub fn classify(
        &self,
        field: &MotionField,
        prev: &Frame,
        curr: &Frame,
        mode: FrameGenMode,
    ) -> SceneVerdict {
        let thresholds = self.config.thresholds(mode);
        let max_motion = thresholds.motion_fraction * field.diagonal();

        let disagreeing = field
            .blocks()
            .iter()
            .filter(|b| {
                b.occluded
                    || b.vector.length() > max_motion
                    || b.color_delta > thresholds.color_delta
            })
            .count();
        let disagreeing_fraction = if field.is_empty() {
            0.0
        } else {
            disagreeing as f32 / field.len() as f32
        };

        let histogram_delta = match (&prev.color, &curr.color) {
            (Some(a), Some(b)) => Some(a.histogram_delta(b)),
            _ => None,
        };

        let cut = disagreeing_fraction > self.config.disagreement_ratio
            || histogram_delta.is_some_and(|d| d > self.config.histogram_delta_limit);

        SceneVerdict {
            class: if cut {
                SceneClass::SceneChange
            } else {
                SceneClass::Continuous
            },
            disagreeing_fraction,
            histogram_delta,
        }
    }
}
