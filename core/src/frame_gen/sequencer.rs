//! Presentation ordering and frame id assignment.
//!
//! For each interval `(prev, curr)` the sequencer emits at most one generated
//! frame followed by `curr`. Ids grow by exactly one per presented frame, so
//! a generated frame always sits strictly between its bounding real frames.
//!
//! Ids come from a [`FrameIdSource`] that a latency marker tracker can link
//! to, so marker rows and presented frames share one numbering.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nvvk_shared::{FrameId, ImageHandle, NvvkError};
use smallvec::SmallVec;

use super::interpolate::GeneratedFrame;

/// Unbound intervals kept for a linked tracker that stopped reading them.
const UNBOUND_LIMIT: usize = 64;

/// Ids handed out for one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalIds {
    pub generated: Option<FrameId>,
    pub real: FrameId,
}

#[derive(Debug, Default)]
struct IdState {
    last: FrameId,
    linked: bool,
    unbound: VecDeque<IntervalIds>,
}

/// Presented frame ids, shared between frame generation and latency markers.
#[derive(Debug, Default)]
pub struct FrameIdSource {
    state: Mutex<IdState>,
}

impl FrameIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, IdState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Highest id handed out, 0 before the first.
    pub fn last(&self) -> FrameId {
        self.state().last
    }

    /// Allocate ids for one interval, the generated frame first.
    pub fn assign(&self, with_generated: bool) -> IntervalIds {
        let mut state = self.state();
        let generated = with_generated.then(|| {
            state.last += 1;
            state.last
        });
        state.last += 1;
        let ids = IntervalIds {
            generated,
            real: state.last,
        };
        if state.linked {
            if state.unbound.len() >= UNBOUND_LIMIT {
                state.unbound.pop_front();
            }
            state.unbound.push_back(ids);
        }
        ids
    }

    /// Never hand out `id` or anything below it.
    pub fn advance_past(&self, id: FrameId) {
        let mut state = self.state();
        state.last = state.last.max(id);
    }

    /// Start queueing intervals for a tracker whose newest row is `after`.
    pub fn link(&self, after: FrameId) {
        let mut state = self.state();
        state.last = state.last.max(after);
        state.linked = true;
        state.unbound.clear();
    }

    pub fn unlink(&self) {
        let mut state = self.state();
        state.linked = false;
        state.unbound.clear();
    }

    /// Intervals assigned since the last call, oldest first.
    pub fn take_unbound(&self) -> Vec<IntervalIds> {
        self.state().unbound.drain(..).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentedKind {
    Real,
    Generated,
}

/// One presentation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentedFrame {
    pub id: FrameId,
    pub image: ImageHandle,
    pub kind: PresentedKind,
    pub timestamp_us: u64,
}

/// Why an interval presented only its real frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ModeOff,
    /// Optical flow is unavailable for this context
    Unsupported,
    SceneChange,
    LowConfidence,
    /// Generation finished after the engine was disabled
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalOutcome {
    /// First frame after init or reset; there is no interval yet
    FirstFrame,
    Generated,
    Skipped(SkipReason),
}

/// The ordered frames to present for one submitted real frame.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalPresentation {
    pub outcome: IntervalOutcome,
    /// Interpolation result, also set when it was not presented
    pub generated: Option<GeneratedFrame>,
    /// `NotSupported`, set on the first interval that found optical flow
    /// unavailable. The frames are presented regardless.
    pub unsupported: Option<NvvkError>,
    frames: SmallVec<[PresentedFrame; 2]>,
}

impl IntervalPresentation {
    /// Frames in presentation order.
    pub fn frames(&self) -> &[PresentedFrame] {
        &self.frames
    }

    /// The real frame closing the interval.
    pub fn real(&self) -> &PresentedFrame {
        // the real frame is always pushed last
        &self.frames[self.frames.len() - 1]
    }

    pub fn generated_slot(&self) -> Option<&PresentedFrame> {
        self.frames
            .iter()
            .find(|f| f.kind == PresentedKind::Generated)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PresentationSequencer {
    ids: Arc<FrameIdSource>,
}

impl PresentationSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequencer drawing ids from `ids`.
    pub fn with_ids(ids: Arc<FrameIdSource>) -> Self {
        Self { ids }
    }

    /// Id of the most recently presented frame, 0 before the first.
    pub fn current_id(&self) -> FrameId {
        self.ids.last()
    }

    /// Id the next presented frame will receive.
    pub fn next_id(&self) -> FrameId {
        self.ids.last() + 1
    }

    /// Assign ids and order the interval's frames.
    ///
    /// `generated` is presented only when `outcome` is `Generated` and the
    /// frame cleared its confidence floor.
    pub fn sequence(
        &mut self,
        real_image: ImageHandle,
        real_timestamp_us: u64,
        outcome: IntervalOutcome,
        generated: Option<GeneratedFrame>,
    ) -> IntervalPresentation {
        let mut frames = SmallVec::new();
        let mut generated = generated;

        let presented = generated
            .as_mut()
            .filter(|g| outcome == IntervalOutcome::Generated && g.should_present);
        let ids = self.ids.assign(presented.is_some());

        if let (Some(g), Some(id)) = (presented, ids.generated) {
            g.frame_id = id;
            frames.push(PresentedFrame {
                id,
                image: g.image,
                kind: PresentedKind::Generated,
                timestamp_us: g.timestamp_us,
            });
        }

        frames.push(PresentedFrame {
            id: ids.real,
            image: real_image,
            kind: PresentedKind::Real,
            timestamp_us: real_timestamp_us,
        });

        IntervalPresentation {
            outcome,
            generated,
            unsupported: None,
            frames,
        }
    }
}
