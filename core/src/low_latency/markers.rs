//! Per-frame latency marker state machine.
//!
//! Each frame id owns one row. The primary channel must be recorded in
//! lifecycle order (sparse is fine, backwards is not):
//!
//! `InputSample → SimulationStart → SimulationEnd → RenderSubmitStart →
//! RenderSubmitEnd → PresentStart → PresentEnd`
//!
//! The out-of-band channel carries its own submit/present pairs for async
//! compute work and is ordered independently. A row retires as complete on
//! `PresentEnd`, or as incomplete when the next frame begins first. Retired
//! rows stay queryable until evicted from the bounded ring.
//!
//! A tracker linked to a [`FrameIdSource`] numbers its rows with presented
//! frame ids. A row begun before its frame was submitted holds a provisional
//! id and takes the real frame's id once the interval is sequenced. Each
//! presented generated frame gets a row of its own.

use std::collections::VecDeque;
use std::sync::Arc;

use nvvk_shared::{FrameId, FrameTimings, LatencyMarker, MarkerChannel, NvvkError};
use serde::Serialize;

use crate::frame_gen::{FrameIdSource, IntervalIds};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("no frame has begun")]
    NoFrame,

    #[error("frame {0} is not tracked")]
    UnknownFrame(FrameId),

    #[error("{marker} already recorded for frame {id}")]
    Duplicate { id: FrameId, marker: LatencyMarker },

    #[error("{marker} recorded after {after} for frame {id}")]
    OutOfOrder {
        id: FrameId,
        marker: LatencyMarker,
        after: LatencyMarker,
    },

    #[error("{marker} requires {requires} for frame {id}")]
    MissingPrerequisite {
        id: FrameId,
        marker: LatencyMarker,
        requires: LatencyMarker,
    },

    #[error("frame {id} is retired, {marker} rejected")]
    Retired { id: FrameId, marker: LatencyMarker },

    #[error("{0} starts a frame and cannot be recorded on an existing one")]
    FrameStart(LatencyMarker),

    #[error("timestamp {at} precedes {last} on frame {id}")]
    TimeWentBackwards { id: FrameId, at: u64, last: u64 },
}

impl From<MarkerError> for NvvkError {
    fn from(err: MarkerError) -> Self {
        NvvkError::InvalidUsage(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowState {
    Open,
    Complete,
    /// A newer frame began before `PresentEnd`
    Incomplete,
    /// Presented generated frame; takes out-of-band markers only
    Generated,
}

/// Position in the primary lifecycle; 0 means nothing recorded.
fn primary_rank(marker: LatencyMarker) -> u8 {
    match marker {
        LatencyMarker::InputSample => 1,
        LatencyMarker::SimulationStart => 2,
        LatencyMarker::SimulationEnd => 3,
        LatencyMarker::RenderSubmitStart => 4,
        LatencyMarker::RenderSubmitEnd => 5,
        LatencyMarker::PresentStart => 6,
        LatencyMarker::PresentEnd => 7,
        _ => 0,
    }
}

fn out_of_band_rank(marker: LatencyMarker) -> u8 {
    match marker {
        LatencyMarker::OutOfBandRenderSubmitStart => 1,
        LatencyMarker::OutOfBandRenderSubmitEnd => 2,
        LatencyMarker::OutOfBandPresentStart => 3,
        LatencyMarker::OutOfBandPresentEnd => 4,
        _ => 0,
    }
}

/// Start marker an end marker cannot be recorded without.
fn prerequisite(marker: LatencyMarker) -> Option<LatencyMarker> {
    match marker {
        LatencyMarker::RenderSubmitEnd
        | LatencyMarker::PresentStart
        | LatencyMarker::PresentEnd => Some(LatencyMarker::RenderSubmitStart),
        LatencyMarker::OutOfBandRenderSubmitEnd => Some(LatencyMarker::OutOfBandRenderSubmitStart),
        LatencyMarker::OutOfBandPresentEnd => Some(LatencyMarker::OutOfBandPresentStart),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct MarkerRow {
    id: FrameId,
    stamps: [Option<u64>; LatencyMarker::COUNT],
    state: RowState,
    /// Highest primary marker recorded
    primary: Option<LatencyMarker>,
    out_of_band: Option<LatencyMarker>,
    /// Id not yet matched to a presented frame
    provisional: bool,
}

impl MarkerRow {
    fn new(id: FrameId) -> Self {
        Self {
            id,
            stamps: [None; LatencyMarker::COUNT],
            state: RowState::Open,
            primary: None,
            out_of_band: None,
            provisional: false,
        }
    }

    fn generated(id: FrameId) -> Self {
        Self {
            state: RowState::Generated,
            ..Self::new(id)
        }
    }

    fn stamp(&self, marker: LatencyMarker) -> Option<u64> {
        self.stamps[marker.index()]
    }

    fn has(&self, marker: LatencyMarker) -> bool {
        self.stamp(marker).is_some()
    }

    /// Latest timestamp recorded on `channel`.
    fn last_on(&self, channel: MarkerChannel) -> Option<u64> {
        LatencyMarker::ALL
            .iter()
            .filter(|m| m.channel() == channel)
            .filter_map(|&m| self.stamp(m))
            .max()
    }

    /// Validate `marker` at `at` against this row without changing it.
    fn check(&self, marker: LatencyMarker, at: u64) -> Result<(), MarkerError> {
        let id = self.id;
        let channel = marker.channel();
        // only async work may land after the row retired
        if channel != MarkerChannel::OutOfBand && self.state != RowState::Open {
            return Err(MarkerError::Retired { id, marker });
        }
        if self.has(marker) {
            return Err(MarkerError::Duplicate { id, marker });
        }

        match channel {
            MarkerChannel::Primary => {
                if let Some(after) = self.primary {
                    // input may be sampled any time before simulation ends
                    let late_input = marker == LatencyMarker::InputSample
                        && after == LatencyMarker::SimulationStart;
                    if primary_rank(marker) <= primary_rank(after) && !late_input {
                        return Err(MarkerError::OutOfOrder { id, marker, after });
                    }
                }
            }
            MarkerChannel::OutOfBand => {
                if let Some(after) = self.out_of_band
                    && out_of_band_rank(marker) <= out_of_band_rank(after)
                {
                    return Err(MarkerError::OutOfOrder { id, marker, after });
                }
            }
            MarkerChannel::Auxiliary => {}
        }

        if let Some(requires) = prerequisite(marker)
            && !self.has(requires)
        {
            return Err(MarkerError::MissingPrerequisite {
                id,
                marker,
                requires,
            });
        }

        if channel != MarkerChannel::Auxiliary
            && let Some(last) = self.last_on(channel)
            && at < last
        {
            return Err(MarkerError::TimeWentBackwards { id, at, last });
        }
        Ok(())
    }

    fn apply(&mut self, marker: LatencyMarker, at: u64) {
        self.stamps[marker.index()] = Some(at);
        match marker.channel() {
            MarkerChannel::Primary if marker != LatencyMarker::InputSample => {
                self.primary = Some(marker);
            }
            MarkerChannel::Primary => {
                self.primary.get_or_insert(marker);
            }
            MarkerChannel::OutOfBand => self.out_of_band = Some(marker),
            MarkerChannel::Auxiliary => {}
        }
    }

    fn timings(&self) -> FrameTimings {
        let at = |m: LatencyMarker| self.stamp(m).unwrap_or(0);
        FrameTimings {
            present_id: self.id,
            input_sample_time_us: at(LatencyMarker::InputSample),
            sim_start_time_us: at(LatencyMarker::SimulationStart),
            sim_end_time_us: at(LatencyMarker::SimulationEnd),
            render_submit_start_time_us: at(LatencyMarker::RenderSubmitStart),
            render_submit_end_time_us: at(LatencyMarker::RenderSubmitEnd),
            present_start_time_us: at(LatencyMarker::PresentStart),
            present_end_time_us: at(LatencyMarker::PresentEnd),
            ..FrameTimings::default()
        }
    }
}

/// Counters and averages over every frame the tracker has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub frames_begun: u64,
    pub frames_completed: u64,
    /// Rows retired without `PresentEnd`
    pub frames_incomplete: u64,
    /// Rows added for presented generated frames
    pub frames_generated: u64,
    /// Markers rejected as invalid usage
    pub usage_errors: u64,
    /// EMA of simulation start to present end
    pub avg_latency_us: u64,
    /// EMA of present end to present end
    pub avg_present_interval_us: u64,
}

/// Row ring plus the counters derived from it.
pub struct LatencyMarkerTracker {
    rows: VecDeque<MarkerRow>,
    retention: usize,
    last_id: FrameId,
    pending_input: Option<u64>,
    last_present_end_us: Option<u64>,
    avg_latency: Option<f64>,
    avg_interval: Option<f64>,
    alpha: f64,
    stats: LatencyStats,
    link: Option<Arc<FrameIdSource>>,
}

impl LatencyMarkerTracker {
    pub fn new(retention: usize, ema_alpha: f32) -> Self {
        let retention = retention.max(1);
        Self {
            rows: VecDeque::with_capacity(retention),
            retention,
            last_id: 0,
            pending_input: None,
            last_present_end_us: None,
            avg_latency: None,
            avg_interval: None,
            alpha: f64::from(ema_alpha.clamp(0.01, 1.0)),
            stats: LatencyStats::default(),
            link: None,
        }
    }

    /// Id of the newest frame, 0 before the first `begin_frame`.
    pub fn current_id(&self) -> FrameId {
        self.last_id
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn state(&self, id: FrameId) -> Option<RowState> {
        self.row(id).map(|r| r.state)
    }

    pub fn stamp(&self, id: FrameId, marker: LatencyMarker) -> Option<u64> {
        self.row(id).and_then(|r| r.stamp(marker))
    }

    pub fn last_present_end_us(&self) -> Option<u64> {
        self.last_present_end_us
    }

    pub fn stats(&self) -> LatencyStats {
        self.stats
    }

    fn row(&self, id: FrameId) -> Option<&MarkerRow> {
        self.rows.iter().rev().find(|r| r.id == id)
    }

    /// Newest row begun through `begin_frame`.
    fn current_row(&self) -> Option<&MarkerRow> {
        self.rows.iter().rev().find(|r| r.state != RowState::Generated)
    }

    fn current_row_mut(&mut self) -> Option<&mut MarkerRow> {
        self.rows
            .iter_mut()
            .rev()
            .find(|r| r.state != RowState::Generated)
    }

    fn evict(&mut self) {
        while self.rows.len() > self.retention {
            self.rows.pop_front();
        }
    }

    // ------------------------------------------------------------------------
    // Presented ids
    // ------------------------------------------------------------------------

    /// Take row ids from `ids` from now on.
    pub fn link(&mut self, ids: Arc<FrameIdSource>) {
        self.unlink();
        ids.link(self.last_id);
        self.link = Some(ids);
    }

    /// Go back to counting ids locally, after the newest presented one.
    pub fn unlink(&mut self) {
        self.sync();
        if let Some(ids) = self.link.take() {
            ids.unlink();
            self.last_id = self.last_id.max(ids.last());
        }
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Bind every interval sequenced since the last call.
    pub fn sync(&mut self) {
        let Some(ids) = self.link.clone() else {
            return;
        };
        for interval in ids.take_unbound() {
            self.bind(interval);
        }
    }

    fn bind(&mut self, interval: IntervalIds) {
        if let Some(pos) = self.rows.iter().rposition(|r| r.provisional) {
            let floor = pos.checked_sub(1).map_or(0, |p| self.rows[p].id);
            let lowest = interval.generated.unwrap_or(interval.real);
            let row = &mut self.rows[pos];
            row.provisional = false;
            if row.id != interval.real {
                if lowest > floor {
                    tracing::debug!("Frame {} presented as {}", row.id, interval.real);
                    row.id = interval.real;
                } else {
                    tracing::debug!(
                        "Frame {} keeps its id, presented id {} is taken",
                        row.id,
                        interval.real
                    );
                }
            }
        }

        if let Some(generated) = interval.generated
            && self.row(generated).is_none()
        {
            let at = self
                .rows
                .iter()
                .position(|r| r.id > generated)
                .unwrap_or(self.rows.len());
            self.rows.insert(at, MarkerRow::generated(generated));
            self.stats.frames_generated += 1;
        }

        let newest = self.rows.iter().map(|r| r.id).max().unwrap_or(0);
        self.last_id = newest.max(interval.real);
        self.evict();
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    /// Start a new frame at `now_us` and record its `SimulationStart`.
    ///
    /// An open previous row is retired as incomplete.
    pub fn begin_frame(&mut self, now_us: u64) -> FrameId {
        self.begin_frame_expecting(now_us, false)
    }

    /// [`begin_frame`](Self::begin_frame) for a linked tracker that expects
    /// a generated frame to be presented ahead of this one. The id of that
    /// generated frame is left free.
    pub fn begin_frame_expecting(&mut self, now_us: u64, generated_ahead: bool) -> FrameId {
        self.sync();
        let link = self.link.clone();

        let prev = self
            .rows
            .iter_mut()
            .rev()
            .find(|r| r.state != RowState::Generated);
        if let Some(prev) = prev {
            if prev.state == RowState::Open {
                prev.state = RowState::Incomplete;
                self.stats.frames_incomplete += 1;
                tracing::debug!("Frame {} retired without PRESENT_END", prev.id);
            }
            // never submitted, its id stays used
            if prev.provisional {
                prev.provisional = false;
                if let Some(ids) = &link {
                    ids.advance_past(prev.id);
                }
            }
        }

        self.last_id = match &link {
            Some(ids) => self.last_id.max(ids.last()) + 1 + u64::from(generated_ahead),
            None => self.last_id + 1,
        };
        let mut row = MarkerRow::new(self.last_id);
        row.provisional = link.is_some();
        if let Some(input_us) = self.pending_input.take() {
            row.apply(LatencyMarker::InputSample, input_us.min(now_us));
        }
        row.apply(LatencyMarker::SimulationStart, now_us);

        self.rows.push_back(row);
        self.evict();
        self.stats.frames_begun += 1;
        self.last_id
    }

    /// Record an input sample for the open frame, or hold it for the next
    /// frame when the open one is already past simulation start.
    ///
    /// Returns the frame the sample landed on, `None` when it was held.
    pub fn input_sample(&mut self, now_us: u64) -> Option<FrameId> {
        if let Some(row) = self.current_row_mut()
            && row.check(LatencyMarker::InputSample, now_us).is_ok()
        {
            row.apply(LatencyMarker::InputSample, now_us);
            return Some(row.id);
        }
        self.pending_input = Some(now_us);
        None
    }

    /// Record `marker` on the newest frame and return that frame's id.
    pub fn record(&mut self, marker: LatencyMarker, now_us: u64) -> Result<FrameId, MarkerError> {
        match self.current_row().map(|r| r.id) {
            Some(id) => self.record_for(id, marker, now_us).map(|()| id),
            None => {
                self.stats.usage_errors += 1;
                Err(MarkerError::NoFrame)
            }
        }
    }

    /// Record `marker` on frame `id`. Rejected markers leave every row as it was.
    pub fn record_for(
        &mut self,
        id: FrameId,
        marker: LatencyMarker,
        now_us: u64,
    ) -> Result<(), MarkerError> {
        let result = self.try_record(id, marker, now_us);
        if let Err(err) = &result {
            self.stats.usage_errors += 1;
            tracing::debug!("Marker rejected: {}", err);
        }
        result
    }

    fn try_record(
        &mut self,
        id: FrameId,
        marker: LatencyMarker,
        now_us: u64,
    ) -> Result<(), MarkerError> {
        if marker == LatencyMarker::SimulationStart {
            return Err(MarkerError::FrameStart(marker));
        }
        let row = self
            .rows
            .iter_mut()
            .rev()
            .find(|r| r.id == id)
            .ok_or(MarkerError::UnknownFrame(id))?;

        row.check(marker, now_us)?;
        row.apply(marker, now_us);

        if marker == LatencyMarker::PresentEnd {
            row.state = RowState::Complete;
            let sim_start = row.stamp(LatencyMarker::SimulationStart);
            self.complete(sim_start, now_us);
        }
        Ok(())
    }

    fn complete(&mut self, sim_start_us: Option<u64>, present_end_us: u64) {
        self.stats.frames_completed += 1;

        if let Some(start) = sim_start_us {
            let latency = present_end_us.saturating_sub(start) as f64;
            self.avg_latency = Some(ema(self.avg_latency, latency, self.alpha));
            self.stats.avg_latency_us = self.avg_latency.unwrap_or(0.0).round() as u64;
        }
        if let Some(last) = self.last_present_end_us {
            let interval = present_end_us.saturating_sub(last) as f64;
            self.avg_interval = Some(ema(self.avg_interval, interval, self.alpha));
            self.stats.avg_present_interval_us = self.avg_interval.unwrap_or(0.0).round() as u64;
        }
        self.last_present_end_us = Some(present_end_us);
    }

    /// Up to `max` retired rows, oldest first, ending with the newest.
    pub fn timings(&self, max: usize) -> Vec<FrameTimings> {
        let retired: Vec<&MarkerRow> = self
            .rows
            .iter()
            .filter(|r| r.state != RowState::Open)
            .collect();
        let skip = retired.len().saturating_sub(max);
        retired[skip..].iter().map(|r| r.timings()).collect()
    }
}

fn ema(prev: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match prev {
        Some(avg) => avg + alpha * (sample - avg),
        None => sample,
    }
}
