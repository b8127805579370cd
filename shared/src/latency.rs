//! Latency marker and frame timing types.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Timing markers a frame passes through (`NvvkLatencyMarker`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LatencyMarker {
    SimulationStart = 0,
    SimulationEnd = 1,
    RenderSubmitStart = 2,
    RenderSubmitEnd = 3,
    PresentStart = 4,
    PresentEnd = 5,
    InputSample = 6,
    TriggerFlash = 7,
    OutOfBandRenderSubmitStart = 8,
    OutOfBandRenderSubmitEnd = 9,
    OutOfBandPresentStart = 10,
    OutOfBandPresentEnd = 11,
}

/// Which ordering channel a marker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerChannel {
    /// Simulation → render submit → present
    Primary,
    /// Asynchronous-compute submission path of the same frame
    OutOfBand,
    /// Unordered annotations (trigger flash)
    Auxiliary,
}

impl LatencyMarker {
    /// Number of marker kinds.
    pub const COUNT: usize = 12;

    /// Every marker in discriminant order.
    pub const ALL: [LatencyMarker; Self::COUNT] = [
        Self::SimulationStart,
        Self::SimulationEnd,
        Self::RenderSubmitStart,
        Self::RenderSubmitEnd,
        Self::PresentStart,
        Self::PresentEnd,
        Self::InputSample,
        Self::TriggerFlash,
        Self::OutOfBandRenderSubmitStart,
        Self::OutOfBandRenderSubmitEnd,
        Self::OutOfBandPresentStart,
        Self::OutOfBandPresentEnd,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Index into per-frame timestamp tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn channel(self) -> MarkerChannel {
        match self {
            Self::OutOfBandRenderSubmitStart
            | Self::OutOfBandRenderSubmitEnd
            | Self::OutOfBandPresentStart
            | Self::OutOfBandPresentEnd => MarkerChannel::OutOfBand,
            Self::TriggerFlash => MarkerChannel::Auxiliary,
            _ => MarkerChannel::Primary,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SimulationStart => "SIMULATION_START",
            Self::SimulationEnd => "SIMULATION_END",
            Self::RenderSubmitStart => "RENDERSUBMIT_START",
            Self::RenderSubmitEnd => "RENDERSUBMIT_END",
            Self::PresentStart => "PRESENT_START",
            Self::PresentEnd => "PRESENT_END",
            Self::InputSample => "INPUT_SAMPLE",
            Self::TriggerFlash => "TRIGGER_FLASH",
            Self::OutOfBandRenderSubmitStart => "OUT_OF_BAND_RENDERSUBMIT_START",
            Self::OutOfBandRenderSubmitEnd => "OUT_OF_BAND_RENDERSUBMIT_END",
            Self::OutOfBandPresentStart => "OUT_OF_BAND_PRESENT_START",
            Self::OutOfBandPresentEnd => "OUT_OF_BAND_PRESENT_END",
        }
    }
}

impl std::fmt::Display for LatencyMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-frame timing report (`NvvkFrameTimings`).
///
/// All timestamps are microseconds on the context clock; zero means the
/// marker was never recorded for this frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct FrameTimings {
    pub present_id: u64,
    pub input_sample_time_us: u64,
    pub sim_start_time_us: u64,
    pub sim_end_time_us: u64,
    pub render_submit_start_time_us: u64,
    pub render_submit_end_time_us: u64,
    pub present_start_time_us: u64,
    pub present_end_time_us: u64,
    pub driver_start_time_us: u64,
    pub driver_end_time_us: u64,
    pub gpu_render_start_time_us: u64,
    pub gpu_render_end_time_us: u64,
}

impl FrameTimings {
    /// Simulation start to present end, if both were recorded.
    pub fn total_latency_us(&self) -> Option<u64> {
        if self.sim_start_time_us == 0 || self.present_end_time_us == 0 {
            return None;
        }
        self.present_end_time_us.checked_sub(self.sim_start_time_us)
    }
}
