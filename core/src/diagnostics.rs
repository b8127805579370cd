//! Diagnostic checkpoints (`VK_NV_device_diagnostic_checkpoints`).
//!
//! Checkpoints are recorded into command buffers and kept in a bounded log.
//! Once a command buffer is submitted its checkpoints move to the log of the
//! queue it went to. After a device loss, [`DiagnosticsContext::checkpoints`]
//! answers which checkpoints exist for a queue and, when the driver reports
//! them, the pipeline stage each one reached.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;
use nvvk_shared::{
    CheckpointTag, CommandBufferHandle, DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME,
    DiagnosticsConfigFlags, NvvkError, NvvkResult, QueueHandle,
};
use serde::Serialize;

use crate::config::DiagnosticsConfig;
use crate::device::{Capability, Device, SupportLatch};
use crate::error::DeviceError;

/// Marker values with this bit set carry a [`CheckpointTag`].
const TAG_BIT: u64 = 1 << 63;

// ============================================================================
// Driver port
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStage {
    TopOfPipe,
    BottomOfPipe,
    /// Raw `VkPipelineStageFlagBits` value
    Other(u32),
}

/// A checkpoint as reported by the driver for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCheckpoint {
    pub stage: PipelineStage,
    pub marker: u64,
}

pub trait CheckpointDriver: Send + Sync {
    fn set_checkpoint(&self, cmd: CommandBufferHandle, marker: u64) -> Result<(), DeviceError>;

    /// Checkpoints the driver last saw executing on `queue`.
    fn queue_checkpoints(&self, queue: QueueHandle) -> Result<Vec<DriverCheckpoint>, DeviceError>;
}

// ============================================================================
// Markers
// ============================================================================

/// What a checkpoint identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckpointMarker {
    Tag(CheckpointTag),
    /// Caller-supplied value, usually a pointer to its own marker data
    User(u64),
}

impl CheckpointMarker {
    pub fn encode(self) -> u64 {
        match self {
            Self::Tag(tag) => TAG_BIT | u64::from(tag.as_raw()),
            Self::User(value) => value,
        }
    }

    pub fn decode(raw: u64) -> Self {
        if raw & TAG_BIT != 0
            && let Ok(bits) = u32::try_from(raw & !TAG_BIT)
            && let Some(tag) = CheckpointTag::from_raw(bits)
        {
            return Self::Tag(tag);
        }
        Self::User(raw)
    }
}

/// One entry of a queue's checkpoint report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub marker: CheckpointMarker,
    /// Command buffer it was recorded into, when known
    pub command_buffer: Option<CommandBufferHandle>,
    /// Stage reached, when the driver reported it
    pub stage: Option<PipelineStage>,
}

// ============================================================================
// Log
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct LoggedCheckpoint {
    cmd: CommandBufferHandle,
    marker: u64,
}

#[derive(Debug, Default)]
struct CheckpointLog {
    recorded: HashMap<CommandBufferHandle, VecDeque<u64>>,
    /// Command buffers with unsubmitted checkpoints, oldest recording first
    pending: VecDeque<CommandBufferHandle>,
    queues: HashMap<QueueHandle, VecDeque<LoggedCheckpoint>>,
}

impl CheckpointLog {
    /// Ring for `cmd`, making room by dropping the longest-unsubmitted
    /// command buffer once `capacity` are pending.
    fn recording(&mut self, cmd: CommandBufferHandle, capacity: usize) -> &mut VecDeque<u64> {
        if !self.recorded.contains_key(&cmd) {
            while self.pending.len() >= capacity {
                let Some(stale) = self.pending.pop_front() else {
                    break;
                };
                self.recorded.remove(&stale);
                tracing::debug!("Dropped unsubmitted checkpoints of {:?}", stale);
            }
            self.pending.push_back(cmd);
        }
        self.recorded.entry(cmd).or_default()
    }

    fn take_recorded(&mut self, cmd: CommandBufferHandle) -> Option<VecDeque<u64>> {
        self.pending.retain(|pending| *pending != cmd);
        self.recorded.remove(&cmd)
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, value: T, capacity: usize) {
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(value);
}

// ============================================================================
// Context
// ============================================================================

pub struct DiagnosticsContext {
    driver: Capability<Arc<dyn CheckpointDriver>>,
    log: Mutex<CheckpointLog>,
    capacity: usize,
    config: DiagnosticsConfig,
    unsupported: SupportLatch,
}

impl DiagnosticsContext {
    pub fn init(device: Arc<dyn Device>, config: &DiagnosticsConfig) -> NvvkResult<Self> {
        let driver: Capability<Arc<dyn CheckpointDriver>> = device.checkpoints().into();
        if !driver.is_available() {
            tracing::warn!("{} unavailable", DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME);
        }
        tracing::info!(
            "Diagnostics context created: checkpoints={:?} preset={:?}",
            driver,
            config.preset
        );

        Ok(Self {
            driver,
            log: Mutex::new(CheckpointLog::default()),
            capacity: config.checkpoint_capacity.max(1),
            config: config.clone(),
            unsupported: SupportLatch::new(),
        })
    }

    pub fn destroy(self) {
        tracing::info!("Diagnostics context destroyed");
    }

    pub fn is_supported(&self) -> bool {
        self.driver.is_available()
    }

    /// Flags to chain into device creation for the configured preset.
    pub fn config_flags(&self) -> DiagnosticsConfigFlags {
        self.config.preset.flags()
    }

    fn log(&self) -> MutexGuard<'_, CheckpointLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a caller-defined checkpoint into `cmd`.
    pub fn set_checkpoint(&self, cmd: CommandBufferHandle, marker: u64) -> NvvkResult<()> {
        if marker & TAG_BIT != 0 {
            return Err(NvvkError::invalid_usage(format!(
                "checkpoint marker {marker:#x} uses the reserved tag bit"
            )));
        }
        self.record(cmd, CheckpointMarker::User(marker))
    }

    /// Record one of the predefined tags into `cmd`.
    pub fn set_tagged_checkpoint(&self, cmd: CommandBufferHandle, tag: CheckpointTag) -> NvvkResult<()> {
        self.record(cmd, CheckpointMarker::Tag(tag))
    }

    fn record(&self, cmd: CommandBufferHandle, marker: CheckpointMarker) -> NvvkResult<()> {
        if cmd.is_null() {
            return Err(NvvkError::invalid_usage("checkpoint into a null command buffer"));
        }
        let Some(driver) = self.driver.get() else {
            return self.unsupported.surface(DIAGNOSTIC_CHECKPOINTS_EXTENSION_NAME);
        };

        let raw = marker.encode();
        driver.set_checkpoint(cmd, raw)?;

        let mut log = self.log();
        let ring = log.recording(cmd, self.capacity);
        push_bounded(ring, raw, self.capacity);
        Ok(())
    }

    /// Forget unsubmitted checkpoints of `cmd`. Call when the command buffer
    /// is reset for re-recording.
    pub fn reset_command_buffer(&self, cmd: CommandBufferHandle) {
        if self.log().take_recorded(cmd).is_some() {
            tracing::debug!("Cleared recorded checkpoints of {:?}", cmd);
        }
    }

    /// Note that `cmd` was submitted to `queue`. Its recorded checkpoints
    /// move to that queue's log.
    pub fn record_submission(&self, cmd: CommandBufferHandle, queue: QueueHandle) -> NvvkResult<()> {
        if cmd.is_null() || queue.is_null() {
            return Err(NvvkError::invalid_usage("submission with a null handle"));
        }
        let mut log = self.log();
        let Some(markers) = log.take_recorded(cmd) else {
            return Ok(());
        };
        let ring = log.queues.entry(queue).or_default();
        for marker in markers {
            push_bounded(ring, LoggedCheckpoint { cmd, marker }, self.capacity);
        }
        Ok(())
    }

    /// Checkpoints known for `queue`, oldest first.
    ///
    /// Logged checkpoints are annotated with the stage the driver reports.
    /// When nothing was logged for the queue, the driver report is returned
    /// as is.
    pub fn checkpoints(&self, queue: QueueHandle) -> NvvkResult<Vec<Checkpoint>> {
        let reported = match self.driver.get() {
            Some(driver) => driver.queue_checkpoints(queue)?,
            None => Vec::new(),
        };

        let log = self.log();
        let logged = log.queues.get(&queue).filter(|ring| !ring.is_empty());
        let Some(logged) = logged else {
            return Ok(reported
                .iter()
                .map(|c| Checkpoint {
                    marker: CheckpointMarker::decode(c.marker),
                    command_buffer: None,
                    stage: Some(c.stage),
                })
                .collect());
        };

        Ok(logged
            .iter()
            .map(|entry| Checkpoint {
                marker: CheckpointMarker::decode(entry.marker),
                command_buffer: Some(entry.cmd),
                stage: reported
                    .iter()
                    .rev()
                    .find(|c| c.marker == entry.marker)
                    .map(|c| c.stage),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessConfig, HeadlessDevice};
    use nvvk_shared::{DiagnosticsPreset, ResultCode};

    const CMD: CommandBufferHandle = CommandBufferHandle::from_raw(0xc0);
    const QUEUE: QueueHandle = QueueHandle::from_raw(0x90);

    fn context(config: HeadlessConfig) -> DiagnosticsContext {
        let device = Arc::new(HeadlessDevice::new(config));
        DiagnosticsContext::init(device, &DiagnosticsConfig::default()).unwrap()
    }

    #[test]
    fn test_marker_encoding() {
        let tag = CheckpointMarker::Tag(CheckpointTag::DrawEnd);
        assert_eq!(CheckpointMarker::decode(tag.encode()), tag);
        assert_eq!(CheckpointMarker::decode(0x2001), CheckpointMarker::User(0x2001));
        // tag bit with an unknown value stays a user marker
        assert_eq!(
            CheckpointMarker::decode(TAG_BIT | 7),
            CheckpointMarker::User(TAG_BIT | 7)
        );
    }

    #[test]
    fn test_submitted_checkpoints_reported_per_queue() {
        let diag = context(HeadlessConfig::default());
        diag.set_tagged_checkpoint(CMD, CheckpointTag::FrameStart).unwrap();
        diag.set_checkpoint(CMD, 0xdead).unwrap();
        diag.record_submission(CMD, QUEUE).unwrap();

        let checkpoints = diag.checkpoints(QUEUE).unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].marker, CheckpointMarker::Tag(CheckpointTag::FrameStart));
        assert_eq!(checkpoints[0].command_buffer, Some(CMD));
        assert_eq!(checkpoints[1].marker, CheckpointMarker::User(0xdead));
        assert_eq!(checkpoints[1].stage, Some(PipelineStage::BottomOfPipe));
    }

    #[test]
    fn test_driver_report_used_without_log() {
        let diag = context(HeadlessConfig::default());
        diag.set_tagged_checkpoint(CMD, CheckpointTag::ComputeEnd).unwrap();

        let checkpoints = diag.checkpoints(QUEUE).unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].command_buffer, None);
        assert_eq!(checkpoints[0].marker, CheckpointMarker::Tag(CheckpointTag::ComputeEnd));
    }

    #[test]
    fn test_log_is_bounded() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let config = DiagnosticsConfig {
            checkpoint_capacity: 2,
            ..DiagnosticsConfig::default()
        };
        let diag = DiagnosticsContext::init(device, &config).unwrap();
        for marker in 1..=5 {
            diag.set_checkpoint(CMD, marker).unwrap();
        }
        diag.record_submission(CMD, QUEUE).unwrap();

        let markers: Vec<_> = diag
            .checkpoints(QUEUE)
            .unwrap()
            .iter()
            .map(|c| c.marker)
            .collect();
        assert_eq!(markers, vec![CheckpointMarker::User(4), CheckpointMarker::User(5)]);
    }

    #[test]
    fn test_reset_command_buffer_drops_old_recording() {
        let diag = context(HeadlessConfig::default());
        diag.set_checkpoint(CMD, 1).unwrap();
        diag.reset_command_buffer(CMD);
        diag.set_checkpoint(CMD, 2).unwrap();
        diag.record_submission(CMD, QUEUE).unwrap();

        let markers: Vec<_> = diag
            .checkpoints(QUEUE)
            .unwrap()
            .iter()
            .map(|c| c.marker)
            .collect();
        assert_eq!(markers, vec![CheckpointMarker::User(2)]);
    }

    #[test]
    fn test_unsubmitted_command_buffers_are_bounded() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let config = DiagnosticsConfig {
            checkpoint_capacity: 2,
            ..DiagnosticsConfig::default()
        };
        let diag = DiagnosticsContext::init(device, &config).unwrap();
        for raw in 1..=4u64 {
            diag.set_checkpoint(CommandBufferHandle::from_raw(0x100 + raw), raw)
                .unwrap();
        }
        assert_eq!(diag.log().recorded.len(), 2);

        // the oldest recordings were dropped
        diag.record_submission(CommandBufferHandle::from_raw(0x101), QUEUE)
            .unwrap();
        assert!(diag.log().queues.get(&QUEUE).is_none());
        diag.record_submission(CommandBufferHandle::from_raw(0x104), QUEUE)
            .unwrap();
        assert_eq!(diag.log().queues[&QUEUE].len(), 1);
        assert_eq!(diag.log().pending.len(), 1);
    }

    #[test]
    fn test_invalid_usage() {
        let diag = context(HeadlessConfig::default());
        let err = diag.set_checkpoint(CommandBufferHandle::NULL, 1).unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidHandle);
        assert!(diag.set_checkpoint(CMD, TAG_BIT | 1).is_err());
        assert!(diag.record_submission(CMD, QueueHandle::NULL).is_err());
    }

    #[test]
    fn test_unsupported_reports_once() {
        let diag = context(HeadlessConfig {
            checkpoints: false,
            ..HeadlessConfig::default()
        });
        assert!(!diag.is_supported());
        let first = diag.set_checkpoint(CMD, 1);
        assert_eq!(ResultCode::of(&first), ResultCode::NotSupported);
        assert!(diag.set_checkpoint(CMD, 2).is_ok());
        assert!(diag.checkpoints(QUEUE).unwrap().is_empty());
    }

    #[test]
    fn test_checkpoints_queryable_after_device_loss() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let diag = DiagnosticsContext::init(device.clone(), &DiagnosticsConfig::default()).unwrap();
        diag.set_tagged_checkpoint(CMD, CheckpointTag::DrawStart).unwrap();
        diag.record_submission(CMD, QUEUE).unwrap();
        device.lose_device();

        assert!(diag.set_checkpoint(CMD, 9).unwrap_err().is_device_lost());
        assert_eq!(diag.checkpoints(QUEUE).unwrap().len(), 1);
    }

    #[test]
    fn test_config_flags_follow_preset() {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let config = DiagnosticsConfig {
            preset: DiagnosticsPreset::Full,
            ..DiagnosticsConfig::default()
        };
        let diag = DiagnosticsContext::init(device, &config).unwrap();
        assert_eq!(diag.config_flags(), nvvk_shared::full_config_flags());
    }
}
