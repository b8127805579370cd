//! Pacing and Marker Tests (frame loop with both contexts)

use nvvk_shared::{
    CheckpointTag, CommandBufferHandle, FrameGenMode, FrameId, FrameTimings, LatencyMarker,
    QueueHandle, ResultCode,
};

use crate::clock::Clock;
use crate::config::DiagnosticsConfig;
use crate::device::HeadlessConfig;
use crate::diagnostics::{CheckpointMarker, DiagnosticsContext};
use crate::frame_gen::{IntervalPresentation, RealFrame};
use crate::low_latency::{LowLatencyContext, SleepReport};
use crate::test_utils::real_frame;

use super::test_utils::*;

/// One iteration of a paced frame loop. The real frame is submitted for
/// generation between render submit start and end.
fn paced_frame(
    rig: &mut Rig,
    ll: &mut LowLatencyContext,
    n: u64,
) -> (IntervalPresentation, SleepReport) {
    ll.begin_frame().unwrap();
    ll.mark_input_sample().unwrap();
    rig.clock.advance(2_000);
    ll.end_simulation().unwrap();
    ll.begin_render_submit().unwrap();
    let presentation = rig
        .frame_gen
        .submit_frame(real_frame(n, rig.clock.now_us()))
        .unwrap();
    ll.end_render_submit().unwrap();
    ll.begin_present().unwrap();
    rig.clock.advance(500);
    ll.end_present().unwrap();
    let report = ll.sleep(SEMAPHORE, n).unwrap();
    (presentation, report)
}

// =============================================================
// Latency compensation
// =============================================================

#[test]
fn test_compensation_zero_when_off_or_disabled() {
    let mut rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Performance);
    rig.push(1);
    rig.push(2);
    assert!(rig.frame_gen.get_latency_compensation() > 0);

    rig.frame_gen.set_mode(FrameGenMode::Off);
    assert_eq!(rig.frame_gen.get_latency_compensation(), 0);

    rig.frame_gen.set_mode(FrameGenMode::Performance);
    rig.frame_gen.set_enabled(false);
    assert_eq!(rig.frame_gen.get_latency_compensation(), 0);
}

#[test]
fn test_compensation_tracks_generation_time() {
    let compensation = |cost_us: u64| {
        let config = HeadlessConfig {
            compose_cost_us: cost_us,
            ..HeadlessConfig::default()
        };
        let mut rig = Rig::new(config, FrameGenMode::Balanced);
        for n in 1..=6 {
            rig.push(n);
        }
        let stats = rig.frame_gen.get_stats();
        assert_eq!(stats.avg_gen_time_us, cost_us);
        assert_eq!(stats.avg_real_interval_us, FRAME_US);
        rig.frame_gen.get_latency_compensation()
    };

    let cheap = compensation(500);
    let expensive = compensation(2_500);
    assert_eq!(cheap, 500 + FRAME_US / 2);
    assert_eq!(expensive - cheap, 2_000);
}

// =============================================================
// Paced loop
// =============================================================

#[test]
fn test_sleep_folds_compensation_only_after_generated_interval() {
    let config = HeadlessConfig {
        compose_cost_us: 1_000,
        ..HeadlessConfig::default()
    };
    let mut rig = Rig::new(config, FrameGenMode::Performance);
    let mut ll = rig.low_latency();
    ll.attach_frame_generation(rig.frame_gen.handle());
    ll.enable(false, 16_000).unwrap();

    // first real frame has nothing to interpolate against
    let (p, report) = paced_frame(&mut rig, &mut ll, 1);
    assert_eq!(p.len(), 1);
    assert_eq!(report.compensation_us, 0);

    let (p, report) = paced_frame(&mut rig, &mut ll, 2);
    assert_eq!(p.len(), 2);
    assert!(report.compensation_us > 0);
    assert_eq!(report.compensation_us, ll.get_latency_compensation());

    rig.frame_gen.set_enabled(false);
    let (p, report) = paced_frame(&mut rig, &mut ll, 3);
    assert_eq!(p.len(), 1);
    assert_eq!(report.compensation_us, 0);
    assert_eq!(ll.get_latency_compensation(), 0);

    ll.detach_frame_generation();
    rig.frame_gen.set_enabled(true);
    let (_, report) = paced_frame(&mut rig, &mut ll, 4);
    assert_eq!(report.compensation_us, 0);
}

/// One frame with markers around submission. Returns the id `begin_frame`
/// handed out and what frame generation presented.
fn marked_frame(
    rig: &mut Rig,
    ll: &mut LowLatencyContext,
    frame: RealFrame,
) -> (FrameId, IntervalPresentation) {
    let id = ll.begin_frame().unwrap();
    rig.clock.advance(2_000);
    ll.begin_render_submit().unwrap();
    let presentation = rig.frame_gen.submit_frame(frame).unwrap();
    ll.end_render_submit().unwrap();
    ll.begin_present().unwrap();
    ll.end_present().unwrap();
    rig.clock.advance(FRAME_US - 2_000);
    (id, presentation)
}

#[test]
fn test_marker_rows_share_presented_ids() {
    let mut rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Performance);
    let mut ll = rig.low_latency();
    ll.attach_frame_generation(rig.frame_gen.handle());

    let mut presented = Vec::new();
    for n in 1..=4 {
        let frame = real_frame(n, rig.clock.now_us() + 2_000);
        let (id, p) = marked_frame(&mut rig, &mut ll, frame);
        assert_eq!(id, p.real().id);
        assert_eq!(ll.get_current_frame_id(), p.real().id);
        assert_eq!(n > 1, p.generated_slot().is_some());
        presented.extend(p.frames().iter().map(|f| f.id));
    }
    assert_eq!(presented, vec![1, 2, 3, 4, 5, 6, 7]);

    // a row per presented frame, generated ones included
    let rows: Vec<FrameId> = ll.timings(16).unwrap().iter().map(|r| r.present_id).collect();
    assert_eq!(rows, presented);
    assert_eq!(ll.stats().frames_generated, 3);
    assert_eq!(ll.stats().frames_completed, 4);

    for (id, marker) in rig.device.driver_markers() {
        assert!(id % 2 == 1, "{marker} forwarded for generated frame {id}");
    }
}

#[test]
fn test_scene_cut_keeps_marker_ids_gapless() {
    let mut rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Quality);
    let mut ll = rig.low_latency();
    ll.attach_frame_generation(rig.frame_gen.handle());

    let mut ids = Vec::new();
    for (n, color) in [(1, dark()), (2, dark()), (3, bright()), (4, bright())] {
        let frame = real_frame(n, rig.clock.now_us() + 2_000).with_color_stats(color);
        let (_, p) = marked_frame(&mut rig, &mut ll, frame);
        assert_eq!(ll.get_current_frame_id(), p.real().id);
        ids.extend(p.frames().iter().map(|f| f.id));
    }
    // the cut at frame 3 presented no generated frame
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

    let rows: Vec<FrameId> = ll.timings(16).unwrap().iter().map(|r| r.present_id).collect();
    assert_eq!(rows, ids);
    let cut = ll.timings(16).unwrap()[3];
    assert_eq!(cut.present_id, 4);
    assert!(cut.present_end_time_us > 0);
}

#[test]
fn test_detached_ids_continue_after_presented() {
    let mut rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Performance);
    let mut ll = rig.low_latency();
    ll.attach_frame_generation(rig.frame_gen.handle());
    for n in 1..=2 {
        let frame = real_frame(n, rig.clock.now_us() + 2_000);
        marked_frame(&mut rig, &mut ll, frame);
    }
    assert_eq!(rig.frame_gen.get_current_frame_id(), 3);

    ll.detach_frame_generation();
    assert_eq!(ll.begin_frame().unwrap(), 4);
}

#[test]
fn test_paced_loop_holds_min_interval() {
    let mut rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Off);
    let mut ll = rig.low_latency();
    ll.enable(true, 16_000).unwrap();

    for n in 1..=8 {
        paced_frame(&mut rig, &mut ll, n);
    }

    let rows = ll.timings(64).unwrap();
    assert_eq!(rows.len(), 8);
    for pair in rows.windows(2) {
        let interval = pair[1].present_end_time_us - pair[0].present_end_time_us;
        assert_eq!(interval, 16_000);
    }
    let stats = ll.stats();
    assert_eq!(stats.frames_completed, 8);
    assert_eq!(stats.avg_latency_us, 2_500);
    assert_eq!(rig.device.signals().len(), 8);
    assert!(rows.iter().all(|r| r.input_sample_time_us >= r.sim_start_time_us));
}

// =============================================================
// Marker state machine
// =============================================================

#[test]
fn test_present_end_before_render_submit_rejected() {
    let rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Off);
    let mut ll = rig.low_latency();

    let id = ll.begin_frame().unwrap();
    let err = ll.set_marker(LatencyMarker::PresentEnd).unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidHandle);

    // the row is untouched and other frames are unaffected
    ll.set_marker(LatencyMarker::RenderSubmitStart).unwrap();
    ll.set_marker(LatencyMarker::PresentEnd).unwrap();
    let next = ll.begin_frame().unwrap();
    assert_eq!(next, id + 1);
    assert_eq!(ll.stats().usage_errors, 1);
    assert_eq!(ll.stats().frames_completed, 1);
}

#[test]
fn test_begin_frame_twice_counts_incomplete() {
    let rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Off);
    let mut ll = rig.low_latency();

    let first = ll.begin_frame().unwrap();
    rig.clock.advance(1_000);
    let second = ll.begin_frame().unwrap();
    assert_eq!(second, first + 1);
    assert_eq!(ll.get_current_frame_id(), second);

    let stats = ll.stats();
    assert_eq!(stats.frames_incomplete, 1);
    assert_eq!(stats.usage_errors, 0);

    // the incomplete row is reported with its missing markers zeroed
    let mut out = [FrameTimings::default(); 4];
    assert_eq!(ll.get_timings(&mut out).unwrap(), 1);
    assert_eq!(out[0].present_id, first);
    assert_eq!(out[0].present_end_time_us, 0);
}

#[test]
fn test_out_of_band_markers_for_previous_frame() {
    let rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Off);
    let mut ll = rig.low_latency();

    let first = ll.begin_frame().unwrap();
    ll.set_marker(LatencyMarker::OutOfBandRenderSubmitStart).unwrap();
    ll.begin_render_submit().unwrap();
    ll.end_present().unwrap();
    ll.begin_frame().unwrap();

    // async work of the first frame finishes after the second began
    rig.clock.advance(700);
    ll.set_marker_for(first, LatencyMarker::OutOfBandRenderSubmitEnd).unwrap();
    assert!(ll.set_marker_for(first, LatencyMarker::PresentStart).is_err());

    let rows = ll.reader().timings(4).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].present_id, first);
    assert_eq!(ll.stats().usage_errors, 1);
    assert_eq!(ll.stats().frames_incomplete, 0);
}

// =============================================================
// Device loss
// =============================================================

#[test]
fn test_device_loss_terminal_everywhere_but_checkpoints_remain() {
    let mut rig = Rig::new(HeadlessConfig::default(), FrameGenMode::Quality);
    let mut ll = rig.low_latency();
    let diag = DiagnosticsContext::init(rig.device.clone(), &DiagnosticsConfig::default()).unwrap();
    let cmd = CommandBufferHandle::from_raw(0xc1);
    let queue = QueueHandle::from_raw(0x71);

    diag.set_tagged_checkpoint(cmd, CheckpointTag::FrameStart).unwrap();
    paced_frame(&mut rig, &mut ll, 1);
    diag.set_tagged_checkpoint(cmd, CheckpointTag::DrawStart).unwrap();
    diag.record_submission(cmd, queue).unwrap();

    rig.device.lose_device();
    let err = rig.frame_gen.submit_frame(real_frame(2, 40_000)).unwrap_err();
    assert!(err.is_device_lost());
    let err = rig.frame_gen.submit_frame(real_frame(3, 56_000)).unwrap_err();
    assert!(err.is_device_lost());
    assert!(ll.begin_frame().unwrap_err().is_device_lost());
    assert!(ll.sleep(SEMAPHORE, 9).unwrap_err().is_device_lost());

    // post-mortem: the checkpoint log still answers for the queue
    let markers: Vec<_> = diag
        .checkpoints(queue)
        .unwrap()
        .iter()
        .map(|c| c.marker)
        .collect();
    assert_eq!(
        markers,
        vec![
            CheckpointMarker::Tag(CheckpointTag::FrameStart),
            CheckpointMarker::Tag(CheckpointTag::DrawStart)
        ]
    );

    // every context stays destroyable
    rig.frame_gen.destroy();
    ll.destroy();
    diag.destroy();
    assert_eq!(rig.device.live_images(), 0);
}
