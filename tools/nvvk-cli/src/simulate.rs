//! Simulate command - headless frame loop through both contexts
//!
//! Each iteration walks one frame through the marker sequence a renderer
//! would emit, submits a real frame for generation between render submit
//! start and end, and ends with a pacing sleep. The loop runs on a virtual
//! clock unless `--realtime` is given, so results are reproducible.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use nvvk_core::frame_gen::ColorStats;
use nvvk_core::{
    Clock, FrameGenContext, FrameGenStats, HeadlessConfig, HeadlessDevice, IntervalOutcome,
    LatencyStats, LowLatencyContext, PresentedKind, RealFrame, SkipReason, SystemClock,
};
use nvvk_shared::{FrameGenMode, FrameTimings, ImageHandle, SemaphoreHandle, SwapchainHandle};

const SWAPCHAIN: SwapchainHandle = SwapchainHandle::from_raw(0x5ca1_0001);
const SEMAPHORE: SemaphoreHandle = SemaphoreHandle::from_raw(0x5e4a_0001);

/// Arguments for the simulate command
#[derive(Args, Clone)]
pub struct SimulateArgs {
    /// Real frames to submit
    #[arg(short = 'n', long, default_value_t = 120)]
    pub frames: u64,

    /// Frame generation mode (off, performance, balanced, quality)
    #[arg(short, long, default_value_t = FrameGenMode::Performance)]
    pub mode: FrameGenMode,

    /// Switch to a different scene at this real frame
    #[arg(long)]
    pub scene_cut: Option<u64>,

    /// Minimum real frame interval for pacing, in microseconds
    #[arg(long, default_value_t = 16_666)]
    pub min_interval_us: u32,

    /// Ask the driver for boosted clocks
    #[arg(long)]
    pub boost: bool,

    /// Leave pacing disabled (sleeps return immediately)
    #[arg(long)]
    pub no_pacing: bool,

    /// Simulation time per frame, in microseconds
    #[arg(long, default_value_t = 4_000)]
    pub sim_us: u64,

    /// Render submission time per frame, in microseconds
    #[arg(long, default_value_t = 1_500)]
    pub render_us: u64,

    /// Present call time per frame, in microseconds
    #[arg(long, default_value_t = 500)]
    pub present_us: u64,

    /// Cost of composing one generated frame, in microseconds
    #[arg(long, default_value_t = 1_000)]
    pub compose_cost_us: u64,

    #[arg(long, default_value_t = 640)]
    pub width: u32,

    #[arg(long, default_value_t = 360)]
    pub height: u32,

    /// Number of latency timing rows to report
    #[arg(long, default_value_t = 8)]
    pub timings: usize,

    /// Run on the wall clock and actually sleep
    #[arg(long)]
    pub realtime: bool,

    /// Read this config file instead of the platform config path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// Virtual clock
// ============================================================================

/// Clock that never blocks: sleeping jumps straight to the deadline.
#[derive(Debug, Default)]
struct VirtualClock {
    now: AtomicU64,
}

impl Clock for VirtualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    fn sleep_until(&self, deadline_us: u64) {
        self.now.fetch_max(deadline_us, Ordering::AcqRel);
    }
}

/// Spends simulated work time on whichever clock the loop runs on.
struct Timeline {
    clock: Arc<dyn Clock>,
}

impl Timeline {
    fn spend(&self, us: u64) {
        let now = self.clock.now_us();
        self.clock.sleep_until(now + us);
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of a simulated run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub mode: FrameGenMode,
    pub real_frames: u64,
    pub presented_frames: u64,
    pub generated_presented: u64,
    /// Real frames whose interval was skipped as a scene change
    pub scene_cuts: Vec<u64>,
    pub low_confidence_skips: u64,
    pub frame_gen: FrameGenStats,
    pub latency: LatencyStats,
    pub total_slept_us: u64,
    pub max_compensation_us: u64,
    pub elapsed_us: u64,
    /// Most recent completed frames, oldest first
    pub timings: Vec<FrameTimings>,
}

/// Execute the simulate command
pub fn execute(args: SimulateArgs) -> Result<()> {
    let config = crate::config::effective_config(args.config.as_deref())?;
    let clock: Arc<dyn Clock> = if args.realtime {
        Arc::new(SystemClock::new())
    } else {
        Arc::new(VirtualClock::default())
    };

    tracing::info!(
        "Simulating {} frames at {}x{} in {} mode",
        args.frames,
        args.width,
        args.height,
        args.mode
    );

    let report = run(&args, &config, clock)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Drive the frame loop and collect the report.
pub fn run(
    args: &SimulateArgs,
    config: &nvvk_core::NvvkConfig,
    clock: Arc<dyn Clock>,
) -> Result<Report> {
    let headless = HeadlessConfig {
        compose_cost_us: args.compose_cost_us,
        ..HeadlessConfig::default()
    };
    let device = Arc::new(HeadlessDevice::with_clock(headless, clock.clone()));
    let timeline = Timeline {
        clock: clock.clone(),
    };

    let mut frame_gen =
        FrameGenContext::with_config(device.clone(), args.width, args.height, args.mode, config)
            .context("failed to create frame generation context")?;
    let mut low_latency = LowLatencyContext::with_config(device.clone(), SWAPCHAIN, config)
        .context("failed to create low-latency context")?;
    low_latency.attach_frame_generation(frame_gen.handle());
    if !args.no_pacing {
        low_latency.enable(args.boost, args.min_interval_us)?;
    }

    let before = ColorStats::from_luma(&[16, 24, 32, 40])?;
    let after = ColorStats::from_luma(&[200, 220, 235, 250])?;

    let started = clock.now_us();
    let mut presented_frames = 0;
    let mut generated_presented = 0;
    let mut low_confidence_skips = 0;
    let mut scene_cuts = Vec::new();
    let mut total_slept_us = 0;
    let mut max_compensation_us = 0;

    for n in 1..=args.frames {
        low_latency.begin_frame()?;
        low_latency.mark_input_sample()?;
        timeline.spend(args.sim_us);
        low_latency.end_simulation()?;

        low_latency.begin_render_submit()?;
        timeline.spend(args.render_us);
        let color = match args.scene_cut {
            Some(cut) if n >= cut => after,
            _ => before,
        };
        let frame = RealFrame::new(ImageHandle::new(0x1_0000 + n, 0x2_0000 + n))
            .with_timestamp(clock.now_us())
            .with_color_stats(color);
        let presentation = frame_gen.submit_frame(frame)?;
        low_latency.end_render_submit()?;

        presented_frames += presentation.len() as u64;
        generated_presented += presentation
            .frames()
            .iter()
            .filter(|f| f.kind == PresentedKind::Generated)
            .count() as u64;
        match presentation.outcome {
            IntervalOutcome::Skipped(SkipReason::SceneChange) => {
                tracing::debug!("Frame {}: scene change", n);
                scene_cuts.push(n);
            }
            IntervalOutcome::Skipped(SkipReason::LowConfidence) => low_confidence_skips += 1,
            _ => {}
        }

        low_latency.begin_present()?;
        timeline.spend(args.present_us);
        low_latency.end_present()?;

        let sleep = low_latency.sleep(SEMAPHORE, n)?;
        total_slept_us += sleep.slept_us;
        max_compensation_us = max_compensation_us.max(sleep.compensation_us);
    }

    let report = Report {
        mode: args.mode,
        real_frames: args.frames,
        presented_frames,
        generated_presented,
        scene_cuts,
        low_confidence_skips,
        frame_gen: frame_gen.get_stats(),
        latency: low_latency.stats(),
        total_slept_us,
        max_compensation_us,
        elapsed_us: clock.now_us() - started,
        timings: low_latency.timings(args.timings)?,
    };

    low_latency.destroy();
    frame_gen.destroy();
    Ok(report)
}

fn ms(us: u64) -> f64 {
    us as f64 / 1000.0
}

fn print_report(report: &Report) {
    println!("Mode:                {}", report.mode);
    println!(
        "Frames:              {} real, {} presented ({} generated)",
        report.real_frames, report.presented_frames, report.generated_presented
    );
    if !report.scene_cuts.is_empty() {
        println!("Scene cuts at:       {:?}", report.scene_cuts);
    }
    if report.low_confidence_skips > 0 {
        println!("Low confidence:      {} skipped", report.low_confidence_skips);
    }
    println!();

    let fg = &report.frame_gen;
    println!("Frame generation");
    println!("  avg gen time:      {:.2} ms", ms(fg.avg_gen_time_us));
    println!("  confidence:        {:.3}", fg.confidence);
    println!("  skipped:           {}", fg.skipped_frames);
    println!("  budget overruns:   {}", fg.budget_overruns);
    println!("  real interval:     {:.2} ms", ms(fg.avg_real_interval_us));
    println!();

    let ll = &report.latency;
    println!("Low latency");
    println!(
        "  frames:            {} completed, {} incomplete, {} generated",
        ll.frames_completed, ll.frames_incomplete, ll.frames_generated
    );
    println!("  avg latency:       {:.2} ms", ms(ll.avg_latency_us));
    println!("  present interval:  {:.2} ms", ms(ll.avg_present_interval_us));
    println!("  slept:             {:.2} ms", ms(report.total_slept_us));
    println!("  max compensation:  {:.2} ms", ms(report.max_compensation_us));
    println!("  elapsed:           {:.2} ms", ms(report.elapsed_us));

    if report.timings.is_empty() {
        return;
    }
    println!();
    println!(
        "  {:>8} {:>10} {:>10} {:>10} {:>10}",
        "present", "sim", "submit", "present", "total"
    );
    for t in &report.timings {
        // generated frames carry no markers of their own
        if t.sim_start_time_us == 0 && t.present_end_time_us == 0 {
            println!("  {:>8} {:>10}", t.present_id, "generated");
            continue;
        }
        let sim = t.sim_end_time_us.saturating_sub(t.sim_start_time_us);
        let submit = t
            .render_submit_end_time_us
            .saturating_sub(t.render_submit_start_time_us);
        let present = t.present_end_time_us.saturating_sub(t.present_start_time_us);
        let total = t.total_latency_us().unwrap_or(0);
        println!(
            "  {:>8} {:>9.2}m {:>9.2}m {:>9.2}m {:>9.2}m",
            t.present_id,
            ms(sim),
            ms(submit),
            ms(present),
            ms(total)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use nvvk_core::NvvkConfig;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: SimulateArgs,
    }

    fn args(extra: &[&str]) -> SimulateArgs {
        let mut argv = vec!["nvvk", "--width", "64", "--height", "64"];
        argv.extend_from_slice(extra);
        TestCli::parse_from(argv).args
    }

    fn simulate(extra: &[&str]) -> Report {
        run(
            &args(extra),
            &NvvkConfig::default(),
            Arc::new(VirtualClock::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_mode_parses_from_name() {
        assert_eq!(args(&["--mode", "quality"]).mode, FrameGenMode::Quality);
        assert!(TestCli::try_parse_from(["nvvk", "--mode", "ultra"]).is_err());
    }

    #[test]
    fn test_off_presents_only_real_frames_at_min_interval() {
        let report = simulate(&["--frames", "12", "--mode", "off"]);
        assert_eq!(report.presented_frames, 12);
        assert_eq!(report.generated_presented, 0);
        assert_eq!(report.latency.frames_completed, 12);
        assert_eq!(report.latency.avg_latency_us, 6_000);
        assert_eq!(report.max_compensation_us, 0);

        assert_eq!(report.timings.len(), 8);
        for pair in report.timings.windows(2) {
            let interval = pair[1].present_end_time_us - pair[0].present_end_time_us;
            assert_eq!(interval, 16_666);
        }
    }

    #[test]
    fn test_generation_doubles_presented_frames() {
        let report = simulate(&["--frames", "10", "--mode", "performance"]);
        assert_eq!(report.presented_frames, 19);
        assert_eq!(report.generated_presented, 9);
        assert_eq!(report.frame_gen.generated_frames, 9);
        assert!(report.max_compensation_us > 0);
    }

    #[test]
    fn test_scene_cut_skips_one_interval() {
        let report = simulate(&["--frames", "10", "--mode", "quality", "--scene-cut", "5"]);
        assert_eq!(report.scene_cuts, vec![5]);
        assert_eq!(report.generated_presented, 8);
        assert_eq!(report.presented_frames, 18);
    }

    #[test]
    fn test_no_pacing_never_sleeps() {
        let report = simulate(&["--frames", "6", "--mode", "off", "--no-pacing"]);
        assert_eq!(report.total_slept_us, 0);
        assert_eq!(report.elapsed_us, 6 * 6_000);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = simulate(&["--frames", "3", "--timings", "2"]);
        let value: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["mode"], "performance");
        assert_eq!(value["timings"].as_array().unwrap().len(), 2);
        assert_eq!(value["latency"]["frames_completed"], 3);
        assert_eq!(value["latency"]["frames_generated"], 2);
        // the newest rows: generated frame 4, then real frame 5
        assert_eq!(value["timings"][0]["present_id"], 4);
        assert_eq!(value["timings"][1]["present_id"], 5);
    }
}
