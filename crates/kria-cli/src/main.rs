// SPDX-License-Identifier: AGPL-3.0-only

//! `kria` — command-line front end for the Kria detection pipeline.
//!
//! ```text
//! USAGE:
//!   kria layout                 Print the register map and arena layout
//!   kria run [--frames N]       Drive the real board through /dev/mem (root)
//!   kria simulate [--frames N]  Host pipeline + co-processor over a fake bus
//! ```

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use kria_chip::arena::TensorGeometry;
use kria_chip::command::FrameGeometry;
use kria_chip::regs::{control, status, CoprocRegisterMap, HostRegisterMap};
use kria_detect::{DetectionResultSet, PostprocessConfig};
use kria_driver::{
    open_board, stats_channel, ArenaConfig, ArenaLayout, BoardConfig, DispatchOutcome,
    FakeRegisterFile, FrameBuffer, FramePipeline, InterruptDispatcher, PipelineConfig,
    SharedArena, StatsReporter, SystemClock,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kria", about = "Kria detection pipeline CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the register map and the validated arena layout.
    Layout {
        #[command(flatten)]
        arena: ArenaArgs,
    },
    /// Run the pipeline on the board (requires root for /dev/mem).
    Run {
        /// Physical memory device.
        #[arg(long, default_value = kria_driver::mmio::DEV_MEM)]
        device: PathBuf,
        #[command(flatten)]
        arena: ArenaArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run host pipeline and co-processor dispatcher in-process.
    Simulate {
        #[command(flatten)]
        run: RunArgs,
        /// DPU status reads before done.
        #[arg(long, default_value_t = 3)]
        dpu_polls: u32,
    },
}

#[derive(Args)]
struct ArenaArgs {
    /// Arena physical base (hex accepted).
    #[arg(long, value_parser = parse_u32, default_value = "0x70000000")]
    arena_base: u32,
    /// Arena size in bytes (hex accepted).
    #[arg(long, value_parser = parse_u32, default_value = "0x10000000")]
    arena_size: u32,
}

impl ArenaArgs {
    fn config(&self) -> ArenaConfig {
        ArenaConfig {
            base: self.arena_base,
            size: self.arena_size,
            ..ArenaConfig::default()
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Frames to process; runs until interrupted if omitted.
    #[arg(long)]
    frames: Option<u64>,
    /// Frame width in pixels (multiple of 8).
    #[arg(long, default_value_t = 1920)]
    width: u32,
    /// Frame height in pixels (multiple of 8).
    #[arg(long, default_value_t = 1080)]
    height: u32,
    /// Pause between frames in milliseconds.
    #[arg(long, default_value_t = 33)]
    interval_ms: u64,
    /// DPU completion timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Seconds between stats reports.
    #[arg(long, default_value_t = 5)]
    stats_every: u64,
}

impl RunArgs {
    fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height)
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            poll: kria_driver::PollConfig::with_timeout(Duration::from_millis(self.timeout_ms)),
            frame_interval: Duration::from_millis(self.interval_ms),
        }
    }
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Layout { arena } => cmd_layout(&arena)?,
        Cmd::Run { device, arena, run } => cmd_run(device, &arena, &run)?,
        Cmd::Simulate { run, dpu_polls } => cmd_simulate(&run, dpu_polls)?,
    }

    Ok(())
}

fn cmd_layout(arena: &ArenaArgs) -> Result<()> {
    let host = HostRegisterMap::default();
    let coproc = CoprocRegisterMap::default();

    println!("Co-processor (host view / co-processor view)");
    for (name, addr, alias) in [
        ("cmd", host.coproc_cmd, coproc.cmd),
        ("status", host.coproc_status, coproc.status),
        ("data_addr", host.coproc_data_addr, coproc.data_addr),
        ("irq", host.coproc_irq, coproc.irq_clear),
        ("result", host.coproc_result, coproc.result),
    ] {
        println!("  {name:<12} {addr:#010x}  {alias:#010x}");
    }
    println!("DPU");
    for (name, addr) in [
        ("ctrl", host.dpu_ctrl),
        ("status", host.dpu_status),
        ("input_addr", host.dpu_input_addr),
        ("output_addr", host.dpu_output_addr),
        ("width", host.dpu_width),
        ("height", host.dpu_height),
    ] {
        println!("  {name:<12} {addr:#010x}");
    }

    let layout = ArenaLayout::new(arena.config()).context("arena layout")?;
    let base = layout.config().base;
    println!("Arena {base:#010x} + {:#x}", layout.config().size);
    for region in layout.regions() {
        println!(
            "  {:<8} {:#010x}  capacity {:>10}  payload {:>10}",
            format!("{:?}", region.kind),
            base + region.offset,
            region.capacity,
            region.required
        );
    }
    Ok(())
}

/// Repeats one pseudo-random frame, `limit` times or forever.
struct SyntheticFrames {
    frame: FrameBuffer,
    limit: Option<u64>,
    produced: u64,
}

impl SyntheticFrames {
    fn new(geometry: FrameGeometry, limit: Option<u64>) -> Result<Self> {
        let mut state = 0x2545_F491_u32;
        let pixels: Vec<u8> = (0..geometry.byte_len())
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state.to_le_bytes()[0]
            })
            .collect();
        Ok(Self {
            frame: FrameBuffer::new(geometry, Bytes::from(pixels))?,
            limit,
            produced: 0,
        })
    }
}

impl Iterator for SyntheticFrames {
    type Item = FrameBuffer;

    fn next(&mut self) -> Option<FrameBuffer> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }
        self.produced += 1;
        Some(self.frame.clone())
    }
}

fn spawn_reporter(mut reporter: StatsReporter, every: Duration) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        let (snapshot, live) = reporter.tick(every);
        println!("[stats] {snapshot}");
        if !live {
            break;
        }
    })
}

fn print_results(results: &DetectionResultSet) {
    println!("Detections: {}", results.len());
    for d in results {
        println!(
            "  class {:>3}  conf {:.3}  box ({:.1}, {:.1}, {:.1}, {:.1})",
            d.class_id, d.confidence, d.bbox.x, d.bbox.y, d.bbox.w, d.bbox.h
        );
    }
}

fn cmd_run(device: PathBuf, arena: &ArenaArgs, run: &RunArgs) -> Result<()> {
    let config = BoardConfig {
        device,
        arena: arena.config(),
        ..BoardConfig::default()
    };
    let mut board = open_board(&config).context("board bring-up")?;

    let (publisher, reporter) = stats_channel();
    let reporter = spawn_reporter(reporter, Duration::from_secs(run.stats_every));

    let mut pipeline = FramePipeline::new(
        board.registers.clone(),
        config.regs,
        SystemClock::new(),
        run.pipeline_config(),
    )
    .with_publisher(publisher);
    let mut source = SyntheticFrames::new(run.geometry(), run.frames)?;
    let summary = pipeline.run(&mut board.arena, &mut source, &AtomicBool::new(false));

    match pipeline.query_processed_frames() {
        Ok(n) => println!("Co-processor processed {n} frames"),
        Err(e) => eprintln!("GetResults failed: {e}"),
    }
    print_results(&pipeline.read_results(&board.arena)?);

    drop(pipeline);
    let _ = reporter.join();
    println!("Completed {} frames, {} failed", summary.completed, summary.failed);
    Ok(())
}

/// Stand-in for the DPU's output: a few objects drifting across the frame
/// over a field of low-objectness anchors.
fn render_tensor(tensor: &mut [f32], geometry: TensorGeometry, frame_index: u64) {
    tensor.fill(0.0);
    let stride = geometry.values_per_anchor;
    #[allow(clippy::cast_precision_loss)]
    let drift = (frame_index % 50) as f32 * 0.01;
    let objects = [
        (0.10 + drift, 0.20, 0.15, 0.30, 0.95, 0),
        (0.11 + drift, 0.21, 0.15, 0.30, 0.90, 0),
        (0.55, 0.40 + drift, 0.20, 0.20, 0.85, 2),
        (0.70, 0.10, 0.10, 0.10, 0.60, 7),
    ];
    for (anchor, (x, y, w, h, obj, class)) in objects.into_iter().enumerate() {
        let record = &mut tensor[anchor * stride..(anchor + 1) * stride];
        record[..5].copy_from_slice(&[x, y, w, h, obj]);
        if let Some(score) = record.get_mut(TensorGeometry::CLASS_START + class) {
            *score = 0.9;
        }
    }
    for record in tensor.chunks_exact_mut(stride).skip(objects.len()).step_by(7) {
        record[TensorGeometry::OBJECTNESS_INDEX] = 0.1;
    }
}

fn cmd_simulate(run: &RunArgs, dpu_polls: u32) -> Result<()> {
    let geometry = run.geometry();
    let tensor = TensorGeometry::YOLO_80;
    let mut arena = SharedArena::owned(ArenaConfig::compact(0x7000_0000, geometry, tensor)?)?;

    let host = HostRegisterMap::default();
    let coproc_regs = CoprocRegisterMap::default();
    let fake = FakeRegisterFile::new();
    fake.alias_all(coproc_regs.aliases(&host));
    let wait = dpu_polls.saturating_sub(1) as usize;
    fake.on_write(host.dpu_ctrl, move |fake, value| {
        if value & control::START != 0 {
            let reads = std::iter::repeat(0).take(wait).chain([status::DONE]);
            fake.script_reads(host.dpu_status, reads);
        }
    });

    let postprocess = PostprocessConfig::for_tensor(tensor);
    let coproc = InterruptDispatcher::new(&fake, coproc_regs, &postprocess);
    coproc.start()?;

    let (publisher, reporter) = stats_channel();
    let reporter = spawn_reporter(reporter, Duration::from_secs(run.stats_every));
    let mut pipeline =
        FramePipeline::new(&fake, host, SystemClock::new(), run.pipeline_config())
            .with_publisher(publisher);

    let mut source = SyntheticFrames::new(geometry, Some(run.frames.unwrap_or(30)))?;
    let mut frame_index = 0;
    let stop = AtomicBool::new(false);
    let summary = pipeline.run_with(
        &mut arena,
        &mut source,
        &stop,
        |arena, _| {
            // DPU output must be in place before its done bit is polled
            render_tensor(arena.tensor_slice_mut(), tensor, frame_index);
            frame_index += 1;
        },
        |arena, outcome| {
            fake.clear_writes();
            if outcome.is_err() {
                return;
            }
            match coproc.handle_interrupt(arena) {
                Ok(DispatchOutcome::Processed { summary, .. }) => {
                    tracing::debug!("Co-processor: {summary:?}");
                }
                Ok(other) => tracing::warn!("Co-processor: unexpected {other:?}"),
                Err(e) => tracing::warn!("Co-processor failed: {e}"),
            }
        },
    );

    pipeline.request_processed_frames()?;
    coproc.handle_interrupt(&mut arena)?;
    println!("Co-processor processed {} frames", pipeline.read_processed_frames()?);
    print_results(&pipeline.read_results(&arena)?);

    drop(pipeline);
    let _ = reporter.join();
    println!("Completed {} frames, {} failed", summary.completed, summary.failed);
    Ok(())
}
