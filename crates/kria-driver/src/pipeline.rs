//! Host frame pipeline
//!
//! One frame at a time:
//!
//! ```text
//! Idle → CopyIn → AcceleratorRunning ─┬─▶ AcceleratorDone → PostprocessDispatch ─┬─▶ Complete → Idle
//!                                     └─▶ AcceleratorTimeout ──────────────────────┴─▶ Failed   → Idle
//! ```
//!
//! The arena regions are single-buffered, so a frame is never copied in
//! while the previous one is still with the DPU or the co-processor.

use crate::accelerator::{Accelerator, PollConfig};
use crate::arena::SharedArena;
use crate::bus::{CommandBus, HardwareBus};
use crate::clock::Clock;
use crate::error::{KriaError, Result};
use crate::stats::{StatsPublisher, StatsSnapshot, SystemStats};
use bytes::Bytes;
use kria_chip::command::{FrameGeometry, Opcode};
use kria_chip::regs::{status, HostRegisterMap};
use kria_detect::{parse_results, DetectionResultSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Waiting for a frame.
    Idle,
    /// Copying the frame into the arena.
    CopyIn,
    /// DPU started, polling for done.
    AcceleratorRunning,
    /// DPU done bit observed.
    AcceleratorDone,
    /// DPU did not finish within the poll budget.
    AcceleratorTimeout,
    /// Sending `ProcessFrame` to the co-processor.
    PostprocessDispatch,
    /// Frame handed off and counted.
    Complete,
    /// Frame abandoned.
    Failed,
}

/// An RGB frame, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    geometry: FrameGeometry,
    pixels: Bytes,
}

impl FrameBuffer {
    /// Wrap `pixels` as a frame of `geometry`.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::InvalidFrame`] if the byte count does not match.
    pub fn new(geometry: FrameGeometry, pixels: impl Into<Bytes>) -> Result<Self> {
        let pixels = pixels.into();
        if pixels.len() != geometry.byte_len() {
            return Err(KriaError::invalid_frame(format!(
                "{geometry} frame needs {} bytes, got {}",
                geometry.byte_len(),
                pixels.len()
            )));
        }
        Ok(Self { geometry, pixels })
    }

    /// Frame dimensions.
    pub const fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Pixel bytes.
    pub const fn pixels(&self) -> &Bytes {
        &self.pixels
    }
}

/// Something that yields frames until exhausted.
pub trait FrameSource {
    /// Next frame, or `None` when the source is done.
    fn next_frame(&mut self) -> Option<FrameBuffer>;
}

impl<I: Iterator<Item = FrameBuffer>> FrameSource for I {
    fn next_frame(&mut self) -> Option<FrameBuffer> {
        self.next()
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// DPU completion poll budget.
    pub poll: PollConfig,
    /// Pause between frames in [`FramePipeline::run`].
    pub frame_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            frame_interval: Duration::from_millis(33),
        }
    }
}

/// A frame that made it to the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// 1-based count of completed frames.
    pub index: u64,
    /// Frame dimensions.
    pub geometry: FrameGeometry,
    /// Host-side latency from copy-in to dispatch.
    pub latency: Duration,
    /// DPU status reads until done.
    pub polls: u32,
}

/// Totals from [`FramePipeline::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Frames completed.
    pub completed: u64,
    /// Frames failed.
    pub failed: u64,
}

/// Host side of the detection pipeline.
#[derive(Debug)]
pub struct FramePipeline<B, C> {
    commands: CommandBus<B>,
    accelerator: Accelerator<B, C>,
    clock: C,
    config: PipelineConfig,
    state: PipelineState,
    transitions: Vec<PipelineState>,
    stats: SystemStats,
    publisher: Option<StatsPublisher>,
}

impl<B, C> FramePipeline<B, C>
where
    B: HardwareBus + Clone,
    C: Clock + Clone,
{
    /// Pipeline driving the co-processor and DPU through `bus`.
    pub fn new(bus: B, regs: HostRegisterMap, clock: C, config: PipelineConfig) -> Self {
        Self {
            commands: CommandBus::new(bus.clone(), regs),
            accelerator: Accelerator::new(bus, regs, clock.clone(), config.poll),
            clock,
            config,
            state: PipelineState::Idle,
            transitions: Vec::new(),
            stats: SystemStats::default(),
            publisher: None,
        }
    }

    /// Publish a [`StatsSnapshot`] after every frame.
    #[must_use]
    pub fn with_publisher(mut self, publisher: StatsPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Current state.
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// States entered while handling the most recent frame.
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    /// Current statistics.
    pub const fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Command bus to the co-processor.
    pub const fn commands(&self) -> &CommandBus<B> {
        &self.commands
    }

    /// DPU handle.
    pub const fn accelerator(&self) -> &Accelerator<B, C> {
        &self.accelerator
    }

    fn enter(&mut self, state: PipelineState) {
        debug!("Pipeline {:?} → {state:?}", self.state);
        self.state = state;
        self.transitions.push(state);
    }

    fn publish(&self) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(self.stats.snapshot());
        }
    }

    /// Run one frame through copy-in, DPU and dispatch.
    ///
    /// Every failure is counted and leaves the pipeline `Idle` for the next
    /// frame. Busy co-processors and DPU timeouts are not retried.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::InvalidFrame`] for frames the arena or command
    /// word cannot carry, [`KriaError::AcceleratorTimeout`],
    /// [`KriaError::DeviceBusy`], or bus errors.
    pub fn process_frame(&mut self, arena: &mut SharedArena, frame: &FrameBuffer) -> Result<FrameReport> {
        self.transitions.clear();
        let start = self.clock.now();

        match self.run_stages(arena, frame) {
            Ok(polls) => {
                let now = self.clock.now();
                let latency = now.saturating_sub(start);
                self.stats.record_complete(latency, now);
                self.enter(PipelineState::Complete);
                self.publish();
                self.enter(PipelineState::Idle);

                let report = FrameReport {
                    index: self.stats.snapshot().frame_count,
                    geometry: frame.geometry(),
                    latency,
                    polls,
                };
                info!(
                    "Frame {} complete, latency {:.2}ms",
                    report.index,
                    latency.as_secs_f64() * 1000.0
                );
                Ok(report)
            }
            Err(e) => {
                self.stats.record_failure();
                self.enter(PipelineState::Failed);
                self.publish();
                self.enter(PipelineState::Idle);
                warn!("Frame failed: {e}");
                Err(e)
            }
        }
    }

    fn validate(&self, arena: &SharedArena, geometry: FrameGeometry) -> Result<u16> {
        let max = arena.layout().config().max_frame;
        if geometry.width > max.width || geometry.height > max.height {
            return Err(KriaError::invalid_frame(format!(
                "{geometry} exceeds arena maximum {max}"
            )));
        }
        geometry.to_param().ok_or_else(|| {
            KriaError::invalid_frame(format!(
                "{geometry} is not a non-zero multiple of 8 up to 2040x2040"
            ))
        })
    }

    fn run_stages(&mut self, arena: &mut SharedArena, frame: &FrameBuffer) -> Result<u32> {
        let geometry = frame.geometry();
        let param = self.validate(arena, geometry)?;

        self.enter(PipelineState::CopyIn);
        arena.frame_slice_mut()[..frame.pixels().len()].copy_from_slice(frame.pixels());

        self.enter(PipelineState::AcceleratorRunning);
        self.accelerator.invoke(
            arena.input_addr(),
            arena.tensor_addr(),
            geometry.width,
            geometry.height,
        )?;
        let polls = match self.accelerator.wait_done() {
            Ok(polls) => polls,
            Err(e) => {
                if e.is_timeout() {
                    self.enter(PipelineState::AcceleratorTimeout);
                }
                return Err(e);
            }
        };
        self.enter(PipelineState::AcceleratorDone);

        self.enter(PipelineState::PostprocessDispatch);
        self.commands
            .send_command(Opcode::ProcessFrame, arena.tensor_addr(), param)?;
        Ok(polls)
    }

    /// Pull frames from `source` until it is exhausted or `stop` is set.
    pub fn run(
        &mut self,
        arena: &mut SharedArena,
        source: &mut impl FrameSource,
        stop: &AtomicBool,
    ) -> RunSummary {
        self.run_with(arena, source, stop, |_, _| {}, |_, _| {})
    }

    /// [`Self::run`], calling `before` with the arena and each frame ahead
    /// of its copy-in, and `after` with the arena and outcome of every frame
    /// before pausing for the next one.
    pub fn run_with<G, F>(
        &mut self,
        arena: &mut SharedArena,
        source: &mut impl FrameSource,
        stop: &AtomicBool,
        mut before: G,
        mut after: F,
    ) -> RunSummary
    where
        G: FnMut(&mut SharedArena, &FrameBuffer),
        F: FnMut(&mut SharedArena, &Result<FrameReport>),
    {
        let mut summary = RunSummary::default();
        while !stop.load(Ordering::Relaxed) {
            let Some(frame) = source.next_frame() else {
                debug!("Frame source exhausted");
                break;
            };
            before(arena, &frame);
            let outcome = self.process_frame(arena, &frame);
            if outcome.is_ok() {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }
            after(arena, &outcome);
            self.clock.sleep(self.config.frame_interval);
        }
        info!(
            "Pipeline stopped: {} completed, {} failed",
            summary.completed, summary.failed
        );
        summary
    }

    /// Parse the result buffer the co-processor last wrote.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::Postprocess`] if the buffer is malformed.
    pub fn read_results(&self, arena: &SharedArena) -> Result<DetectionResultSet> {
        Ok(parse_results(arena.result_slice())?)
    }

    /// Send `GetResults` to the co-processor.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::DeviceBusy`] or bus errors.
    pub fn request_processed_frames(&self) -> Result<()> {
        self.commands.request_results()
    }

    /// Wait for the co-processor to go idle, then read its result register.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::DeviceBusy`] if it stays busy for the whole poll
    /// budget, or bus errors.
    pub fn read_processed_frames(&self) -> Result<u32> {
        let poll = self.config.poll;
        for _ in 0..poll.max_polls {
            if self.commands.read_register(self.commands.regs().coproc_status)? & status::BUSY == 0 {
                return self.commands.read_result();
            }
            self.clock.sleep(poll.interval);
        }
        Err(KriaError::device_busy("co-processor"))
    }

    /// [`Self::request_processed_frames`] then [`Self::read_processed_frames`].
    ///
    /// # Errors
    ///
    /// As the two halves.
    pub fn query_processed_frames(&self) -> Result<u32> {
        self.request_processed_frames()?;
        self.read_processed_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;
    use crate::backends::FakeRegisterFile;
    use crate::clock::ManualClock;
    use crate::stats::stats_channel;
    use kria_chip::arena::TensorGeometry;
    use kria_chip::regs::control;

    type TestPipeline<'a> = FramePipeline<&'a FakeRegisterFile, &'a ManualClock>;

    fn arena() -> SharedArena {
        let config = ArenaConfig::compact(
            0x7000_0000,
            FrameGeometry::new(64, 64),
            TensorGeometry::with_classes(4, 2),
        )
        .unwrap();
        SharedArena::owned(config).unwrap()
    }

    fn pipeline<'a>(fake: &'a FakeRegisterFile, clock: &'a ManualClock) -> TestPipeline<'a> {
        let regs = HostRegisterMap::default();
        let dpu_status = regs.dpu_status;
        fake.on_write(regs.dpu_ctrl, move |fake, value| {
            if value & control::START != 0 {
                fake.script_reads(dpu_status, [0, 0, status::DONE]);
            }
        });
        FramePipeline::new(fake, regs, clock, PipelineConfig::default())
    }

    fn frame(width: u32, height: u32) -> FrameBuffer {
        let geometry = FrameGeometry::new(width, height);
        FrameBuffer::new(geometry, vec![0xAB; geometry.byte_len()]).unwrap()
    }

    #[test]
    fn completed_frame_walks_every_state() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let mut arena = arena();
        let mut p = pipeline(&fake, &clock);

        let report = p.process_frame(&mut arena, &frame(32, 16)).unwrap();
        assert_eq!(report.index, 1);
        assert_eq!(report.polls, 3);
        assert_eq!(report.latency, Duration::from_millis(2));
        assert_eq!(
            p.transitions(),
            [
                PipelineState::CopyIn,
                PipelineState::AcceleratorRunning,
                PipelineState::AcceleratorDone,
                PipelineState::PostprocessDispatch,
                PipelineState::Complete,
                PipelineState::Idle,
            ]
        );
        assert!(arena.frame_slice()[..32 * 16 * 3].iter().all(|&b| b == 0xAB));

        let regs = HostRegisterMap::default();
        assert_eq!(fake.writes_to(regs.dpu_width), vec![32]);
        assert_eq!(fake.writes_to(regs.coproc_data_addr), vec![arena.tensor_addr()]);
        assert_eq!(fake.writes_to(regs.coproc_cmd), vec![0x0402_0001]);
    }

    #[test]
    fn timeout_fails_without_dispatch() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let regs = HostRegisterMap::default();
        let mut arena = arena();
        let mut p = FramePipeline::new(&fake, regs, &clock, PipelineConfig::default());

        let err = p.process_frame(&mut arena, &frame(32, 16)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            p.transitions(),
            [
                PipelineState::CopyIn,
                PipelineState::AcceleratorRunning,
                PipelineState::AcceleratorTimeout,
                PipelineState::Failed,
                PipelineState::Idle,
            ]
        );
        assert!(fake.writes_to(regs.coproc_cmd).is_empty());
        assert!(fake.writes_to(regs.coproc_irq).is_empty());
        assert_eq!(p.stats().failed_count, 1);
        assert_eq!(p.stats().frame_count, 0);
    }

    #[test]
    fn busy_coprocessor_fails_frame() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let regs = HostRegisterMap::default();
        let mut arena = arena();
        let mut p = pipeline(&fake, &clock);
        fake.set(regs.coproc_status, status::BUSY);

        let err = p.process_frame(&mut arena, &frame(32, 16)).unwrap_err();
        assert!(err.is_busy());
        assert_eq!(p.state(), PipelineState::Idle);
        assert_eq!(p.transitions()[p.transitions().len() - 2], PipelineState::Failed);
        assert!(fake.writes_to(regs.coproc_cmd).is_empty());
    }

    #[test]
    fn invalid_frames_never_touch_the_arena() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let mut arena = arena();
        let mut p = pipeline(&fake, &clock);

        for bad in [frame(30, 16), frame(128, 16)] {
            let err = p.process_frame(&mut arena, &bad).unwrap_err();
            assert!(matches!(err, KriaError::InvalidFrame { .. }), "{err}");
        }
        assert!(fake.writes().is_empty());
        assert!(arena.frame_slice().iter().all(|&b| b == 0));
        assert_eq!(p.stats().failed_count, 2);
    }

    #[test]
    fn frame_buffer_checks_length() {
        let err = FrameBuffer::new(FrameGeometry::new(8, 8), vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, KriaError::InvalidFrame { .. }));
    }

    #[test]
    fn run_stops_when_source_ends_and_publishes() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let mut arena = arena();
        let (publisher, mut reporter) = stats_channel();
        let mut p = pipeline(&fake, &clock).with_publisher(publisher);

        let mut frames = vec![frame(32, 16), frame(30, 16), frame(64, 64)].into_iter();
        let mut seen = 0;
        let summary = p.run_with(
            &mut arena,
            &mut frames,
            &AtomicBool::new(false),
            |_, _| {},
            |_, _| seen += 1,
        );

        assert_eq!(summary, RunSummary { completed: 2, failed: 1 });
        assert_eq!(seen, 3);
        let (latest, _) = reporter.drain();
        assert_eq!(latest.frame_count, 2);
        assert_eq!(latest.failed_count, 1);
    }

    #[test]
    fn before_hook_runs_ahead_of_each_dpu_start() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let regs = HostRegisterMap::default();
        let mut arena = arena();
        let mut p = pipeline(&fake, &clock);

        let mut frames = vec![frame(32, 16), frame(64, 64)].into_iter();
        let mut starts_seen = Vec::new();
        let mut tensor_at_dispatch = Vec::new();
        p.run_with(
            &mut arena,
            &mut frames,
            &AtomicBool::new(false),
            |arena, _| {
                starts_seen.push(fake.writes_to(regs.dpu_ctrl).len());
                arena.tensor_slice_mut()[0] = 0.5;
            },
            |arena, _| tensor_at_dispatch.push(arena.tensor_slice()[0]),
        );

        assert_eq!(starts_seen, vec![0, 1]);
        assert_eq!(tensor_at_dispatch, vec![0.5, 0.5]);
    }

    #[test]
    fn run_honours_stop_flag() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let mut arena = arena();
        let mut p = pipeline(&fake, &clock);
        let mut frames = std::iter::repeat_with(|| frame(32, 16));

        let summary = p.run(&mut arena, &mut frames, &AtomicBool::new(true));
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn processed_frames_waits_for_idle() {
        let fake = FakeRegisterFile::new();
        let clock = ManualClock::new();
        let regs = HostRegisterMap::default();
        let p = pipeline(&fake, &clock);
        fake.script_reads(regs.coproc_status, [status::BUSY, status::BUSY]);
        fake.set(regs.coproc_result, 9);

        assert_eq!(p.read_processed_frames().unwrap(), 9);
        assert_eq!(clock.now(), Duration::from_millis(2));
    }
}
