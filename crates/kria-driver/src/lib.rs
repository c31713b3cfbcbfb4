//! Host driver and co-processor dispatcher for a Kria detection board.
//!
//! Three cores share one physical arena:
//!
//! ```text
//!  host (A53)                     DPU                    co-processor (RISC-V)
//!  ──────────                     ───                    ─────────────────────
//!  FramePipeline ── frame ──▶ arena.input
//!       │ invoke / poll done ─▶ DPU regs ── tensor ──▶ arena.tensor
//!       │ send_command ──────────────────────────────▶ cmd / data / irq regs
//!       │                                                 InterruptDispatcher
//!       │                                                 decode → NMS → pack
//!       └──── read_results ◀──────────────────────────── arena.result
//! ```
//!
//! All register access goes through [`HardwareBus`]: [`MmioWindow`] on the
//! board, [`FakeRegisterFile`] in tests and the simulator. Time goes through
//! [`Clock`], so poll timeouts can be tested without waiting.
//!
//! # Quick start (simulated)
//!
//! ```no_run
//! use kria_driver::{
//!     ArenaConfig, FakeRegisterFile, FrameBuffer, FramePipeline, ManualClock, PipelineConfig,
//!     SharedArena,
//! };
//! use kria_chip::arena::TensorGeometry;
//! use kria_chip::command::FrameGeometry;
//! use kria_chip::regs::HostRegisterMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = FrameGeometry::new(64, 64);
//! let config = ArenaConfig::compact(0x7000_0000, frame, TensorGeometry::YOLO_80)?;
//! let mut arena = SharedArena::owned(config)?;
//!
//! let bus = FakeRegisterFile::new();
//! let clock = ManualClock::new();
//! let mut pipeline =
//!     FramePipeline::new(&bus, HostRegisterMap::default(), &clock, PipelineConfig::default());
//!
//! let pixels = vec![0u8; frame.byte_len()];
//! let report = pipeline.process_frame(&mut arena, &FrameBuffer::new(frame, pixels)?);
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod accelerator;
pub mod arena;
pub mod backends;
mod bus;
mod clock;
mod coprocessor;
mod error;
pub mod mmio;
mod pipeline;
pub mod setup;
mod stats;

pub use accelerator::{Accelerator, PollConfig};
pub use arena::{ArenaConfig, ArenaLayout, ArenaRegion, RegionKind, SharedArena};
pub use backends::{FakeRegisterFile, WriteHook};
pub use bus::{CommandBus, HardwareBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coprocessor::{DispatchOutcome, InterruptDispatcher};
pub use error::{KriaError, Result};
pub use mmio::{MmioWindow, PhysMapping};
pub use pipeline::{
    FrameBuffer, FramePipeline, FrameReport, FrameSource, PipelineConfig, PipelineState,
    RunSummary,
};
pub use setup::{open_board, Board, BoardConfig};
pub use stats::{stats_channel, StatsPublisher, StatsReporter, StatsSnapshot, SystemStats};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        CommandBus, FrameBuffer, FramePipeline, FrameSource, HardwareBus, InterruptDispatcher,
        KriaError, PipelineConfig, Result, SharedArena, StatsReporter, SystemClock,
    };
}
