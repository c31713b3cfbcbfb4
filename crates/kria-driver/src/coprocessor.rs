// SPDX-License-Identifier: AGPL-3.0-only

//! Co-processor interrupt dispatcher
//!
//! Runs on the co-processor side of the bus. Each interrupt carries one
//! command word; the handler publishes `BUSY` while it runs, dispatches on
//! the opcode, then clears the interrupt and publishes `IDLE`. The only
//! exclusion against the host is that status bit: the host's
//! [`crate::bus::CommandBus::send_command`] refuses to write while it is set.

use crate::arena::SharedArena;
use crate::bus::HardwareBus;
use crate::error::{KriaError, Result};
use kria_chip::command::{CommandWord, FrameGeometry, Opcode};
use kria_chip::regs::{irq, status, CoprocRegisterMap};
use kria_detect::{FrameSummary, PostprocessConfig, Postprocessor};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// What one interrupt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `ProcessFrame` ran the postprocessing chain.
    Processed {
        /// Frame geometry decoded from the command param.
        frame: FrameGeometry,
        /// Stage counts.
        summary: FrameSummary,
    },
    /// `UpdateParams` acknowledged.
    ParamsAcknowledged {
        /// Raw param, currently unused.
        param: u16,
    },
    /// `GetResults` wrote the processed-frame counter to the result register.
    ResultsPublished {
        /// Counter value written.
        processed_frames: u32,
    },
    /// Opcode not in the command set; acknowledged and ignored.
    Unknown {
        /// Raw opcode.
        opcode: u16,
    },
    /// A handler was already running; nothing was touched.
    Rejected,
}

/// Resets the re-entry flag however the handler exits.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Command handler for the co-processor.
#[derive(Debug)]
pub struct InterruptDispatcher<B> {
    bus: B,
    regs: CoprocRegisterMap,
    postprocessor: Postprocessor,
    running: AtomicBool,
    processed: AtomicU32,
}

impl<B: HardwareBus> InterruptDispatcher<B> {
    /// Dispatcher using co-processor view registers `regs`.
    pub fn new(bus: B, regs: CoprocRegisterMap, config: &PostprocessConfig) -> Self {
        Self {
            bus,
            regs,
            postprocessor: Postprocessor::new(config),
            running: AtomicBool::new(false),
            processed: AtomicU32::new(0),
        }
    }

    /// Publish `IDLE` so the host may send commands.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn start(&self) -> Result<()> {
        self.bus.write_register(self.regs.status, status::IDLE)?;
        info!("Co-processor dispatcher idle");
        Ok(())
    }

    /// Frames postprocessed successfully so far.
    pub fn processed_frames(&self) -> u32 {
        self.processed.load(Ordering::Acquire)
    }

    /// True while a handler is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Service one interrupt.
    ///
    /// The interrupt is cleared and `IDLE` published even when the command
    /// fails; the failure is then returned.
    ///
    /// # Errors
    ///
    /// Returns postprocessing or arena errors from `ProcessFrame`, or
    /// propagates bus errors. When several steps fail the first error wins.
    pub fn handle_interrupt(&self, arena: &mut SharedArena) -> Result<DispatchOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Interrupt while handler running, ignored");
            return Ok(DispatchOutcome::Rejected);
        }
        let _guard = BusyGuard(&self.running);

        self.bus.write_register(self.regs.status, status::BUSY)?;
        let outcome = self.dispatch(arena);
        if let Err(e) = &outcome {
            warn!("Command failed: {e}");
        }

        // Once BUSY is published, IDLE must follow on every path
        let cleared = self.bus.write_register(self.regs.irq_clear, irq::CLEAR);
        if let Err(e) = &cleared {
            warn!("IRQ clear failed: {e}");
        }
        let idle = self.bus.write_register(self.regs.status, status::IDLE);
        if let Err(e) = &idle {
            warn!("IDLE publish failed: {e}");
        }

        let outcome = outcome?;
        cleared?;
        idle?;
        Ok(outcome)
    }

    fn dispatch(&self, arena: &mut SharedArena) -> Result<DispatchOutcome> {
        let word = CommandWord(self.bus.read_register(self.regs.cmd)?);
        let data_addr = self.bus.read_register(self.regs.data_addr)?;
        debug!(
            "Interrupt: opcode={:#06x} param={:#06x} data={data_addr:#010x}",
            word.opcode(),
            word.param()
        );

        match Opcode::from_code(word.opcode()) {
            Some(Opcode::ProcessFrame) => self.process_frame(arena, data_addr, word.param()),
            Some(Opcode::UpdateParams) => {
                info!("UpdateParams({:#06x}) acknowledged", word.param());
                Ok(DispatchOutcome::ParamsAcknowledged {
                    param: word.param(),
                })
            }
            Some(Opcode::GetResults) => {
                let processed_frames = self.processed_frames();
                self.bus.write_register(self.regs.result, processed_frames)?;
                Ok(DispatchOutcome::ResultsPublished { processed_frames })
            }
            None => {
                warn!("Unknown opcode {:#06x}", word.opcode());
                Ok(DispatchOutcome::Unknown {
                    opcode: word.opcode(),
                })
            }
        }
    }

    fn process_frame(
        &self,
        arena: &mut SharedArena,
        tensor_addr: u32,
        param: u16,
    ) -> Result<DispatchOutcome> {
        let frame = FrameGeometry::from_param(param);
        if frame.width == 0 || frame.height == 0 {
            return Err(KriaError::invalid_frame(format!(
                "param {param:#06x} decodes to empty frame {frame}"
            )));
        }

        let values = self.postprocessor.decoder().geometry().value_count();
        let (tensor, result) = arena.tensor_and_result_at(tensor_addr, values)?;
        let summary = self.postprocessor.process(tensor, frame, result)?;

        let n = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Frame {n} ({frame}): {} candidates, {} retained, {} written",
            summary.candidates, summary.retained, summary.written
        );
        if summary.dropped > 0 {
            warn!("{} qualifying anchors dropped at capacity", summary.dropped);
        }
        Ok(DispatchOutcome::Processed { frame, summary })
    }
}
