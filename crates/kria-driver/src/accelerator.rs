//! DPU invocation and completion polling
//!
//! The DPU is opaque: it is told where the frame is, where to put the
//! tensor and how large the frame is, then started. Completion is only
//! observable through the done bit of its status register.

use crate::bus::HardwareBus;
use crate::clock::Clock;
use crate::error::{KriaError, Result};
use kria_chip::regs::{control, status, HostRegisterMap};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Poll budget for [`Accelerator::wait_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between status reads.
    pub interval: Duration,
    /// Status reads before giving up.
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1),
            max_polls: 1000,
        }
    }
}

impl PollConfig {
    /// Budget covering `timeout` at the default 1 ms interval.
    pub fn with_timeout(timeout: Duration) -> Self {
        let interval = Self::default().interval;
        let polls = timeout.as_nanos().div_ceil(interval.as_nanos()).max(1);
        Self {
            interval,
            max_polls: u32::try_from(polls).unwrap_or(u32::MAX),
        }
    }

    /// Upper bound on the time spent waiting.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_polls)
    }
}

/// Handle on the DPU's register block.
#[derive(Debug)]
pub struct Accelerator<B, C> {
    bus: B,
    regs: HostRegisterMap,
    clock: C,
    poll: PollConfig,
}

impl<B: HardwareBus, C: Clock> Accelerator<B, C> {
    /// Accelerator behind `bus` at the addresses in `regs`.
    pub const fn new(bus: B, regs: HostRegisterMap, clock: C, poll: PollConfig) -> Self {
        Self {
            bus,
            regs,
            clock,
            poll,
        }
    }

    /// Poll budget in use.
    pub const fn poll_config(&self) -> PollConfig {
        self.poll
    }

    /// Program addresses and dimensions, then assert start.
    ///
    /// # Errors
    ///
    /// Propagates bus errors. Start is not asserted if any earlier write fails.
    pub fn invoke(&self, input_addr: u32, output_addr: u32, width: u32, height: u32) -> Result<()> {
        self.bus.write_register(self.regs.dpu_input_addr, input_addr)?;
        self.bus.write_register(self.regs.dpu_output_addr, output_addr)?;
        self.bus.write_register(self.regs.dpu_width, width)?;
        self.bus.write_register(self.regs.dpu_height, height)?;
        self.bus.write_register(self.regs.dpu_ctrl, control::START)?;
        debug!("DPU started: in={input_addr:#010x} out={output_addr:#010x} {width}x{height}");
        Ok(())
    }

    /// True if the done bit is set.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn is_done(&self) -> Result<bool> {
        Ok(self.bus.read_register(self.regs.dpu_status)? & status::DONE != 0)
    }

    /// Block until the done bit is observed or the poll budget runs out.
    ///
    /// Returns the number of status reads it took. On timeout the control
    /// register is left as it is; no reset is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::AcceleratorTimeout`] after `max_polls` reads
    /// without the done bit, or propagates bus errors.
    pub fn wait_done(&self) -> Result<u32> {
        self.poll_done(self.poll)
    }

    /// [`Self::wait_done`] with an explicit timeout in milliseconds.
    ///
    /// # Errors
    ///
    /// As [`Self::wait_done`].
    pub fn wait_done_within(&self, timeout_ms: u64) -> Result<u32> {
        self.poll_done(PollConfig::with_timeout(Duration::from_millis(timeout_ms)))
    }

    fn poll_done(&self, poll: PollConfig) -> Result<u32> {
        let start = self.clock.now();
        for i in 0..poll.max_polls {
            if self.is_done()? {
                debug!("DPU done after {} polls", i + 1);
                return Ok(i + 1);
            }
            trace!("DPU poll {i}: not done");
            self.clock.sleep(poll.interval);
        }

        let elapsed = self.clock.now().saturating_sub(start);
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        warn!(
            "DPU done bit not seen after {} polls ({duration_ms}ms)",
            poll.max_polls
        );
        Err(KriaError::AcceleratorTimeout {
            polls: poll.max_polls,
            duration_ms,
        })
    }
}
