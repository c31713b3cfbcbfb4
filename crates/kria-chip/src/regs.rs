//! Register maps.
//!
//! The host and the co-processor see the same physical registers through
//! different address spaces:
//!
//! ```text
//! Host view                         Co-processor view
//! 0xA0000000  RISC-V CMD        ==  0x60000000  CMD
//! 0xA0000004  RISC-V STATUS     ==  0x60000004  STATUS
//! 0xA0000008  RISC-V DATA_ADDR  ==  0x60000008  DATA_ADDR
//! 0xA000000C  RISC-V IRQ        ==  0x6000000C  IRQ_CLR
//! 0xA0000010  RISC-V RESULT     ==  0x60000010  RESULT
//! 0xA0010000  DPU CTRL ... HEIGHT   (host only)
//! ```
//!
//! Every access is a whole, aligned 32-bit word with device side effects.

// ── Windows ──────────────────────────────────────────────────────────────────

/// Base of the co-processor control block as seen by the host.
pub const RISCV_BASE: u32 = 0xA000_0000;

/// Base of the DPU control block as seen by the host.
pub const DPU_BASE: u32 = 0xA001_0000;

/// Base of the co-processor's own view of its control block.
pub const COPROC_VIEW_BASE: u32 = 0x6000_0000;

/// Size of the host register window mapped from `RISCV_BASE`.
///
/// Covers both the co-processor and the DPU control blocks.
pub const HOST_WINDOW_SIZE: u32 = 0x10_0000;

/// Width of one register in bytes.
pub const REGISTER_BYTES: u32 = 4;

// ── Offsets ──────────────────────────────────────────────────────────────────

/// Co-processor control block offsets.
pub mod coproc {
    /// Command register: `param << 16 | opcode`.
    pub const CMD: u32 = 0x00;
    /// Status register (bit 0 = busy).
    pub const STATUS: u32 = 0x04;
    /// Data address register (physical arena address).
    pub const DATA_ADDR: u32 = 0x08;
    /// Interrupt trigger (host writes) / clear (co-processor writes).
    pub const IRQ: u32 = 0x0C;
    /// Result register, written by `GetResults`.
    pub const RESULT: u32 = 0x10;
}

/// DPU control block offsets.
pub mod dpu {
    /// Control register, write [`super::control::START`] to run.
    pub const CTRL: u32 = 0x00;
    /// Status register (bit 0 = done).
    pub const STATUS: u32 = 0x04;
    /// Input frame physical address.
    pub const INPUT_ADDR: u32 = 0x08;
    /// Output tensor physical address.
    pub const OUTPUT_ADDR: u32 = 0x0C;
    /// Frame width in pixels.
    pub const WIDTH: u32 = 0x10;
    /// Frame height in pixels.
    pub const HEIGHT: u32 = 0x14;
}

// ── Bit definitions ──────────────────────────────────────────────────────────

/// Status register bits.
pub mod status {
    /// Co-processor: handler running, commands are rejected.
    pub const BUSY: u32 = 1 << 0;
    /// DPU: inference finished, output tensor valid.
    pub const DONE: u32 = 1 << 0;
    /// Co-processor: waiting for an interrupt.
    pub const IDLE: u32 = 0;
}

/// DPU control register bits.
pub mod control {
    /// Start inference with the programmed addresses and dimensions.
    pub const START: u32 = 1 << 0;
}

/// Interrupt register values.
pub mod irq {
    /// Assert the co-processor's external interrupt line.
    pub const TRIGGER: u32 = 1 << 0;
    /// Acknowledge the pending interrupt.
    pub const CLEAR: u32 = 1 << 0;
}

// ── Resolved maps ────────────────────────────────────────────────────────────

/// Absolute register addresses the host uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRegisterMap {
    /// Co-processor command register.
    pub coproc_cmd: u32,
    /// Co-processor status register.
    pub coproc_status: u32,
    /// Co-processor data address register.
    pub coproc_data_addr: u32,
    /// Co-processor interrupt trigger register.
    pub coproc_irq: u32,
    /// Co-processor result register.
    pub coproc_result: u32,
    /// DPU control register.
    pub dpu_ctrl: u32,
    /// DPU status register.
    pub dpu_status: u32,
    /// DPU input address register.
    pub dpu_input_addr: u32,
    /// DPU output address register.
    pub dpu_output_addr: u32,
    /// DPU width register.
    pub dpu_width: u32,
    /// DPU height register.
    pub dpu_height: u32,
}

impl HostRegisterMap {
    /// Resolve the map from the two control block bases.
    #[must_use]
    pub const fn new(riscv_base: u32, dpu_base: u32) -> Self {
        Self {
            coproc_cmd: riscv_base + coproc::CMD,
            coproc_status: riscv_base + coproc::STATUS,
            coproc_data_addr: riscv_base + coproc::DATA_ADDR,
            coproc_irq: riscv_base + coproc::IRQ,
            coproc_result: riscv_base + coproc::RESULT,
            dpu_ctrl: dpu_base + dpu::CTRL,
            dpu_status: dpu_base + dpu::STATUS,
            dpu_input_addr: dpu_base + dpu::INPUT_ADDR,
            dpu_output_addr: dpu_base + dpu::OUTPUT_ADDR,
            dpu_width: dpu_base + dpu::WIDTH,
            dpu_height: dpu_base + dpu::HEIGHT,
        }
    }

    /// All addresses, in register-map order.
    #[must_use]
    pub const fn all(&self) -> [u32; 11] {
        [
            self.coproc_cmd,
            self.coproc_status,
            self.coproc_data_addr,
            self.coproc_irq,
            self.coproc_result,
            self.dpu_ctrl,
            self.dpu_status,
            self.dpu_input_addr,
            self.dpu_output_addr,
            self.dpu_width,
            self.dpu_height,
        ]
    }
}

impl Default for HostRegisterMap {
    fn default() -> Self {
        Self::new(RISCV_BASE, DPU_BASE)
    }
}

/// Absolute register addresses the co-processor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoprocRegisterMap {
    /// Command register.
    pub cmd: u32,
    /// Status register.
    pub status: u32,
    /// Data address register.
    pub data_addr: u32,
    /// Interrupt clear register.
    pub irq_clear: u32,
    /// Result register.
    pub result: u32,
}

impl CoprocRegisterMap {
    /// Resolve the map from the co-processor's view base.
    #[must_use]
    pub const fn new(base: u32) -> Self {
        Self {
            cmd: base + coproc::CMD,
            status: base + coproc::STATUS,
            data_addr: base + coproc::DATA_ADDR,
            irq_clear: base + coproc::IRQ,
            result: base + coproc::RESULT,
        }
    }

    /// Pairs of (co-processor address, host address) naming the same register.
    #[must_use]
    pub const fn aliases(&self, host: &HostRegisterMap) -> [(u32, u32); 5] {
        [
            (self.cmd, host.coproc_cmd),
            (self.status, host.coproc_status),
            (self.data_addr, host.coproc_data_addr),
            (self.irq_clear, host.coproc_irq),
            (self.result, host.coproc_result),
        ]
    }
}

impl Default for CoprocRegisterMap {
    fn default() -> Self {
        Self::new(COPROC_VIEW_BASE)
    }
}
