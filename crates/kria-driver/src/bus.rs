//! Register bus abstraction and the host → co-processor command protocol
//!
//! `HardwareBus` is the only way code touches device registers. The real
//! implementation is [`crate::mmio::MmioWindow`]; tests and the simulator
//! use [`crate::backends::FakeRegisterFile`].

use crate::error::{KriaError, Result};
use kria_chip::command::{CommandWord, Opcode};
use kria_chip::regs::{irq, status, HostRegisterMap};
use std::fmt::Debug;
use std::sync::Arc;

/// Whole-word access to memory-mapped device registers.
///
/// Every read and write may have device side effects; implementations must
/// not cache, merge or reorder accesses.
pub trait HardwareBus: Debug + Send + Sync {
    /// Read the 32-bit register at absolute address `addr`.
    ///
    /// # Errors
    ///
    /// Returns error if `addr` is unaligned or outside the mapped window.
    fn read_register(&self, addr: u32) -> Result<u32>;

    /// Write `value` to the 32-bit register at absolute address `addr`.
    ///
    /// # Errors
    ///
    /// Returns error if `addr` is unaligned or outside the mapped window.
    fn write_register(&self, addr: u32, value: u32) -> Result<()>;
}

impl<T: HardwareBus + ?Sized> HardwareBus for &T {
    fn read_register(&self, addr: u32) -> Result<u32> {
        (**self).read_register(addr)
    }

    fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        (**self).write_register(addr, value)
    }
}

impl<T: HardwareBus + ?Sized> HardwareBus for Arc<T> {
    fn read_register(&self, addr: u32) -> Result<u32> {
        (**self).read_register(addr)
    }

    fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        (**self).write_register(addr, value)
    }
}

impl<T: HardwareBus + ?Sized> HardwareBus for Box<T> {
    fn read_register(&self, addr: u32) -> Result<u32> {
        (**self).read_register(addr)
    }

    fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        (**self).write_register(addr, value)
    }
}

/// Host side of the co-processor command protocol.
///
/// Not internally synchronised: callers serialise their own commands.
#[derive(Debug)]
pub struct CommandBus<B> {
    bus: B,
    regs: HostRegisterMap,
}

impl<B: HardwareBus> CommandBus<B> {
    /// Command bus over `bus` using the host register map `regs`.
    pub const fn new(bus: B, regs: HostRegisterMap) -> Self {
        Self { bus, regs }
    }

    /// Raw register read.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn read_register(&self, addr: u32) -> Result<u32> {
        self.bus.read_register(addr)
    }

    /// Raw register write.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        self.bus.write_register(addr, value)
    }

    /// True if the co-processor reports busy.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn is_busy(&self) -> Result<bool> {
        Ok(self.bus.read_register(self.regs.coproc_status)? & status::BUSY != 0)
    }

    /// Hand a command to the co-processor.
    ///
    /// Reads the status register first; if busy, returns
    /// [`KriaError::DeviceBusy`] without writing anything. Otherwise writes
    /// the data address, then `param << 16 | opcode` to the command register,
    /// then asserts the interrupt. There is no queue: a rejected command is
    /// gone and must be reissued by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::DeviceBusy`] or propagates bus errors.
    pub fn send_command(&self, opcode: Opcode, data_address: u32, param: u16) -> Result<()> {
        if self.is_busy()? {
            tracing::warn!("Co-processor busy, dropping {opcode:?}");
            return Err(KriaError::device_busy("co-processor"));
        }

        let word = CommandWord::pack(opcode.code(), param);
        self.bus.write_register(self.regs.coproc_data_addr, data_address)?;
        self.bus.write_register(self.regs.coproc_cmd, word.0)?;
        self.bus.write_register(self.regs.coproc_irq, irq::TRIGGER)?;

        tracing::debug!("Sent {opcode:?} data={data_address:#010x} param={param:#06x}");
        Ok(())
    }

    /// Ask the co-processor to publish its processed-frame counter.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::DeviceBusy`] or propagates bus errors.
    pub fn request_results(&self) -> Result<()> {
        self.send_command(Opcode::GetResults, 0, 0)
    }

    /// Read the co-processor's result register.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn read_result(&self) -> Result<u32> {
        self.bus.read_register(self.regs.coproc_result)
    }

    /// Register map in use.
    pub const fn regs(&self) -> &HostRegisterMap {
        &self.regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FakeRegisterFile;

    #[test]
    fn command_write_order() {
        let regs = HostRegisterMap::default();
        let fake = FakeRegisterFile::new();
        let bus = CommandBus::new(&fake, regs);

        bus.send_command(Opcode::ProcessFrame, 0x7100_0000, 0xF087).unwrap();

        assert_eq!(
            fake.writes(),
            vec![
                (regs.coproc_data_addr, 0x7100_0000),
                (regs.coproc_cmd, 0xF087_0001),
                (regs.coproc_irq, 1),
            ]
        );
    }

    #[test]
    fn busy_device_sees_no_writes() {
        let regs = HostRegisterMap::default();
        let fake = FakeRegisterFile::new();
        fake.set(regs.coproc_status, status::BUSY);
        let before = fake.snapshot();

        let bus = CommandBus::new(&fake, regs);
        for op in [Opcode::ProcessFrame, Opcode::UpdateParams, Opcode::GetResults] {
            let err = bus.send_command(op, 0x7100_0000, 0x1234).unwrap_err();
            assert!(err.is_busy(), "{op:?}: {err}");
        }

        assert!(fake.writes().is_empty());
        assert_eq!(fake.snapshot(), before);
    }

    #[test]
    fn only_bit_zero_means_busy() {
        let regs = HostRegisterMap::default();
        let fake = FakeRegisterFile::new();
        fake.set(regs.coproc_status, 0xFFFF_FFFE);
        let bus = CommandBus::new(&fake, regs);
        assert!(!bus.is_busy().unwrap());
        assert!(bus.request_results().is_ok());
    }
}
