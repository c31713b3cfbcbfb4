//! Board bring-up: map the register window and the shared arena.

use crate::arena::{ArenaConfig, SharedArena};
use crate::error::{KriaError, Result};
use crate::mmio::{MmioWindow, DEV_MEM, PAGE_SIZE};
use kria_chip::regs::{HostRegisterMap, HOST_WINDOW_SIZE};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where the board's resources live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Physical memory device.
    pub device: PathBuf,
    /// Host view of the register map.
    pub regs: HostRegisterMap,
    /// Bytes mapped from the lowest register base.
    pub window_size: u32,
    /// Shared arena placement.
    pub arena: ArenaConfig,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEV_MEM),
            regs: HostRegisterMap::default(),
            window_size: HOST_WINDOW_SIZE,
            arena: ArenaConfig::default(),
        }
    }
}

impl BoardConfig {
    /// Base of the single register window covering every register in `regs`.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::HardwareUnavailable`] if the registers span more
    /// than `window_size` bytes.
    pub fn window_base(&self) -> Result<u32> {
        let all = self.regs.all();
        let lo = all.iter().copied().min().unwrap_or(0);
        let hi = all.iter().copied().max().unwrap_or(0);
        let base = lo & !(PAGE_SIZE - 1);
        let span = u64::from(hi) - u64::from(base) + 4;
        if span > u64::from(self.window_size) {
            return Err(KriaError::hardware_unavailable(format!(
                "registers span {span:#x} bytes, window is {:#x}",
                self.window_size
            )));
        }
        Ok(base)
    }
}

/// Mapped board resources.
#[derive(Debug)]
pub struct Board {
    /// Register window shared by the pipeline's command bus and DPU handle.
    pub registers: Arc<MmioWindow>,
    /// Shared arena.
    pub arena: SharedArena,
}

/// Map registers and arena.
///
/// # Errors
///
/// Returns [`KriaError::HardwareUnavailable`] if either mapping cannot be
/// established, or [`KriaError::ArenaLayout`] for an invalid arena.
pub fn open_board(config: &BoardConfig) -> Result<Board> {
    let base = config.window_base()?;
    let registers = Arc::new(MmioWindow::open(&config.device, base, config.window_size)?);
    let arena = SharedArena::map(&config.device, config.arena)?;
    info!(
        "Board open: registers at {base:#010x}, arena at {:#010x}+{:#x}",
        config.arena.base, config.arena.size
    );
    Ok(Board { registers, arena })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_covers_both_devices() {
        assert_eq!(BoardConfig::default().window_base().unwrap(), 0xA000_0000);
    }

    #[test]
    fn scattered_registers_are_rejected() {
        let config = BoardConfig {
            regs: HostRegisterMap::new(0xA000_0000, 0xB000_0000),
            ..BoardConfig::default()
        };
        assert!(matches!(
            config.window_base(),
            Err(KriaError::HardwareUnavailable { .. })
        ));
    }

    #[test]
    fn missing_device_is_unavailable() {
        let config = BoardConfig {
            device: PathBuf::from("/nonexistent/kria-mem"),
            ..BoardConfig::default()
        };
        assert!(matches!(
            open_board(&config),
            Err(KriaError::HardwareUnavailable { .. })
        ));
    }

    #[test]
    #[ignore] // Requires hardware
    fn open_real_board() {
        let board = open_board(&BoardConfig::default()).unwrap();
        assert_eq!(board.arena.input_addr(), 0x7000_0000);
    }
}
