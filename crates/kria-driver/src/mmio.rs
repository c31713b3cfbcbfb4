//! Physical memory mapping through `/dev/mem`
//!
//! Two users: [`MmioWindow`] for the device control blocks (volatile 32-bit
//! register access) and [`crate::arena::SharedArena`] for the shared arena
//! (plain byte views, handed between cores by the command protocol).
//!
//! Mappings use `O_SYNC` so the kernel maps the range uncached.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]

use crate::bus::HardwareBus;
use crate::error::{KriaError, Result};
use kria_chip::regs::REGISTER_BYTES;
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

/// Default physical memory device.
pub const DEV_MEM: &str = "/dev/mem";

/// Mapping granularity; physical bases must be multiples of this.
pub const PAGE_SIZE: u32 = 4096;

/// A mapped range of physical memory.
pub struct PhysMapping {
    ptr: NonNull<u8>,
    len: usize,
    phys_base: u32,
    _file: File,
}

impl std::fmt::Debug for PhysMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysMapping")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &self.len)
            .field("phys_base", &format_args!("{:#010x}", self.phys_base))
            .finish()
    }
}

// SAFETY: Send - PhysMapping owns the mapping exclusively. Moving between threads
// doesn't invalidate it (mmap'd memory is process-wide). No thread-local state.
unsafe impl Send for PhysMapping {}

// SAFETY: Sync - shared access only performs volatile register reads/writes,
// which are single machine accesses; byte views require &mut for writes.
unsafe impl Sync for PhysMapping {}

impl PhysMapping {
    /// Map `len` bytes of physical memory starting at `phys_base`.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::HardwareUnavailable`] if the device cannot be
    /// opened or the range cannot be mapped.
    pub fn map(device: impl AsRef<Path>, phys_base: u32, len: usize) -> Result<Self> {
        let device = device.as_ref();
        if len == 0 {
            return Err(KriaError::hardware_unavailable("zero-length mapping"));
        }
        if phys_base % PAGE_SIZE != 0 {
            return Err(KriaError::hardware_unavailable(format!(
                "{phys_base:#010x} is not page aligned"
            )));
        }

        // OFlags bits are small positive values
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(device)
            .map_err(|e| {
                KriaError::hardware_unavailable(format!("Cannot open {}: {e}", device.display()))
            })?;

        // SAFETY: mmap necessary for MMIO and shared memory access.
        // Invariants: (1) fd valid, just opened; (2) len non-zero (checked above);
        // (3) MAP_SHARED so device and other cores observe writes; (4) the file is
        // stored alongside the mapping and munmap runs in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                u64::from(phys_base),
            )
        }
        .map_err(|e| {
            KriaError::hardware_unavailable(format!(
                "Cannot map {len:#x} bytes at {phys_base:#010x}: {e}"
            ))
        })?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| KriaError::hardware_unavailable("mmap returned null"))?;

        tracing::info!(
            "Mapped {len:#x} bytes of physical memory at {phys_base:#010x} ({ptr:p})"
        );

        Ok(Self {
            ptr,
            len,
            phys_base,
            _file: file,
        })
    }

    /// Physical address of the first byte.
    pub const fn phys_base(&self) -> u32 {
        self.phys_base
    }

    /// Mapping length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for an empty mapping (never constructed by [`Self::map`]).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte view of the whole mapping.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the life of self (mmap in map()).
        // Concurrent writers are other cores; the command protocol hands each
        // sub-region to exactly one side at a time.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable byte view of the whole mapping.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as for as_slice; &mut self excludes other views in this process.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn register_offset(&self, addr: u32) -> Result<usize> {
        if addr % REGISTER_BYTES != 0 {
            return Err(KriaError::Misaligned {
                addr: u64::from(addr),
            });
        }
        let limit = u64::from(self.phys_base) + self.len as u64;
        let offset = addr
            .checked_sub(self.phys_base)
            .map(|o| o as usize)
            .filter(|o| o + REGISTER_BYTES as usize <= self.len)
            .ok_or(KriaError::OutOfBounds {
                addr: u64::from(addr),
                len: REGISTER_BYTES as usize,
                limit,
            })?;
        Ok(offset)
    }
}

impl Drop for PhysMapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len from the successful mmap in map(); Drop runs once and
        // no views outlive self.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.len);
        }
        tracing::debug!("Unmapped physical range at {:#010x}", self.phys_base);
    }
}

/// Host register window: the co-processor and DPU control blocks.
#[derive(Debug)]
pub struct MmioWindow {
    mapping: PhysMapping,
}

impl MmioWindow {
    /// Map `len` bytes of registers starting at physical `base`.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::HardwareUnavailable`] if the mapping fails.
    pub fn open(device: impl AsRef<Path>, base: u32, len: u32) -> Result<Self> {
        let mapping = PhysMapping::map(device, base, len as usize)?;
        Ok(Self { mapping })
    }

    /// Physical base of the window.
    pub const fn base(&self) -> u32 {
        self.mapping.phys_base()
    }
}

impl HardwareBus for MmioWindow {
    fn read_register(&self, addr: u32) -> Result<u32> {
        let offset = self.mapping.register_offset(addr)?;
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap, valid for len; (2) offset+4 <= len and
        // 4-byte aligned (register_offset); (3) no uninit reads.
        let value = unsafe {
            self.mapping
                .ptr
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .read_volatile()
        };
        fence(Ordering::Acquire);
        tracing::trace!("Read {addr:#010x} = {value:#x}");
        Ok(value)
    }

    fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        let offset = self.mapping.register_offset(addr)?;
        tracing::trace!("Write {addr:#010x} = {value:#x}");
        // Arena writes made before this register write must land first
        fence(Ordering::Release);
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+4 <= len; (3) u32 aligned.
        unsafe {
            self.mapping
                .ptr
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_hardware_unavailable() {
        let err = PhysMapping::map("/nonexistent/kria-mem", 0x7000_0000, 4096).unwrap_err();
        assert!(matches!(err, KriaError::HardwareUnavailable { .. }), "{err}");
    }

    #[test]
    fn zero_length_is_rejected() {
        assert!(PhysMapping::map(DEV_MEM, 0, 0).is_err());
    }

    #[test]
    fn unaligned_base_is_rejected() {
        let err = PhysMapping::map(DEV_MEM, 0x7000_0004, 4096).unwrap_err();
        assert!(err.to_string().contains("page aligned"), "{err}");
    }

    #[test]
    #[ignore] // Requires root and the board's physical map
    fn map_reference_register_window() {
        let window = MmioWindow::open(
            DEV_MEM,
            kria_chip::regs::RISCV_BASE,
            kria_chip::regs::HOST_WINDOW_SIZE,
        )
        .expect("map register window");
        let status = window
            .read_register(kria_chip::regs::RISCV_BASE + kria_chip::regs::coproc::STATUS)
            .expect("read status");
        println!("co-processor status: {status:#x}");
    }
}
