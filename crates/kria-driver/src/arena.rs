//! Shared memory arena
//!
//! The arena belongs to no single core. Each sub-region is handed between
//! host, DPU and co-processor by the command/status handshake, so code here
//! only guarantees the offset arithmetic: every view is computed once from a
//! validated [`ArenaLayout`] and is bounds-checked against it.
//!
//! ```text
//! base ─▶ ┌──────────────┐ input_offset
//!         │ frame        │  ≥ max_frame bytes
//!         ├──────────────┤ tensor_offset
//!         │ tensor       │  ≥ anchors × values × 4
//!         ├──────────────┤ scratch_offset
//!         │ scratch      │  (unused)
//!         ├──────────────┤ result_offset
//!         │ result       │  ≥ (1 + 100 × 6) × 4
//!         └──────────────┘ base + size
//! ```

use crate::error::{KriaError, Result};
use crate::mmio::PhysMapping;
use kria_chip::arena::{self as layout, TensorGeometry};
use kria_chip::command::FrameGeometry;
use kria_chip::result::{self as result_format, MAX_DETECTIONS};
use std::ops::Range;
use std::path::Path;

/// Page granularity used when packing compact layouts.
const PAGE: u32 = 4096;

/// Arena placement and sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Physical base address.
    pub base: u32,
    /// Total size in bytes.
    pub size: u32,
    /// Input frame offset from `base`.
    pub input_offset: u32,
    /// DPU output tensor offset from `base`.
    pub tensor_offset: u32,
    /// Scratch offset from `base`.
    pub scratch_offset: u32,
    /// Result buffer offset from `base`.
    pub result_offset: u32,
    /// Largest frame the input region must hold.
    pub max_frame: FrameGeometry,
    /// Tensor the output region must hold.
    pub tensor: TensorGeometry,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            base: layout::BASE,
            size: layout::SIZE,
            input_offset: layout::INPUT_OFFSET,
            tensor_offset: layout::TENSOR_OFFSET,
            scratch_offset: layout::SCRATCH_OFFSET,
            result_offset: layout::RESULT_OFFSET,
            max_frame: FrameGeometry::FULL_HD,
            tensor: TensorGeometry::YOLO_80,
        }
    }
}

fn page_align(n: usize) -> Result<u32> {
    let page = PAGE as usize;
    let rounded = n
        .checked_add(page - 1)
        .map(|v| v / page * page)
        .and_then(|v| u32::try_from(v).ok());
    rounded.ok_or_else(|| KriaError::arena_layout(format!("{n} bytes exceeds 32-bit arena")))
}

impl ArenaConfig {
    /// Smallest page-aligned layout for `max_frame` and `tensor`, in the
    /// same region order as the reference board. Scratch gets one page.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::ArenaLayout`] if the layout exceeds 32 bits.
    pub fn compact(base: u32, max_frame: FrameGeometry, tensor: TensorGeometry) -> Result<Self> {
        let input_offset = 0;
        let tensor_offset = input_offset + page_align(max_frame.byte_len())?;
        let scratch_offset = tensor_offset
            .checked_add(page_align(tensor.byte_len())?)
            .ok_or_else(|| KriaError::arena_layout("tensor region overflows"))?;
        let result_offset = scratch_offset + PAGE;
        let size = result_offset
            .checked_add(page_align(result_format::byte_len(MAX_DETECTIONS))?)
            .ok_or_else(|| KriaError::arena_layout("result region overflows"))?;
        Ok(Self {
            base,
            size,
            input_offset,
            tensor_offset,
            scratch_offset,
            result_offset,
            max_frame,
            tensor,
        })
    }
}

/// Which sub-region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Input frame.
    Frame,
    /// DPU output tensor.
    Tensor,
    /// Postprocess scratch.
    Scratch,
    /// Result buffer.
    Result,
}

/// A validated sub-region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRegion {
    /// Which region.
    pub kind: RegionKind,
    /// Offset from the arena base.
    pub offset: u32,
    /// Bytes reserved up to the next region (or the arena end).
    pub capacity: usize,
    /// Bytes the payload needs.
    pub required: usize,
}

impl ArenaRegion {
    /// Byte range of the payload within the arena.
    pub const fn payload(&self) -> Range<usize> {
        self.offset as usize..self.offset as usize + self.required
    }
}

/// Offset table checked against the arena bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    config: ArenaConfig,
    regions: [ArenaRegion; 4],
}

impl ArenaLayout {
    /// Validate `config`.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::ArenaLayout`] if the arena wraps the 32-bit
    /// address space, an offset is unaligned, duplicated or past the end, or
    /// any region is smaller than its payload.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        if config.base % 4 != 0 || config.size % 4 != 0 {
            return Err(KriaError::arena_layout(format!(
                "base {:#x} and size {:#x} must be word aligned",
                config.base, config.size
            )));
        }
        if config.base.checked_add(config.size).is_none() {
            return Err(KriaError::arena_layout(format!(
                "arena {:#x}+{:#x} wraps the address space",
                config.base, config.size
            )));
        }

        let mut regions = [
            (RegionKind::Frame, config.input_offset, config.max_frame.byte_len()),
            (RegionKind::Tensor, config.tensor_offset, config.tensor.byte_len()),
            (RegionKind::Scratch, config.scratch_offset, 0),
            (
                RegionKind::Result,
                config.result_offset,
                result_format::byte_len(MAX_DETECTIONS),
            ),
        ];
        regions.sort_by_key(|&(_, offset, _)| offset);

        let mut validated = [ArenaRegion {
            kind: RegionKind::Frame,
            offset: 0,
            capacity: 0,
            required: 0,
        }; 4];
        for (i, &(kind, offset, required)) in regions.iter().enumerate() {
            if offset % 4 != 0 {
                return Err(KriaError::arena_layout(format!(
                    "{kind:?} offset {offset:#x} is not word aligned"
                )));
            }
            if offset >= config.size {
                return Err(KriaError::arena_layout(format!(
                    "{kind:?} offset {offset:#x} is outside arena of {:#x} bytes",
                    config.size
                )));
            }
            let end = regions.get(i + 1).map_or(config.size, |&(_, next, _)| next);
            if end == offset {
                return Err(KriaError::arena_layout(format!(
                    "{kind:?} shares offset {offset:#x} with another region"
                )));
            }
            let capacity = (end - offset) as usize;
            if capacity < required {
                return Err(KriaError::arena_layout(format!(
                    "{kind:?} region at {offset:#x} holds {capacity} bytes, needs {required}"
                )));
            }
            validated[i] = ArenaRegion {
                kind,
                offset,
                capacity,
                required,
            };
        }

        Ok(Self {
            config,
            regions: validated,
        })
    }

    /// Configuration this layout was built from.
    pub const fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Regions in address order.
    pub const fn regions(&self) -> &[ArenaRegion; 4] {
        &self.regions
    }

    /// Look up one region.
    pub fn region(&self, kind: RegionKind) -> ArenaRegion {
        // Every kind is inserted by new()
        self.regions
            .iter()
            .copied()
            .find(|r| r.kind == kind)
            .unwrap_or(self.regions[0])
    }

    /// Physical address of a region.
    pub fn phys_addr(&self, kind: RegionKind) -> u32 {
        self.config.base + self.region(kind).offset
    }

    /// Byte range for `len` bytes at physical `addr`, checked against the arena.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::Misaligned`] for unaligned addresses and
    /// [`KriaError::OutOfBounds`] if the range leaves the arena.
    pub fn translate(&self, addr: u32, len: usize) -> Result<Range<usize>> {
        if addr % 4 != 0 {
            return Err(KriaError::Misaligned {
                addr: u64::from(addr),
            });
        }
        let out_of_bounds = || KriaError::OutOfBounds {
            addr: u64::from(addr),
            len,
            limit: u64::from(self.config.base) + u64::from(self.config.size),
        };
        let start = addr.checked_sub(self.config.base).ok_or_else(out_of_bounds)? as usize;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > self.config.size as usize {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }
}

enum Storage {
    Owned(Vec<u32>),
    Mapped(PhysMapping),
}

/// The arena with typed views over its sub-regions.
pub struct SharedArena {
    layout: ArenaLayout,
    storage: Storage,
}

impl std::fmt::Debug for SharedArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match &self.storage {
            Storage::Owned(_) => "owned",
            Storage::Mapped(_) => "mapped",
        };
        f.debug_struct("SharedArena")
            .field("layout", &self.layout)
            .field("backing", &backing)
            .finish()
    }
}

impl SharedArena {
    /// Arena backed by a zeroed in-process buffer.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::ArenaLayout`] if `config` is invalid.
    pub fn owned(config: ArenaConfig) -> Result<Self> {
        let layout = ArenaLayout::new(config)?;
        let words = config.size as usize / 4;
        tracing::debug!("Allocating owned arena of {:#x} bytes", config.size);
        Ok(Self {
            layout,
            storage: Storage::Owned(vec![0u32; words]),
        })
    }

    /// Arena backed by physical memory.
    ///
    /// # Errors
    ///
    /// Returns [`KriaError::ArenaLayout`] if `config` is invalid or
    /// [`KriaError::HardwareUnavailable`] if the mapping fails.
    pub fn map(device: impl AsRef<Path>, config: ArenaConfig) -> Result<Self> {
        let layout = ArenaLayout::new(config)?;
        let mapping = PhysMapping::map(device, config.base, config.size as usize)?;
        Ok(Self {
            layout,
            storage: Storage::Mapped(mapping),
        })
    }

    /// Validated layout.
    pub const fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(words) => bytemuck::cast_slice(words),
            Storage::Mapped(mapping) => mapping.as_slice(),
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Owned(words) => bytemuck::cast_slice_mut(words),
            Storage::Mapped(mapping) => mapping.as_mut_slice(),
        }
    }

    fn payload(&self, kind: RegionKind) -> Range<usize> {
        self.layout.region(kind).payload()
    }

    /// Physical address of the input frame region.
    pub fn input_addr(&self) -> u32 {
        self.layout.phys_addr(RegionKind::Frame)
    }

    /// Physical address of the tensor region.
    pub fn tensor_addr(&self) -> u32 {
        self.layout.phys_addr(RegionKind::Tensor)
    }

    /// Physical address of the result region.
    pub fn result_addr(&self) -> u32 {
        self.layout.phys_addr(RegionKind::Result)
    }

    /// Input frame region, sized for the largest frame.
    pub fn frame_slice(&self) -> &[u8] {
        let range = self.payload(RegionKind::Frame);
        &self.bytes()[range]
    }

    /// Mutable input frame region.
    pub fn frame_slice_mut(&mut self) -> &mut [u8] {
        let range = self.payload(RegionKind::Frame);
        &mut self.bytes_mut()[range]
    }

    /// DPU output tensor.
    pub fn tensor_slice(&self) -> &[f32] {
        let range = self.payload(RegionKind::Tensor);
        bytemuck::cast_slice(&self.bytes()[range])
    }

    /// Mutable DPU output tensor (the DPU's side of the contract).
    pub fn tensor_slice_mut(&mut self) -> &mut [f32] {
        let range = self.payload(RegionKind::Tensor);
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[range])
    }

    /// Scratch region (unused by the current pipeline).
    pub fn scratch_slice(&self) -> &[u8] {
        let region = self.layout.region(RegionKind::Scratch);
        let start = region.offset as usize;
        &self.bytes()[start..start + region.capacity]
    }

    /// Result buffer words.
    pub fn result_slice(&self) -> &[u32] {
        let range = self.payload(RegionKind::Result);
        bytemuck::cast_slice(&self.bytes()[range])
    }

    /// Mutable result buffer words.
    pub fn result_slice_mut(&mut self) -> &mut [u32] {
        let range = self.payload(RegionKind::Result);
        bytemuck::cast_slice_mut(&mut self.bytes_mut()[range])
    }

    /// `value_count` tensor values at physical `addr` together with the
    /// result buffer, for a postprocessing pass fed an address over the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor range is unaligned, leaves the arena or
    /// overlaps the result buffer.
    pub fn tensor_and_result_at(
        &mut self,
        addr: u32,
        value_count: usize,
    ) -> Result<(&[f32], &mut [u32])> {
        let tensor = self.layout.translate(addr, value_count * 4)?;
        let result = self.payload(RegionKind::Result);
        if tensor.start < result.end && result.start < tensor.end {
            return Err(KriaError::arena_layout(format!(
                "tensor at {addr:#010x} overlaps the result buffer"
            )));
        }

        let bytes = self.bytes_mut();
        let (tensor_bytes, result_bytes) = if tensor.end <= result.start {
            let (lo, hi) = bytes.split_at_mut(result.start);
            (&lo[tensor], &mut hi[..result.len()])
        } else {
            let (lo, hi) = bytes.split_at_mut(tensor.start);
            (&hi[..tensor.len()], &mut lo[result])
        };
        Ok((
            bytemuck::cast_slice(tensor_bytes),
            bytemuck::cast_slice_mut(result_bytes),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small() -> ArenaConfig {
        let frame = FrameGeometry::new(64, 48);
        ArenaConfig::compact(0x7000_0000, frame, TensorGeometry::with_classes(16, 3)).unwrap()
    }

    #[test]
    fn reference_layout_is_valid() {
        let layout = ArenaLayout::new(ArenaConfig::default()).unwrap();
        assert_eq!(layout.phys_addr(RegionKind::Frame), 0x7000_0000);
        assert_eq!(layout.phys_addr(RegionKind::Tensor), 0x7100_0000);
        assert_eq!(layout.phys_addr(RegionKind::Scratch), 0x7200_0000);
        assert_eq!(layout.phys_addr(RegionKind::Result), 0x7300_0000);
        assert_eq!(layout.region(RegionKind::Result).capacity, 0xD00_0000);
    }

    #[test]
    fn undersized_tensor_region_fails() {
        let config = ArenaConfig {
            scratch_offset: layout::TENSOR_OFFSET + 0x10_0000,
            ..ArenaConfig::default()
        };
        let err = ArenaLayout::new(config).unwrap_err();
        assert!(err.to_string().contains("Tensor"), "{err}");
    }

    #[test]
    fn duplicate_offsets_fail() {
        let config = ArenaConfig {
            scratch_offset: layout::RESULT_OFFSET,
            ..ArenaConfig::default()
        };
        assert!(ArenaLayout::new(config).is_err());
    }

    #[test]
    fn wrapping_arena_fails() {
        let config = ArenaConfig {
            base: 0xF800_0000,
            ..ArenaConfig::default()
        };
        assert!(ArenaLayout::new(config).is_err());
    }

    #[test]
    fn views_have_payload_sizes() {
        let config = small();
        let arena = SharedArena::owned(config).unwrap();
        assert_eq!(arena.frame_slice().len(), 64 * 48 * 3);
        assert_eq!(arena.tensor_slice().len(), 16 * 8);
        assert_eq!(arena.result_slice().len(), result_format::word_len(MAX_DETECTIONS));
        assert_eq!(arena.scratch_slice().len(), PAGE as usize);
        assert_eq!(arena.input_addr(), 0x7000_0000);
        assert_eq!(arena.tensor_addr(), 0x7000_3000);
    }

    #[test]
    fn writes_land_in_their_region_only() {
        let mut arena = SharedArena::owned(small()).unwrap();
        arena.tensor_slice_mut().fill(1.5);
        arena.result_slice_mut()[0] = 7;
        assert!(arena.frame_slice().iter().all(|&b| b == 0));
        assert!(arena.scratch_slice().iter().all(|&b| b == 0));
        assert!(arena.tensor_slice().iter().all(|&v| v == 1.5));
        assert_eq!(arena.result_slice()[0], 7);
    }

    #[test]
    fn tensor_and_result_split() {
        let mut arena = SharedArena::owned(small()).unwrap();
        arena.tensor_slice_mut()[3] = 0.75;
        let addr = arena.tensor_addr();
        let (tensor, result) = arena.tensor_and_result_at(addr, 16 * 8).unwrap();
        assert_eq!(tensor[3], 0.75);
        result[0] = 2;
        assert_eq!(arena.result_slice()[0], 2);
    }

    #[test]
    fn bus_addresses_are_checked() {
        let mut arena = SharedArena::owned(small()).unwrap();
        let base = arena.layout().config().base;
        let size = arena.layout().config().size;
        let result = arena.result_addr();

        assert!(matches!(
            arena.tensor_and_result_at(base - 4, 1),
            Err(KriaError::OutOfBounds { .. })
        ));
        assert!(matches!(
            arena.tensor_and_result_at(base + 2, 1),
            Err(KriaError::Misaligned { .. })
        ));
        assert!(arena.tensor_and_result_at(base + size - 4, 2).is_err());
        assert!(matches!(
            arena.tensor_and_result_at(result, 4),
            Err(KriaError::ArenaLayout { .. })
        ));
    }

    proptest! {
        #[test]
        fn any_size_either_fails_or_partitions(size_pages in 1u32..0x10000) {
            let config = ArenaConfig { size: size_pages * PAGE, ..ArenaConfig::default() };
            let needed = layout::RESULT_OFFSET as usize + result_format::byte_len(MAX_DETECTIONS);
            match ArenaLayout::new(config) {
                Ok(layout) => {
                    prop_assert!(config.size as usize >= needed);
                    let regions = layout.regions();
                    for (i, a) in regions.iter().enumerate() {
                        prop_assert!(a.offset as usize + a.capacity <= config.size as usize);
                        prop_assert!(a.required <= a.capacity);
                        for b in &regions[i + 1..] {
                            let (ar, br) = (a.payload(), b.payload());
                            prop_assert!(ar.end <= br.start || br.end <= ar.start);
                        }
                    }
                }
                Err(_) => prop_assert!((config.size as usize) < needed),
            }
        }
    }
}
