//! Shared arena layout.
//!
//! ```text
//! Offset       Region                 Sized for
//! ──────────── ────────────────────── ─────────────────────────────────
//! +0x0000000   input frame            1920 × 1080 × 3 B   (6.2 MB)
//! +0x1000000   DPU output tensor      25200 × 85 × 4 B    (8.6 MB)
//! +0x2000000   postprocess scratch    (unused)
//! +0x3000000   result buffer          (1 + 100 × 6) × 4 B
//! ```

/// Physical base address of the arena on the reference board.
pub const BASE: u32 = 0x7000_0000;

/// Arena size on the reference board (256 MB).
pub const SIZE: u32 = 0x1000_0000;

/// Input frame offset.
pub const INPUT_OFFSET: u32 = 0x000_0000;

/// DPU output tensor offset.
pub const TENSOR_OFFSET: u32 = 0x100_0000;

/// Postprocess scratch offset.
pub const SCRATCH_OFFSET: u32 = 0x200_0000;

/// Result buffer offset.
pub const RESULT_OFFSET: u32 = 0x300_0000;

/// Shape of the DPU output tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorGeometry {
    /// Anchor records in the tensor.
    pub anchors: usize,
    /// Values per anchor record (4 box + 1 objectness + classes).
    pub values_per_anchor: usize,
}

impl TensorGeometry {
    /// Box values at the start of every record.
    pub const BOX_VALUES: usize = 4;

    /// Index of the object confidence within a record.
    pub const OBJECTNESS_INDEX: usize = 4;

    /// Index of the first class score within a record.
    pub const CLASS_START: usize = 5;

    /// The reference detector: 25200 anchors, 80 classes.
    pub const YOLO_80: Self = Self::with_classes(25_200, 80);

    /// Geometry for `anchors` records of `classes` class scores each.
    #[must_use]
    pub const fn with_classes(anchors: usize, classes: usize) -> Self {
        Self {
            anchors,
            values_per_anchor: Self::CLASS_START + classes,
        }
    }

    /// Class scores per record.
    #[must_use]
    pub const fn classes(&self) -> usize {
        self.values_per_anchor.saturating_sub(Self::CLASS_START)
    }

    /// `f32` values in the whole tensor.
    #[must_use]
    pub const fn value_count(&self) -> usize {
        self.anchors * self.values_per_anchor
    }

    /// Tensor size in bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.value_count() * 4
    }
}
