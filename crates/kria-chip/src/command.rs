//! Command word format.
//!
//! ```text
//!  31            16 15             0
//! ┌────────────────┬────────────────┐
//! │     param      │     opcode     │
//! └────────────────┴────────────────┘
//! ```
//!
//! `ProcessFrame` carries the frame geometry in `param` as two bytes, each
//! counting 8-pixel units (`width / 8` high, `height / 8` low).

/// Co-processor opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Decode, suppress and pack the tensor at the data address.
    ProcessFrame = 0x01,
    /// Reserved for algorithm parameter updates.
    UpdateParams = 0x02,
    /// Publish the processed-frame counter in the result register.
    GetResults = 0x03,
}

impl Opcode {
    /// Raw opcode value.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Decode a raw opcode; `None` for unassigned codes.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0x01 => Some(Self::ProcessFrame),
            0x02 => Some(Self::UpdateParams),
            0x03 => Some(Self::GetResults),
            _ => None,
        }
    }
}

/// A packed command register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandWord(pub u32);

impl CommandWord {
    /// Pack `param` into the high half and `opcode` into the low half.
    #[must_use]
    pub const fn pack(opcode: u16, param: u16) -> Self {
        Self(((param as u32) << 16) | opcode as u32)
    }

    /// Low 16 bits.
    #[must_use]
    pub const fn opcode(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// High 16 bits.
    #[must_use]
    pub const fn param(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

/// Granularity of frame dimensions carried in a `ProcessFrame` param.
pub const FRAME_DIM_UNIT: u32 = 8;

/// Largest dimension a `ProcessFrame` param can carry.
pub const MAX_PARAM_DIM: u32 = 0xFF * FRAME_DIM_UNIT;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameGeometry {
    /// Interleaved channels per pixel.
    pub const CHANNELS: u32 = 3;

    /// Largest frame the reference arena is sized for.
    pub const FULL_HD: Self = Self::new(1920, 1080);

    /// Create a geometry.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Frame size in bytes (`width × height × 3`).
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::CHANNELS as usize
    }

    /// Whether this geometry survives a round trip through a command param.
    #[must_use]
    pub const fn fits_param(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.width % FRAME_DIM_UNIT == 0
            && self.height % FRAME_DIM_UNIT == 0
            && self.width <= MAX_PARAM_DIM
            && self.height <= MAX_PARAM_DIM
    }

    /// Encode as a `ProcessFrame` param; `None` if [`Self::fits_param`] fails.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn to_param(&self) -> Option<u16> {
        if !self.fits_param() {
            return None;
        }
        let w = (self.width / FRAME_DIM_UNIT) as u16;
        let h = (self.height / FRAME_DIM_UNIT) as u16;
        Some((w << 8) | h)
    }

    /// Decode a `ProcessFrame` param.
    #[must_use]
    pub const fn from_param(param: u16) -> Self {
        Self {
            width: (param >> 8) as u32 * FRAME_DIM_UNIT,
            height: (param & 0xFF) as u32 * FRAME_DIM_UNIT,
        }
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_layout() {
        let word = CommandWord::pack(Opcode::ProcessFrame.code(), 0xF087);
        assert_eq!(word.0, 0xF087_0001);
        assert_eq!(word.opcode(), 0x01);
        assert_eq!(word.param(), 0xF087);
    }

    #[test]
    fn full_hd_param() {
        let param = FrameGeometry::FULL_HD.to_param().unwrap();
        assert_eq!(param, (240 << 8) | 135);
        assert_eq!(FrameGeometry::from_param(param), FrameGeometry::FULL_HD);
    }

    #[test]
    fn unrepresentable_geometry() {
        assert_eq!(FrameGeometry::new(1921, 1080).to_param(), None);
        assert_eq!(FrameGeometry::new(0, 8).to_param(), None);
        assert_eq!(FrameGeometry::new(4096, 8).to_param(), None);
        assert!(FrameGeometry::new(MAX_PARAM_DIM, 8).fits_param());
    }

    #[test]
    fn opcode_codes() {
        for op in [Opcode::ProcessFrame, Opcode::UpdateParams, Opcode::GetResults] {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
        }
        assert_eq!(Opcode::from_code(0x7F), None);
    }
}
