use kria_chip::arena::TensorGeometry;

/// Thresholds and tensor shape for one postprocessing pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessConfig {
    /// Shape of the DPU output tensor.
    pub tensor: TensorGeometry,
    /// Anchors with object confidence above this become candidates.
    pub object_threshold: f32,
    /// NMS ignores candidates below this confidence.
    pub confidence_threshold: f32,
    /// NMS suppresses pairs overlapping above this IoU.
    pub iou_threshold: f32,
    /// Packer writes only candidates above this confidence.
    pub pack_threshold: f32,
}

impl PostprocessConfig {
    /// Reference configuration for a given tensor shape.
    pub const fn for_tensor(tensor: TensorGeometry) -> Self {
        Self {
            tensor,
            object_threshold: 0.25,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            pack_threshold: 0.5,
        }
    }
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self::for_tensor(TensorGeometry::YOLO_80)
    }
}
