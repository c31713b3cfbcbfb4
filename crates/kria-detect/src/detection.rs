//! Detection records and box overlap.

use heapless::Vec as FixedVec;
use kria_chip::result::MAX_DETECTIONS;

/// Axis-aligned box in pixel units, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub w: f32,
    /// Height.
    pub h: f32,
}

impl BoundingBox {
    /// Create a box.
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Area (`w × h`).
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Right edge.
    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
}

/// Intersection over union of two boxes; 0 when the union is empty.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = (a.right().min(b.right()) - a.x.max(b.x)).max(0.0);
    let iy = (a.bottom().min(b.bottom()) - a.y.max(b.y)).max(0.0);
    let intersection = ix * iy;
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// One detected object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Detection {
    /// Box in pixels.
    pub bbox: BoundingBox,
    /// Object confidence × best class score, in `[0, 1]`.
    pub confidence: f32,
    /// Index of the best class.
    pub class_id: u32,
}

impl Detection {
    /// Create a detection.
    pub const fn new(bbox: BoundingBox, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Retained detections for one frame, in decode order, at most
/// [`MAX_DETECTIONS`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResultSet(FixedVec<Detection, MAX_DETECTIONS>);

impl DetectionResultSet {
    /// Empty set.
    pub const fn new() -> Self {
        Self(FixedVec::new())
    }

    /// Append a detection; hands it back when the set is full.
    ///
    /// # Errors
    ///
    /// Returns the detection if the set already holds [`MAX_DETECTIONS`].
    pub fn push(&mut self, detection: Detection) -> Result<(), Detection> {
        self.0.push(detection)
    }

    /// Number of detections.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no detections were retained.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Detections as a slice.
    pub fn as_slice(&self) -> &[Detection] {
        &self.0
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a DetectionResultSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn offset_boxes_overlap_at_068() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(1.0, 1.0, 10.0, 10.0);
        let v = iou(&a, &b);
        assert!((v - 81.0 / 119.0).abs() < 1e-6, "iou = {v}");
        assert!(v > 0.45);
    }

    #[test]
    fn disjoint_boxes_have_zero_overlap() {
        // Both axes disjoint: negative extents must not multiply to a positive area
        let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
        let b = BoundingBox::new(5.0, 5.0, 2.0, 2.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn degenerate_boxes() {
        let empty = BoundingBox::default();
        assert_eq!(iou(&empty, &empty), 0.0);
        let a = BoundingBox::new(3.0, 4.0, 5.0, 6.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn result_set_is_capped() {
        let mut set = DetectionResultSet::new();
        for i in 0..MAX_DETECTIONS {
            assert!(set.push(Detection::new(BoundingBox::default(), 0.9, i as u32)).is_ok());
        }
        assert!(set.push(Detection::default()).is_err());
        assert_eq!(set.len(), MAX_DETECTIONS);
    }

    fn any_box() -> impl Strategy<Value = BoundingBox> {
        (-100.0f32..2000.0, -100.0f32..2000.0, 0.0f32..500.0, 0.0f32..500.0)
            .prop_map(|(x, y, w, h)| BoundingBox::new(x, y, w, h))
    }

    proptest! {
        #[test]
        fn iou_is_symmetric(a in any_box(), b in any_box()) {
            prop_assert_eq!(iou(&a, &b), iou(&b, &a));
        }

        #[test]
        fn iou_is_a_ratio(a in any_box(), b in any_box()) {
            let v = iou(&a, &b);
            prop_assert!((0.0..=1.0 + 1e-6).contains(&v));
        }
    }
}
