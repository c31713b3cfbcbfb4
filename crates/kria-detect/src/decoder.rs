//! Detection decoder
//!
//! Walks the DPU tensor one anchor record at a time:
//!
//! ```text
//! record = [ x  y  w  h | objectness | class_0 … class_{K-1} ]
//!            normalised                scores
//! ```
//!
//! Anchors whose objectness clears the threshold become candidates until
//! [`MAX_DETECTIONS`] is reached. Later qualifying anchors are dropped, not
//! reported as an error; the drop count is returned so callers can log it.

use crate::detection::{BoundingBox, Detection};
use crate::error::{DetectError, Result};
use heapless::Vec as FixedVec;
use kria_chip::arena::TensorGeometry;
use kria_chip::command::FrameGeometry;
use kria_chip::result::MAX_DETECTIONS;
use tracing::{debug, warn};

/// Fixed-capacity candidate list produced by the decoder.
pub type CandidateList = FixedVec<Detection, MAX_DETECTIONS>;

/// Candidates for one frame plus the overflow count.
#[derive(Debug, Clone, Default)]
pub struct DecodeOutput {
    /// Candidates in anchor order.
    pub candidates: CandidateList,
    /// Qualifying anchors that did not fit.
    pub dropped: usize,
}

impl DecodeOutput {
    /// True if any qualifying anchor was dropped.
    pub const fn overflowed(&self) -> bool {
        self.dropped > 0
    }
}

/// Converts raw anchor records into pixel-space candidates.
#[derive(Debug, Clone, Copy)]
pub struct DetectionDecoder {
    geometry: TensorGeometry,
    object_threshold: f32,
}

impl DetectionDecoder {
    /// Decoder for `geometry`, keeping anchors with objectness above
    /// `object_threshold`.
    pub const fn new(geometry: TensorGeometry, object_threshold: f32) -> Self {
        Self {
            geometry,
            object_threshold,
        }
    }

    /// Tensor shape this decoder expects.
    pub const fn geometry(&self) -> TensorGeometry {
        self.geometry
    }

    /// Decode `tensor`, scaling boxes to `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::TensorTooShort`] if the tensor holds fewer
    /// values than the geometry requires.
    #[allow(clippy::cast_precision_loss, clippy::neg_cmp_op_on_partial_ord)]
    pub fn decode(&self, tensor: &[f32], frame: FrameGeometry) -> Result<DecodeOutput> {
        let expected = self.geometry.value_count();
        if tensor.len() < expected {
            return Err(DetectError::TensorTooShort {
                got: tensor.len(),
                expected,
            });
        }

        let width = frame.width as f32;
        let height = frame.height as f32;
        let mut out = DecodeOutput::default();

        for record in tensor[..expected].chunks_exact(self.geometry.values_per_anchor) {
            let objectness = record[TensorGeometry::OBJECTNESS_INDEX];
            // Negated `>` so NaN objectness is skipped
            if !(objectness > self.object_threshold) {
                continue;
            }
            if out.candidates.is_full() {
                out.dropped += 1;
                continue;
            }

            let (class_id, class_score) = best_class(&record[TensorGeometry::CLASS_START..]);
            let bbox = BoundingBox::new(
                record[0] * width,
                record[1] * height,
                record[2] * width,
                record[3] * height,
            );
            // Capacity checked above
            let _ = out
                .candidates
                .push(Detection::new(bbox, objectness * class_score, class_id));
        }

        if out.overflowed() {
            warn!(
                "Decode overflow: kept {MAX_DETECTIONS} candidates, dropped {}",
                out.dropped
            );
        }
        debug!(
            "Decoded {} candidates from {} anchors ({frame})",
            out.candidates.len(),
            self.geometry.anchors
        );
        Ok(out)
    }
}

/// Highest class score and its index; ties keep the earlier class, and a
/// row with no positive score reports class 0 with score 0.
#[allow(clippy::cast_possible_truncation)]
fn best_class(scores: &[f32]) -> (u32, f32) {
    let mut best = (0u32, 0.0f32);
    for (id, &score) in scores.iter().enumerate() {
        if score > best.1 {
            best = (id as u32, score);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSES: usize = 3;

    fn geometry(anchors: usize) -> TensorGeometry {
        TensorGeometry::with_classes(anchors, CLASSES)
    }

    fn record(bbox: [f32; 4], objectness: f32, scores: [f32; CLASSES]) -> Vec<f32> {
        let mut r = bbox.to_vec();
        r.push(objectness);
        r.extend_from_slice(&scores);
        r
    }

    #[test]
    fn scales_boxes_and_combines_confidence() {
        let tensor = record([0.5, 0.25, 0.1, 0.2], 0.8, [0.1, 0.9, 0.3]);
        let decoder = DetectionDecoder::new(geometry(1), 0.25);
        let out = decoder.decode(&tensor, FrameGeometry::new(640, 480)).unwrap();

        assert_eq!(out.candidates.len(), 1);
        let d = out.candidates[0];
        assert_eq!(d.bbox, BoundingBox::new(320.0, 120.0, 64.0, 96.0));
        assert_eq!(d.class_id, 1);
        assert!((d.confidence - 0.72).abs() < 1e-6);
        assert!(!out.overflowed());
    }

    #[test]
    fn objectness_threshold_is_strict() {
        let mut tensor = record([0.0; 4], 0.25, [1.0, 0.0, 0.0]);
        tensor.extend(record([0.0; 4], 0.2501, [1.0, 0.0, 0.0]));
        let decoder = DetectionDecoder::new(geometry(2), 0.25);
        let out = decoder.decode(&tensor, FrameGeometry::new(8, 8)).unwrap();
        assert_eq!(out.candidates.len(), 1);
    }

    #[test]
    fn nan_objectness_is_skipped() {
        let mut tensor = record([0.1; 4], f32::NAN, [1.0, 0.0, 0.0]);
        tensor.extend(record([0.1; 4], 0.1, [1.0, 0.0, 0.0]));
        let out = DetectionDecoder::new(geometry(2), 0.25)
            .decode(&tensor, FrameGeometry::new(8, 8))
            .unwrap();
        assert!(out.candidates.is_empty());
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn nan_objectness_does_not_take_capacity() {
        let anchors = MAX_DETECTIONS + 1;
        let mut tensor = record([0.1; 4], f32::NAN, [0.5, 0.0, 0.0]);
        for _ in 1..anchors {
            tensor.extend(record([0.1; 4], 0.9, [0.5, 0.0, 0.0]));
        }
        let out = DetectionDecoder::new(geometry(anchors), 0.25)
            .decode(&tensor, FrameGeometry::new(8, 8))
            .unwrap();
        assert_eq!(out.candidates.len(), MAX_DETECTIONS);
        assert_eq!(out.dropped, 0);
        assert!(out.candidates.iter().all(|d| d.confidence.is_finite()));
    }

    #[test]
    fn zero_scores_map_to_class_zero() {
        let tensor = record([0.0; 4], 0.9, [0.0, 0.0, 0.0]);
        let out = DetectionDecoder::new(geometry(1), 0.25)
            .decode(&tensor, FrameGeometry::new(8, 8))
            .unwrap();
        assert_eq!(out.candidates[0].class_id, 0);
        assert_eq!(out.candidates[0].confidence, 0.0);
    }

    #[test]
    fn never_exceeds_capacity() {
        let anchors = MAX_DETECTIONS + 37;
        let tensor: Vec<f32> = (0..anchors)
            .flat_map(|_| record([0.1; 4], 0.9, [0.5, 0.0, 0.0]))
            .collect();
        let out = DetectionDecoder::new(geometry(anchors), 0.25)
            .decode(&tensor, FrameGeometry::new(64, 64))
            .unwrap();
        assert_eq!(out.candidates.len(), MAX_DETECTIONS);
        assert_eq!(out.dropped, 37);
        assert!(out.overflowed());
    }

    #[test]
    fn ignores_trailing_values_beyond_geometry() {
        let mut tensor = record([0.1; 4], 0.9, [0.5, 0.0, 0.0]);
        tensor.extend(record([0.1; 4], 0.9, [0.5, 0.0, 0.0]));
        let out = DetectionDecoder::new(geometry(1), 0.25)
            .decode(&tensor, FrameGeometry::new(8, 8))
            .unwrap();
        assert_eq!(out.candidates.len(), 1);
    }

    #[test]
    fn short_tensor_is_rejected() {
        let err = DetectionDecoder::new(geometry(2), 0.25)
            .decode(&[0.0; 8], FrameGeometry::new(8, 8))
            .unwrap_err();
        assert_eq!(err, DetectError::TensorTooShort { got: 8, expected: 16 });
    }
}
