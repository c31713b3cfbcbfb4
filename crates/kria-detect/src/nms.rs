//! Non-maximum suppression
//!
//! Greedy single pass over candidates **in decode order**, not sorted by
//! confidence. For every pair `(i, j)` with `i < j` and both at or above the
//! confidence threshold, an overlap above the IoU threshold suppresses the
//! lower-confidence member; on equal confidence the earlier one survives.
//! Once `i` loses a pair it stops suppressing later candidates.
//!
//! Output order and counts must match what the packed result format has
//! always carried, so the pass is not reordered.

use crate::decoder::CandidateList;
use crate::detection::{iou, Detection, DetectionResultSet};
use tracing::debug;

/// Kept flags for one suppression pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suppression {
    /// `keep[i]` is false once candidate `i` lost an overlap.
    pub keep: Vec<bool>,
    /// Candidates that pass the confidence gate and are still kept.
    pub retained: usize,
}

/// Suppression thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsEngine {
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl NmsEngine {
    /// Engine ignoring candidates below `confidence_threshold` and
    /// suppressing overlaps above `iou_threshold`.
    pub const fn new(confidence_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
        }
    }

    /// Confidence gate.
    pub const fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// IoU gate.
    pub const fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }

    fn passes(&self, d: &Detection) -> bool {
        d.confidence >= self.confidence_threshold
    }

    /// Run the pass and return per-candidate kept flags.
    pub fn suppress(&self, candidates: &[Detection]) -> Suppression {
        let mut keep = vec![true; candidates.len()];

        for (i, a) in candidates.iter().enumerate() {
            if !self.passes(a) {
                continue;
            }
            for (j, b) in candidates.iter().enumerate().skip(i + 1) {
                if !self.passes(b) {
                    continue;
                }
                if iou(&a.bbox, &b.bbox) <= self.iou_threshold {
                    continue;
                }
                if a.confidence >= b.confidence {
                    keep[j] = false;
                } else {
                    keep[i] = false;
                    break;
                }
            }
        }

        let retained = candidates
            .iter()
            .zip(&keep)
            .filter(|(d, k)| **k && self.passes(d))
            .count();

        debug!("NMS: {} candidates -> {retained} retained", candidates.len());
        Suppression { keep, retained }
    }

    /// Retained candidates in decode order.
    pub fn apply(&self, candidates: &CandidateList) -> DetectionResultSet {
        let Suppression { keep, .. } = self.suppress(candidates);
        let mut set = DetectionResultSet::new();
        for (d, k) in candidates.iter().zip(keep) {
            if k && self.passes(d) {
                // Input is capped at the same capacity as the set
                let _ = set.push(*d);
            }
        }
        set
    }
}
