//! Result buffer packing
//!
//! The packer applies its own confidence gate (`> threshold`) on top of the
//! NMS gate (`>= threshold`), so a candidate NMS retained can still be left
//! out of the buffer. The count word always equals the records written.

use crate::detection::{BoundingBox, Detection, DetectionResultSet};
use crate::error::{DetectError, Result};
use kria_chip::result::{self, MAX_DETECTIONS, RECORD_WORDS};
use tracing::trace;

/// Writes retained detections into result-buffer words.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultPacker {
    threshold: f32,
}

impl ResultPacker {
    /// Packer writing detections with confidence above `threshold`.
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Pack `detections` into `out`, returning the count written.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::ResultBufferTooSmall`] if `out` cannot hold the
    /// header plus every record that passes the gate. Nothing is written in
    /// that case.
    pub fn pack(&self, detections: &[Detection], out: &mut [u32]) -> Result<usize> {
        let count = detections
            .iter()
            .filter(|d| d.confidence > self.threshold)
            .take(MAX_DETECTIONS)
            .count();
        let needed = result::word_len(count);
        if out.len() < needed {
            return Err(DetectError::ResultBufferTooSmall {
                got: out.len(),
                needed,
            });
        }

        let passing = detections
            .iter()
            .filter(|d| d.confidence > self.threshold)
            .take(count);
        for (record, d) in out[result::HEADER_WORDS..needed]
            .chunks_exact_mut(RECORD_WORDS)
            .zip(passing)
        {
            record.copy_from_slice(&[
                d.bbox.x.to_bits(),
                d.bbox.y.to_bits(),
                d.bbox.w.to_bits(),
                d.bbox.h.to_bits(),
                d.confidence.to_bits(),
                d.class_id,
            ]);
        }
        // Count is bounded by MAX_DETECTIONS
        #[allow(clippy::cast_possible_truncation)]
        {
            out[0] = count as u32;
        }

        trace!("Packed {count} of {} detections", detections.len());
        Ok(count)
    }
}

/// Parse a packed result buffer.
///
/// # Errors
///
/// Returns [`DetectError::MalformedResult`] if the count exceeds
/// [`MAX_DETECTIONS`] or the buffer is shorter than the count implies.
pub fn parse_results(words: &[u32]) -> Result<DetectionResultSet> {
    let Some(&count) = words.first() else {
        return Err(DetectError::malformed("missing count word"));
    };
    let count = count as usize;
    if count > MAX_DETECTIONS {
        return Err(DetectError::malformed(format!(
            "count {count} exceeds capacity {MAX_DETECTIONS}"
        )));
    }
    let needed = result::word_len(count);
    if words.len() < needed {
        return Err(DetectError::malformed(format!(
            "count {count} needs {needed} words, buffer has {}",
            words.len()
        )));
    }

    let mut set = DetectionResultSet::new();
    for r in words[result::HEADER_WORDS..needed].chunks_exact(RECORD_WORDS) {
        let bbox = BoundingBox::new(
            f32::from_bits(r[0]),
            f32::from_bits(r[1]),
            f32::from_bits(r[2]),
            f32::from_bits(r[3]),
        );
        // Bounded by the capacity check above
        let _ = set.push(Detection::new(bbox, f32::from_bits(r[4]), r[5]));
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nms::NmsEngine;

    fn det(confidence: f32, class_id: u32) -> Detection {
        Detection::new(BoundingBox::new(12.5, 7.0, 30.25, 40.0), confidence, class_id)
    }

    #[test]
    fn layout_matches_result_format() {
        let mut out = vec![0u32; result::word_len(2)];
        let n = ResultPacker::new(0.5)
            .pack(&[det(0.9, 3), det(0.75, 17)], &mut out)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(out[0], 2);
        assert_eq!(out[1], 12.5f32.to_bits());
        assert_eq!(out[5], 0.9f32.to_bits());
        assert_eq!(out[6], 3);
        assert_eq!(out[11], 0.75f32.to_bits());
        assert_eq!(out[12], 17);
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let dets = [
            Detection::new(BoundingBox::new(0.0, 1.5, 2.25, 3.125), 0.51, 0),
            Detection::new(BoundingBox::new(1919.0, 1079.0, 1.0, 1.0), 1.0, 79),
        ];
        let mut out = vec![0u32; result::word_len(MAX_DETECTIONS)];
        ResultPacker::new(0.5).pack(&dets, &mut out).unwrap();
        let parsed = parse_results(&out).unwrap();
        assert_eq!(parsed.as_slice(), &dets);
    }

    #[test]
    fn double_gate_drops_exact_threshold() {
        // 0.6 clears both gates; 0.5 clears NMS (>=) but not the packer (>)
        let cands = [
            Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.6, 1),
            Detection::new(BoundingBox::new(100.0, 100.0, 10.0, 10.0), 0.5, 2),
        ];
        let retained = NmsEngine::new(0.5, 0.45).apply(&cands.iter().copied().collect());
        assert_eq!(retained.len(), 2);

        let mut out = vec![0u32; result::word_len(2)];
        let n = ResultPacker::new(0.5).pack(retained.as_slice(), &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0], 1);
        assert_eq!(parse_results(&out).unwrap().as_slice(), &cands[..1]);
    }

    #[test]
    fn stricter_pack_gate_excludes_nms_survivor() {
        let cands = [det(0.6, 1)];
        let retained = NmsEngine::new(0.5, 0.45).apply(&cands.iter().copied().collect());
        assert_eq!(retained.len(), 1);

        let mut out = vec![0xDEAD_BEEF; result::word_len(1)];
        let n = ResultPacker::new(0.65).pack(retained.as_slice(), &mut out).unwrap();
        assert_eq!(n, 0);
        assert_eq!(out[0], 0);
        assert!(parse_results(&out).unwrap().is_empty());
    }

    #[test]
    fn undersized_buffer_is_untouched() {
        let mut out = vec![7u32; 3];
        let err = ResultPacker::new(0.5).pack(&[det(0.9, 0)], &mut out).unwrap_err();
        assert_eq!(err, DetectError::ResultBufferTooSmall { got: 3, needed: 7 });
        assert_eq!(out, vec![7, 7, 7]);
    }

    #[test]
    fn parse_rejects_inconsistent_buffers() {
        assert!(parse_results(&[]).is_err());
        assert!(parse_results(&[101]).is_err());
        assert!(parse_results(&[1, 0, 0]).is_err());
        assert!(parse_results(&[0]).unwrap().is_empty());
    }
}
