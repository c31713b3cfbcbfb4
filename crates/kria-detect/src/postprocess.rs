//! Decode → suppress → pack for one frame.

use crate::config::PostprocessConfig;
use crate::decoder::DetectionDecoder;
use crate::error::Result;
use crate::nms::NmsEngine;
use crate::packer::ResultPacker;
use kria_chip::command::FrameGeometry;
use tracing::debug;

/// Counts from one postprocessing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSummary {
    /// Candidates emitted by the decoder.
    pub candidates: usize,
    /// Qualifying anchors dropped at the decoder's capacity.
    pub dropped: usize,
    /// Candidates NMS retained.
    pub retained: usize,
    /// Records written to the result buffer.
    pub written: usize,
}

/// The co-processor's postprocessing chain.
#[derive(Debug, Clone, Copy)]
pub struct Postprocessor {
    decoder: DetectionDecoder,
    nms: NmsEngine,
    packer: ResultPacker,
}

impl Postprocessor {
    /// Build the chain from `config`.
    pub const fn new(config: &PostprocessConfig) -> Self {
        Self {
            decoder: DetectionDecoder::new(config.tensor, config.object_threshold),
            nms: NmsEngine::new(config.confidence_threshold, config.iou_threshold),
            packer: ResultPacker::new(config.pack_threshold),
        }
    }

    /// Decoder stage.
    pub const fn decoder(&self) -> &DetectionDecoder {
        &self.decoder
    }

    /// Run all three stages, writing into `result_words`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor is shorter than the configured
    /// geometry or `result_words` cannot hold the packed records.
    pub fn process(
        &self,
        tensor: &[f32],
        frame: FrameGeometry,
        result_words: &mut [u32],
    ) -> Result<FrameSummary> {
        let decoded = self.decoder.decode(tensor, frame)?;
        let retained = self.nms.apply(&decoded.candidates);
        let written = self.packer.pack(retained.as_slice(), result_words)?;

        let summary = FrameSummary {
            candidates: decoded.candidates.len(),
            dropped: decoded.dropped,
            retained: retained.len(),
            written,
        };
        debug!("Postprocess {frame}: {summary:?}");
        Ok(summary)
    }
}

impl Default for Postprocessor {
    fn default() -> Self {
        Self::new(&PostprocessConfig::default())
    }
}
