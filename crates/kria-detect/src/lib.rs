//! Detection postprocessing for the Kria co-processor.
//!
//! Turns the DPU's raw per-anchor tensor into a packed detection list:
//!
//! ```text
//! tensor ──▶ DetectionDecoder ──▶ NmsEngine ──▶ ResultPacker ──▶ result words
//!            (objectness > 0.25,  (conf ≥ 0.5,  (conf > 0.5,
//!             cap 100)             IoU > 0.45)   count + 6-word records)
//! ```
//!
//! No hardware access: everything operates on slices, so the same code runs
//! on the co-processor's arena view, in the host simulator and in tests.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod config;
mod decoder;
mod detection;
mod error;
mod nms;
mod packer;
mod postprocess;

pub use config::PostprocessConfig;
pub use decoder::{CandidateList, DecodeOutput, DetectionDecoder};
pub use detection::{iou, BoundingBox, Detection, DetectionResultSet};
pub use error::{DetectError, Result};
pub use kria_chip::result::MAX_DETECTIONS;
pub use nms::{NmsEngine, Suppression};
pub use packer::{parse_results, ResultPacker};
pub use postprocess::{FrameSummary, Postprocessor};
