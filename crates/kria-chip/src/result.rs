//! Result buffer format.
//!
//! ```text
//! word 0          detection count N
//! word 1 + 6i     x       (f32 bits)
//! word 2 + 6i     y       (f32 bits)
//! word 3 + 6i     w       (f32 bits)
//! word 4 + 6i     h       (f32 bits)
//! word 5 + 6i     confidence (f32 bits)
//! word 6 + 6i     class id (u32)
//! ```

/// Most detections one frame can report.
pub const MAX_DETECTIONS: usize = 100;

/// Words per detection record.
pub const RECORD_WORDS: usize = 6;

/// Words before the first record.
pub const HEADER_WORDS: usize = 1;

/// Words needed for `count` records.
#[must_use]
pub const fn word_len(count: usize) -> usize {
    HEADER_WORDS + count * RECORD_WORDS
}

/// Bytes needed for `count` records.
#[must_use]
pub const fn byte_len(count: usize) -> usize {
    word_len(count) * 4
}

/// First word of record `index`.
#[must_use]
pub const fn record_start(index: usize) -> usize {
    HEADER_WORDS + index * RECORD_WORDS
}
