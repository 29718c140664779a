//! Codec selection: given the measurements for one file, keep the smallest
//! payload or fall back to storing the file raw.

use std::time::Duration;

use serde::Serialize;

use crate::codec::{CodecId, Measurement};

/// Default threshold: compressed output may be at most 95% of the input.
pub const DEFAULT_THRESHOLD: f64 = 95.0;

/// Percentage shrink between two sizes: 0 for no change, approaching 100 for
/// near-total reduction.  Zero when either side is empty.
pub fn ratio(input: u64, output: u64) -> f64 {
    if input == 0 || output == 0 {
        return 0.0;
    }
    let min = input.min(output) as f64;
    let max = input.max(output) as f64;
    100.0 - (100.0 * min) / max
}

/// The one rule deciding whether a compressed payload is worth keeping.
///
/// A payload of `output` bytes for `input` bytes of content is accepted iff
/// `output * 100 <= threshold * input`, i.e. the output is at most
/// `threshold` percent of the input.  With the default of 95 a shrink of
/// exactly 5% is kept.  Empty input accepts nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkipRule {
    pub threshold: f64,
}

impl Default for SkipRule {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD }
    }
}

impl SkipRule {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn accepts(&self, input: u64, output: u64) -> bool {
        input > 0 && (output as f64) * 100.0 <= self.threshold * (input as f64)
    }
}

/// Smallest payload among `measurements`, or `None` when even that one is
/// rejected by `rule`.  Ties keep the earliest measurement.
pub fn find_smallest<'a>(
    measurements: &'a [Measurement],
    input_len:    u64,
    rule:         SkipRule,
) -> Option<&'a Measurement> {
    let smallest = measurements
        .iter()
        .reduce(|best, m| if m.packed_size < best.packed_size { m } else { best })?;
    rule.accepts(input_len, smallest.packed_size as u64).then_some(smallest)
}

/// Measurement with the cheapest decompression.  Ties keep the earliest.
pub fn find_fastest_decompressor(measurements: &[Measurement]) -> Option<&Measurement> {
    measurements
        .iter()
        .reduce(|best, m| if m.decompress_time < best.decompress_time { m } else { best })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Codec(CodecId),
    Raw,
}

/// Decision for one file.
#[derive(Debug, Clone)]
pub struct Selection {
    pub chosen:      Choice,
    /// Bytes to store: the winning payload, or the raw content.
    pub final_bytes: Vec<u8>,
    /// Shrink between the raw content and `final_bytes`.
    pub ratio:       f64,
    /// Shrink the smallest candidate would have achieved, even when rejected.
    pub best_ratio:  f64,
    /// Informational only; never overrides the smallest-payload choice.
    pub fastest_decompressor: Option<(CodecId, Duration)>,
}

impl Selection {
    pub fn is_skipped(&self) -> bool {
        self.chosen == Choice::Raw
    }
}

/// Pick the smallest payload; keep it if `rule` accepts it and it is
/// strictly smaller than the input.  Anything else is stored raw.
pub fn select(content: &[u8], measurements: &[Measurement], rule: SkipRule) -> Selection {
    let input_len = content.len() as u64;
    let fastest_decompressor = find_fastest_decompressor(measurements)
        .map(|m| (m.codec, m.decompress_time));
    let best_ratio = measurements
        .iter()
        .map(|m| m.packed_size)
        .min()
        .map_or(0.0, |size| ratio(input_len, size as u64));

    match find_smallest(measurements, input_len, rule) {
        Some(m) if (m.packed_size as u64) < input_len => Selection {
            chosen:      Choice::Codec(m.codec),
            final_bytes: m.packed.clone(),
            ratio:       ratio(input_len, m.packed_size as u64),
            best_ratio,
            fastest_decompressor,
        },
        _ => Selection {
            chosen:      Choice::Raw,
            final_bytes: content.to_vec(),
            ratio:       0.0,
            best_ratio,
            fastest_decompressor,
        },
    }
}
