//! Per-file codec measurement and the backend seam the scheduler talks to.

use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{wrapper, CodecId};

/// Outcome of running one codec over one file's content.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub codec:           CodecId,
    /// Wrapped payload, ready to be stored as-is.
    pub packed:          Vec<u8>,
    pub packed_size:     usize,
    pub compress_time:   Duration,
    pub decompress_time: Duration,
}

/// Run `f` and return its result with the time it took.
fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

/// Run every codec in `codecs` once over `content`.
///
/// Each run is timed for both directions; the decompression pass also checks
/// that the payload round-trips.  A codec that fails either way is logged and
/// left out of the result, so callers may get fewer measurements than codecs.
pub fn measure(content: &[u8], codecs: &[CodecId], level: i32) -> Vec<Measurement> {
    let mut out = Vec::with_capacity(codecs.len());
    for &codec in codecs {
        let (packed, compress_time) = timed(|| wrapper::pack(codec, content, level));
        let packed = match packed {
            Ok(p)  => p,
            Err(e) => {
                warn!("{} failed to compress {} bytes: {}", codec, content.len(), e);
                continue;
            }
        };

        // Only the decode is timed; the round-trip comparison is not.
        let (unpacked, decompress_time) = timed(|| wrapper::unpack(&packed));
        match unpacked {
            Ok(ref raw) if raw.as_slice() == content => {}
            Ok(_) => {
                warn!("{} produced a payload that does not round-trip", codec);
                continue;
            }
            Err(e) => {
                warn!("{} failed to decompress its own output: {}", codec, e);
                continue;
            }
        }

        debug!(
            "measured {}: {} -> {} bytes, c={:?} d={:?}",
            codec, content.len(), packed.len(), compress_time, decompress_time,
        );
        out.push(Measurement {
            codec,
            packed_size: packed.len(),
            packed,
            compress_time,
            decompress_time,
        });
    }
    out
}

// ── Backend seam ─────────────────────────────────────────────────────────────

/// The codec collaborator as seen by the scheduler.
///
/// The production implementation is [`Builtin`]; tests substitute
/// instrumented backends to observe concurrency and completion order.
pub trait CodecBackend: Sync {
    fn measure(&self, content: &[u8], codecs: &[CodecId], level: i32) -> Vec<Measurement>;

    /// Declared capability: may this codec run in several workers at once?
    fn parallel_safe(&self, codec: CodecId) -> bool {
        codec.parallel_safe()
    }

    fn name_of(&self, codec: CodecId) -> &'static str {
        codec.name()
    }
}

/// Backend backed by the codecs compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builtin;

impl CodecBackend for Builtin {
    fn measure(&self, content: &[u8], codecs: &[CodecId], level: i32) -> Vec<Measurement> {
        measure(content, codecs, level)
    }
}
