//! Codec registry: stable one-byte tags, names, and declared capabilities.
//!
//! # Identity rules
//! Every codec is identified by a one-byte tag.  That tag is written into the
//! wrapper header of every packed payload (see [`wrapper`]) and is the only
//! thing the decoder trusts when auto-detecting a codec.  A tag is never
//! reused, even if a codec is retired.
//!
//! # Capabilities
//! Each codec declares whether it may be run from several workers at once
//! ([`CodecId::parallel_safe`]).  The scheduler consults this flag; it never
//! compares codec identities itself.

pub mod measure;
pub mod wrapper;

use std::io::{self, Read, Write};
use thiserror::Error;

pub use measure::{measure, Builtin, CodecBackend, Measurement};
pub use wrapper::{is_packed, pack, packed_codec, unpack};

/// Default compression level handed to codecs that take one.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Codec used when the caller asks for none.
pub const DEFAULT_CODEC: CodecId = CodecId::Zstd;

// ── CodecId enum ─────────────────────────────────────────────────────────────

/// Runtime codec discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    /// Identity: payload stored verbatim inside the wrapper.
    None,
    Zstd,
    Lz4,
    Brotli,
    Lzma,
}

impl CodecId {
    /// Every codec this build knows, in tag order.
    pub const ALL: [CodecId; 5] = [
        CodecId::None,
        CodecId::Zstd,
        CodecId::Lz4,
        CodecId::Brotli,
        CodecId::Lzma,
    ];

    /// The byte written into the wrapper header.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            CodecId::None   => 0,
            CodecId::Zstd   => 1,
            CodecId::Lz4    => 2,
            CodecId::Brotli => 3,
            CodecId::Lzma   => 4,
        }
    }

    /// Resolve a wrapper tag.  Returns `None` for tags this build doesn't know.
    pub fn from_tag(tag: u8) -> Option<Self> {
        CodecId::ALL.iter().copied().find(|c| c.tag() == tag)
    }

    /// Human-readable name (for diagnostics and status lines).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None   => "none",
            CodecId::Zstd   => "zstd",
            CodecId::Lz4    => "lz4",
            CodecId::Brotli => "brotli",
            CodecId::Lzma   => "lzma",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" | "identity" => Some(CodecId::None),
            "zstd"              => Some(CodecId::Zstd),
            "lz4"               => Some(CodecId::Lz4),
            "brotli"            => Some(CodecId::Brotli),
            "lzma"              => Some(CodecId::Lzma),
            _                   => None,
        }
    }

    /// Whether several workers may run this codec at the same time.
    ///
    /// lzma-rs keeps large per-call dictionaries and is slow enough that a
    /// batch of eight runs starves the machine, so it is run one at a time.
    pub fn parallel_safe(self) -> bool {
        !matches!(self, CodecId::Lzma)
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Unknown codec tag {0:#04x}")]
    UnknownTag(u8),
    #[error("Packed payload truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("Unpacked size mismatch: header says {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("Checksum mismatch after unpacking")]
    ChecksumMismatch,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8])        -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct BrotliCodec;
impl Codec for BrotliCodec {
    fn codec_id(&self) -> CodecId { CodecId::Brotli }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let quality = level.clamp(0, 11) as u32;
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, quality, 22);
            w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        }
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn codec_id(&self) -> CodecId { CodecId::Lzma }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a wrapper tag to a built-in codec.
pub fn get_codec_by_tag(tag: u8) -> Result<Box<dyn Codec>, CodecError> {
    match CodecId::from_tag(tag) {
        Some(id) => Ok(get_codec(id)),
        None     => Err(CodecError::UnknownTag(tag)),
    }
}

/// Resolve a CodecId to a built-in codec.
pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None   => Box::new(NoneCodec),
        CodecId::Zstd   => Box::new(ZstdCodec),
        CodecId::Lz4    => Box::new(Lz4Codec),
        CodecId::Brotli => Box::new(BrotliCodec),
        CodecId::Lzma   => Box::new(LzmaCodec),
    }
}

/// Apply the "no codec requested" default and drop duplicates, keeping
/// the caller's order.
pub fn resolve_codecs(requested: &[CodecId]) -> Vec<CodecId> {
    if requested.is_empty() {
        return vec![DEFAULT_CODEC];
    }
    let mut out = Vec::with_capacity(requested.len());
    for &c in requested {
        if !out.contains(&c) {
            out.push(c);
        }
    }
    out
}
