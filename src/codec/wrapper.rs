//! Self-describing wrapper around a compressed payload.
//!
//! ```text
//! magic "BUN" (3) | codec tag u8 | raw length u64 LE | crc32(raw) u32 LE | payload
//! ```
//!
//! The wrapper is what lets `extract` decode an entry without any
//! container-level codec bookkeeping: every packed entry carries its own tag.
//! Content without the magic is treated as raw and passes through `unpack`
//! untouched.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::Cursor;

use super::{get_codec, get_codec_by_tag, CodecError, CodecId};

pub const PACK_MAGIC: &[u8; 3] = b"BUN";
/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 3 + 1 + 8 + 4;

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    codec:   CodecId,
    raw_len: u64,
    crc:     u32,
}

impl Header {
    fn parse(content: &[u8]) -> Option<Self> {
        if content.len() < HEADER_LEN || &content[..3] != PACK_MAGIC {
            return None;
        }
        let codec = CodecId::from_tag(content[3])?;
        let mut rest = Cursor::new(&content[4..HEADER_LEN]);
        let raw_len = rest.read_u64::<LittleEndian>().ok()?;
        let crc = rest.read_u32::<LittleEndian>().ok()?;
        Some(Self { codec, raw_len, crc })
    }
}

/// Compress `data` with `codec` and prepend the wrapper header.
pub fn pack(codec: CodecId, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    let payload = get_codec(codec).compress(data, level)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(PACK_MAGIC);
    out.write_u8(codec.tag())?;
    out.write_u64::<LittleEndian>(data.len() as u64)?;
    out.write_u32::<LittleEndian>(crc32(data))?;
    out.extend_from_slice(&payload);
    Ok(out)
}

/// True when `content` starts with a complete wrapper header naming a codec
/// this build knows.
pub fn is_packed(content: &[u8]) -> bool {
    Header::parse(content).is_some()
}

/// Codec named by the wrapper header, if any.
pub fn packed_codec(content: &[u8]) -> Option<CodecId> {
    Header::parse(content).map(|h| h.codec)
}

/// Detect the codec from the wrapper and decompress.
///
/// Raw content is returned unchanged.  A wrapped payload whose decoded length
/// or CRC disagrees with its header is rejected.
pub fn unpack(content: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = match Header::parse(content) {
        Some(h) => h,
        None    => return Ok(content.to_vec()),
    };
    let out = get_codec_by_tag(header.codec.tag())?.decompress(&content[HEADER_LEN..])?;
    if out.len() as u64 != header.raw_len {
        return Err(CodecError::SizeMismatch {
            expected: header.raw_len,
            actual:   out.len() as u64,
        });
    }
    if crc32(&out) != header.crc {
        return Err(CodecError::ChecksumMismatch);
    }
    Ok(out)
}
