//! On-disk container layout.  All integers are little-endian.
//!
//! ```text
//! header : magic "BNDL" (4) | version u32 | entry_count u32
//! record : name_len u32 | name (UTF-8) | content_len u64 | crc32(content) u32 | content
//! ```
//!
//! There is no container-level compression; entries carry their own wrapper
//! when they were compressed.  Because every record states its content length
//! up front, a table of contents can be read by seeking over payloads.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

use crate::archive::{Archive, Entry, TocEntry};

pub const MAGIC: &[u8; 4] = b"BNDL";
pub const VERSION: u32 = 1;
/// Longest entry name a reader will accept.
pub const MAX_NAME_LEN: u32 = 64 * 1024;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("Entry name of {0} bytes exceeds the limit")]
    NameTooLong(u32),
    #[error("Entry name is not valid UTF-8")]
    BadName,
    #[error("Checksum mismatch in entry '{0}'")]
    ChecksumMismatch(String),
    #[error("Container truncated")]
    Truncated,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Map short reads to `Truncated` so callers can tell corruption from I/O.
fn eof_is_truncation(e: io::Error) -> ContainerError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ContainerError::Truncated
    } else {
        ContainerError::Io(e)
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version:     u32,
    pub entry_count: u32,
}

impl Header {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.entry_count)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, ContainerError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(eof_is_truncation)?;
        if &magic != MAGIC {
            return Err(ContainerError::InvalidMagic);
        }
        let version = reader.read_u32::<LittleEndian>().map_err(eof_is_truncation)?;
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let entry_count = reader.read_u32::<LittleEndian>().map_err(eof_is_truncation)?;
        Ok(Self { version, entry_count })
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

struct RecordHead {
    name:        String,
    content_len: u64,
    crc:         u32,
}

fn read_record_head<R: Read>(reader: &mut R) -> Result<RecordHead, ContainerError> {
    let name_len = reader.read_u32::<LittleEndian>().map_err(eof_is_truncation)?;
    if name_len > MAX_NAME_LEN {
        return Err(ContainerError::NameTooLong(name_len));
    }
    let mut name = vec![0u8; name_len as usize];
    reader.read_exact(&mut name).map_err(eof_is_truncation)?;
    let name = String::from_utf8(name).map_err(|_| ContainerError::BadName)?;
    let content_len = reader.read_u64::<LittleEndian>().map_err(eof_is_truncation)?;
    let crc = reader.read_u32::<LittleEndian>().map_err(eof_is_truncation)?;
    Ok(RecordHead { name, content_len, crc })
}

/// Stream `archive` into `writer`.
pub fn write_to<W: Write>(archive: &Archive, mut writer: W) -> io::Result<()> {
    let entry_count = u32::try_from(archive.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many entries"))?;
    Header { version: VERSION, entry_count }.write(&mut writer)?;
    for entry in archive.entries() {
        let name = entry.name.as_bytes();
        writer.write_u32::<LittleEndian>(name.len() as u32)?;
        writer.write_all(name)?;
        writer.write_u64::<LittleEndian>(entry.content.len() as u64)?;
        writer.write_u32::<LittleEndian>(crc32(&entry.content))?;
        writer.write_all(&entry.content)?;
    }
    Ok(())
}

/// Read a whole container, checking every record's CRC.
pub fn read_from<R: Read>(mut reader: R) -> Result<Archive, ContainerError> {
    let header = Header::read(&mut reader)?;
    let mut entries = Vec::new();
    for _ in 0..header.entry_count {
        let head = read_record_head(&mut reader)?;
        let mut content = Vec::new();
        (&mut reader)
            .take(head.content_len)
            .read_to_end(&mut content)?;
        if content.len() as u64 != head.content_len {
            return Err(ContainerError::Truncated);
        }
        if crc32(&content) != head.crc {
            return Err(ContainerError::ChecksumMismatch(head.name));
        }
        entries.push(Entry { name: head.name, content });
    }
    Ok(Archive::from_entries(entries))
}

/// Table of contents read straight from a stream; payloads are skipped, not
/// loaded or checksummed.
pub fn read_toc<R: Read + Seek>(mut reader: R) -> Result<Vec<TocEntry>, ContainerError> {
    let header = Header::read(&mut reader)?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(12))?;
    let mut toc = Vec::with_capacity(header.entry_count.min(4096) as usize);
    for _ in 0..header.entry_count {
        let head = read_record_head(&mut reader)?;
        let pos = reader.stream_position()?;
        if end.saturating_sub(pos) < head.content_len {
            return Err(ContainerError::Truncated);
        }
        reader.seek(SeekFrom::Current(head.content_len as i64))?;
        toc.push(TocEntry { name: head.name, size: head.content_len });
    }
    Ok(toc)
}

pub fn serialize(archive: &Archive) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail short of the entry-count overflow,
    // which needs more than 4 billion entries.
    if let Err(e) = write_to(archive, &mut out) {
        log::error!("serializing archive failed: {e}");
    }
    out
}

pub fn deserialize(bytes: &[u8]) -> Result<Archive, ContainerError> {
    read_from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pack, CodecId};
    use std::io::Cursor;

    fn sample() -> Archive {
        Archive::from_entries(vec![
            Entry::new("raw.txt", b"stored as is".to_vec()),
            Entry::new("packed.bin", pack(CodecId::Zstd, &[0u8; 2048], 3).unwrap()),
            Entry::new("empty", Vec::new()),
        ])
    }

    #[test]
    fn mixed_entries_survive_in_order() {
        let ar = sample();
        let bytes = serialize(&ar);
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(deserialize(&bytes).unwrap(), ar);
    }

    #[test]
    fn toc_from_stream_matches_in_memory_toc() {
        let ar = sample();
        let toc = read_toc(Cursor::new(serialize(&ar))).unwrap();
        assert_eq!(toc, ar.toc());
    }

    #[test]
    fn empty_archive() {
        let bytes = serialize(&Archive::default());
        assert_eq!(bytes.len(), 12);
        assert!(deserialize(&bytes).unwrap().is_empty());
        assert!(read_toc(Cursor::new(bytes)).unwrap().is_empty());
    }

    #[test]
    fn corruption_is_detected() {
        let bytes = serialize(&sample());

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(deserialize(&bad_magic), Err(ContainerError::InvalidMagic)));

        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(deserialize(truncated), Err(ContainerError::Truncated)));
        assert!(matches!(
            read_toc(Cursor::new(truncated.to_vec())),
            Err(ContainerError::Truncated)
        ));

        // Flip a byte inside the first payload ("stored as is").
        let mut flipped = bytes.clone();
        let payload_start = 12 + 4 + "raw.txt".len() + 8 + 4;
        flipped[payload_start] ^= 0x20;
        assert!(matches!(
            deserialize(&flipped),
            Err(ContainerError::ChecksumMismatch(name)) if name == "raw.txt"
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut bytes = serialize(&sample());
        bytes[4] = 9;
        assert!(matches!(deserialize(&bytes), Err(ContainerError::UnsupportedVersion(9))));
    }
}
