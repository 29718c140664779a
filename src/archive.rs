//! In-memory archive: an ordered list of named entries.
//!
//! ```no_run
//! use bundler::archive::{Archive, Entry};
//!
//! let mut ar = Archive::default();
//! ar.push(Entry::new("readme.txt", b"Hello, world!".to_vec()));
//! ar.write_file("out.bnd")?;
//!
//! let ar = Archive::read_file("out.bnd")?;
//! assert_eq!(ar.toc()[0].name, "readme.txt");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::container::{self, ContainerError};

// ── Entry ─────────────────────────────────────────────────────────────────────

/// One file inside an archive.  `content` is either raw bytes or a wrapped
/// payload; the archive never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name:    String,
    pub content: Vec<u8>,
}

impl Entry {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self { name: name.into(), content }
    }
}

/// Table-of-contents line: entry name and stored size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub name: String,
    pub size: u64,
}

impl From<&Entry> for TocEntry {
    fn from(e: &Entry) -> Self {
        TocEntry { name: e.name.clone(), size: e.content.len() as u64 }
    }
}

// ── Archive ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    entries: Vec<Entry>,
}

impl Archive {
    /// Compact a slot arena into an archive, dropping empty slots and keeping
    /// slot order.
    pub fn from_slots(slots: Vec<Option<Entry>>) -> Self {
        Self { entries: slots.into_iter().flatten().collect() }
    }

    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names and stored sizes in entry order.  Nothing is decompressed.
    pub fn toc(&self) -> Vec<TocEntry> {
        self.entries.iter().map(TocEntry::from).collect()
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    pub fn serialize(&self) -> Vec<u8> {
        container::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, ContainerError> {
        container::deserialize(bytes)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ContainerError> {
        let mut w = BufWriter::new(File::create(path)?);
        container::write_to(self, &mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        container::read_from(BufReader::new(File::open(path)?))
    }
}
