//! Input discovery: turn command-line paths and patterns into an ordered list
//! of file and directory records.
//!
//! A path that exists is taken as-is (directories contribute their children,
//! recursively with `recursive`).  A path whose last component contains `*`
//! or `?` is matched against the names in its parent directory.  Records come
//! out in argument order; within a directory they are sorted by file name so
//! discovery order is stable across runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use walkdir::WalkDir;

/// One discovered filesystem record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path:   PathBuf,
    pub is_dir: bool,
}

impl SourceFile {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), is_dir: false }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), is_dir: true }
    }

    /// Path as text, separators normalized to `/`.
    pub fn name(&self) -> String {
        normalize_name(&self.path.to_string_lossy())
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

/// `\` becomes `/` and any leading `./` is dropped.
pub fn normalize_name(name: &str) -> String {
    let mut s = name.replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_owned();
    }
    s
}

/// Name to store in an archive: normalized, with any root or drive prefix
/// removed, optionally cut down to the basename.
pub fn entry_name(path: &Path, flat: bool) -> String {
    let name = normalize_name(&path.to_string_lossy());
    let name = strip_root(&name).to_owned();
    if flat {
        match name.rfind('/') {
            Some(i) => name[i + 1..].to_owned(),
            None    => name,
        }
    } else {
        name
    }
}

fn strip_root(name: &str) -> &str {
    let b = name.as_bytes();
    let rest = if b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':' {
        &name[2..]
    } else {
        name
    };
    rest.trim_start_matches('/')
}

/// `*` matches any run of characters, `?` exactly one.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

fn has_wildcard(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// Ordered collection of discovered records.
#[derive(Debug, Clone, Default)]
pub struct Folder {
    records: Vec<SourceFile>,
}

impl Folder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add everything `pattern` names.  Returns how many records were added;
    /// zero is logged, not an error.
    pub fn include(&mut self, pattern: &str, recursive: bool) -> usize {
        let before = self.records.len();
        let path = Path::new(pattern);

        if path.is_file() {
            self.records.push(SourceFile::file(path));
        } else if path.is_dir() {
            self.walk(path, recursive, None);
        } else {
            let file_part = path.file_name().map(|f| f.to_string_lossy().into_owned());
            match file_part {
                Some(mask) if has_wildcard(&mask) => {
                    let parent = match path.parent() {
                        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                        _ => PathBuf::from("."),
                    };
                    self.walk(&parent, recursive, Some(&mask));
                }
                _ => {}
            }
        }

        let added = self.records.len() - before;
        if added == 0 {
            warn!("no files match '{}'", pattern);
        }
        added
    }

    fn walk(&mut self, root: &Path, recursive: bool, mask: Option<&str>) {
        let max_depth = if recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            let is_dir = entry.file_type().is_dir();
            if let Some(mask) = mask {
                if is_dir || !wildcard_match(mask, &entry.file_name().to_string_lossy()) {
                    continue;
                }
            }
            let path = if root == Path::new(".") {
                entry.path().strip_prefix(".").unwrap_or(entry.path()).to_path_buf()
            } else {
                entry.into_path()
            };
            self.records.push(SourceFile { path, is_dir });
        }
    }

    /// Drop every record that resolves to the same file as `path`.  Returns
    /// how many were dropped; a `path` that does not exist drops nothing.
    pub fn exclude(&mut self, path: &Path) -> usize {
        let target = match fs::canonicalize(path) {
            Ok(p)  => p,
            Err(_) => return 0,
        };
        let before = self.records.len();
        self.records
            .retain(|r| fs::canonicalize(&r.path).map_or(true, |p| p != target));
        before - self.records.len()
    }

    pub fn push(&mut self, record: SourceFile) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[SourceFile] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SourceFile> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count of records that are not directories.
    pub fn file_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_dir).count()
    }
}
