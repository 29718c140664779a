//! Operating modes: one [`Orchestrator::run`] per invocation.
//!
//! ```text
//! Idle → Discovering → Processing → Aggregating → Serializing → Reporting → Done
//!                   ↘ Deserializing → Decoding ↗
//! ```
//!
//! Only pre-flight checks (missing archive path, nothing discovered) end a run
//! early.  Everything that goes wrong once files are being processed is
//! counted in [`RunReport::totals`] and the run carries on.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::archive::{Archive, TocEntry};
use crate::codec::{self, Builtin, CodecBackend};
use crate::container::{self, ContainerError};
use crate::discover::{Folder, SourceFile};
use crate::error::{container_error, BundleError, Result};
use crate::policy;
use crate::report::{Echo, StatusLine, StatusLog, Summary, Totals};
use crate::scheduler::{Job, Outcome, ProgressFn, Scheduler, WorkerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Bundle discovered files into an archive.
    Pack,
    /// Pack, then delete the sources if nothing failed.
    Move,
    /// Write every entry of an archive to disk.
    Extract,
    /// Decode every entry without writing.
    Test,
    /// Print the table of contents.
    List,
    /// Pack each file in place.
    Compress,
    /// Unpack each file in place.
    Decompress,
    /// Unpack packed files and pack the others, in place.
    Toggle,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Pack       => "pack",
            Mode::Move       => "move",
            Mode::Extract    => "extract",
            Mode::Test       => "test",
            Mode::List       => "list",
            Mode::Compress   => "compress",
            Mode::Decompress => "decompress",
            Mode::Toggle     => "toggle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Discovering,
    Processing,
    Aggregating,
    Serializing,
    Deserializing,
    Decoding,
    Reporting,
}

/// Resolved configuration for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOptions {
    pub mode:       Mode,
    pub archive:    Option<PathBuf>,
    /// Paths and `*`/`?` patterns.
    pub inputs:     Vec<String>,
    /// Destination root for `extract`.
    pub output_dir: PathBuf,
    pub recursive:  bool,
    /// Do everything except writing or deleting files.
    pub dry_run:    bool,
    pub quiet:      bool,
    pub verbose:    bool,
    pub worker:     WorkerOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode:       Mode::Pack,
            archive:    None,
            inputs:     Vec::new(),
            output_dir: PathBuf::from("."),
            recursive:  false,
            dry_run:    false,
            quiet:      false,
            verbose:    false,
            worker:     WorkerOptions::default(),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode:    Mode,
    pub totals:  Totals,
    pub elapsed: Duration,
    pub lines:   Vec<StatusLine>,
    /// Entries written (pack/move) or read (extract/test/list).
    pub toc:     Vec<TocEntry>,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        Summary { totals: self.totals, elapsed: self.elapsed }
    }

    /// Process exit status: the error count, saturated to what a process
    /// can return.
    pub fn exit_code(&self) -> i32 {
        self.totals.errors.min(255) as i32
    }
}

pub struct Orchestrator<'a> {
    opts:     RunOptions,
    backend:  &'a dyn CodecBackend,
    echo:     Echo,
    progress: Option<&'a ProgressFn<'a>>,
}

impl Orchestrator<'static> {
    pub fn new(opts: RunOptions) -> Self {
        let echo = if opts.quiet { Echo::Quiet } else { Echo::Normal };
        Self { opts, backend: &Builtin, echo, progress: None }
    }
}

impl<'a> Orchestrator<'a> {
    pub fn with_backend<'b>(self, backend: &'b dyn CodecBackend) -> Orchestrator<'b>
    where
        'a: 'b,
    {
        Orchestrator { opts: self.opts, backend, echo: self.echo, progress: self.progress }
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_progress<'b>(self, f: &'b ProgressFn<'b>) -> Orchestrator<'b>
    where
        'a: 'b,
    {
        Orchestrator { opts: self.opts, backend: self.backend, echo: self.echo, progress: Some(f) }
    }

    pub fn options(&self) -> &RunOptions {
        &self.opts
    }

    pub fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        let mode = self.opts.mode;
        debug!("{} run starting", mode.name());

        let (totals, log, toc) = match mode {
            Mode::Pack | Mode::Move => self.pack(self.archive_path()?)?,
            Mode::Extract           => self.extract(self.archive_path()?, true),
            Mode::Test              => self.extract(self.archive_path()?, false),
            Mode::List              => self.list(self.archive_path()?),
            Mode::Compress          => self.in_place(Job::Pack)?,
            Mode::Decompress        => self.in_place(Job::Unpack)?,
            Mode::Toggle            => self.in_place(Job::Toggle)?,
        };

        self.enter(Phase::Reporting);
        let report = RunReport {
            mode,
            totals,
            elapsed: start.elapsed(),
            lines: log.into_lines(),
            toc,
        };
        info!(
            "{} done: {} files, {} errors in {:?}",
            mode.name(), totals.processed, totals.errors, report.elapsed,
        );
        Ok(report)
    }

    fn archive_path(&self) -> Result<&Path> {
        self.opts.archive.as_deref().ok_or_else(|| {
            BundleError::Argument(format!("{}: no archive path given", self.opts.mode.name()))
        })
    }

    fn enter(&self, phase: Phase) {
        debug!("{}: {:?}", self.opts.mode.name(), phase);
    }

    /// Discover the inputs, leaving out the archive being written.
    fn discover(&self, archive: Option<&Path>) -> Result<Folder> {
        self.enter(Phase::Discovering);
        let mut folder = Folder::new();
        for input in &self.opts.inputs {
            folder.include(input, self.opts.recursive);
        }
        if let Some(path) = archive {
            if folder.exclude(path) > 0 {
                warn!("not packing the destination archive {} into itself", path.display());
            }
        }
        if folder.file_count() == 0 {
            return Err(BundleError::Argument("no files provided".to_owned()));
        }
        debug!("discovered {} records ({} files)", folder.len(), folder.file_count());
        Ok(folder)
    }

    fn schedule(&self, job: Job, files: &[SourceFile]) -> Result<Outcome> {
        self.enter(Phase::Processing);
        let mut scheduler = Scheduler::new(
            self.backend,
            job,
            self.opts.worker.clone(),
            StatusLog::new(self.echo),
        );
        if let Some(f) = self.progress {
            scheduler = scheduler.with_progress(f);
        }
        scheduler.run(files)
    }

    // ── pack / move ──────────────────────────────────────────────────────────

    fn pack(&self, path: &Path) -> Result<(Totals, StatusLog, Vec<TocEntry>)> {
        let folder = self.discover(Some(path))?;
        let outcome = self.schedule(Job::Pack, folder.records())?;

        self.enter(Phase::Aggregating);
        let (archive, mut totals, mut log) = outcome.into_archive();
        let toc = archive.toc();

        if self.opts.dry_run {
            return Ok((totals, log, toc));
        }

        self.enter(Phase::Serializing);
        match archive.write_file(path) {
            Ok(()) => log.emit(StatusLine::Note {
                ok:   true,
                text: format!("wrap: {} entries -> {}", archive.len(), path.display()),
            }),
            Err(e) => {
                totals.errors += 1;
                log.emit(StatusLine::failed("wrap", &path.display().to_string(), &write_error(path, e)));
            }
        }

        if self.opts.mode == Mode::Move {
            self.remove_sources(&folder, &mut totals, &mut log);
        }
        Ok((totals, log, toc))
    }

    /// Delete the packed sources, but only after a clean run.
    fn remove_sources(&self, folder: &Folder, totals: &mut Totals, log: &mut StatusLog) {
        if totals.errors > 0 {
            log.emit(StatusLine::Note {
                ok:   false,
                text: format!("move: {} errors, sources kept", totals.errors),
            });
            return;
        }
        let mut removed = 0usize;
        for file in folder.records().iter().filter(|r| !r.is_dir) {
            match fs::remove_file(&file.path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    totals.errors += 1;
                    log.emit(StatusLine::Note {
                        ok:   false,
                        text: format!("cannot delete file: {}: {}", file.name(), e),
                    });
                }
            }
        }
        log.emit(StatusLine::Note {
            ok:   totals.errors == 0,
            text: format!("move: {} files", removed),
        });
    }

    // ── in place ─────────────────────────────────────────────────────────────

    fn in_place(&self, job: Job) -> Result<(Totals, StatusLog, Vec<TocEntry>)> {
        let folder = self.discover(None)?;
        let outcome = self.schedule(job, folder.records())?;

        self.enter(Phase::Aggregating);
        let Outcome { slots, mut totals, mut log } = outcome;
        let processed: Vec<_> = slots.into_iter().flatten().collect();
        let toc = processed.iter().map(|p| TocEntry::from(&p.entry)).collect();

        if !self.opts.dry_run {
            for p in processed.iter().filter(|p| p.action.changes_file()) {
                if let Err(e) = fs::write(&p.source, &p.entry.content) {
                    totals.errors += 1;
                    let name = p.source.display().to_string();
                    log.emit(StatusLine::failed(self.opts.mode.name(), &name, &BundleError::write(&p.source, e)));
                }
            }
        }
        Ok((totals, log, toc))
    }

    // ── extract / test ───────────────────────────────────────────────────────

    fn extract(&self, path: &Path, write: bool) -> (Totals, StatusLog, Vec<TocEntry>) {
        let mode = if write { "extract" } else { "test" };
        let mut totals = Totals::default();
        let mut log = StatusLog::new(self.echo);

        self.enter(Phase::Deserializing);
        let archive = match Archive::read_file(path) {
            Ok(a)  => a,
            Err(e) => {
                totals.errors += 1;
                log.emit(StatusLine::failed(mode, &path.display().to_string(), &container_error(path, e)));
                return (totals, log, Vec::new());
            }
        };
        let toc = archive.toc();

        self.enter(Phase::Decoding);
        for entry in archive.into_entries() {
            totals.processed += 1;
            let packed_with = codec::packed_codec(&entry.content);
            let raw = match codec::unpack(&entry.content) {
                Ok(raw) => raw,
                Err(e)  => {
                    totals.errors += 1;
                    log.emit(StatusLine::failed(mode, &entry.name, &BundleError::decode(&entry.name, e)));
                    continue;
                }
            };
            if write {
                if let Err(e) = write_entry(&self.opts.output_dir, &entry.name, &raw) {
                    totals.errors += 1;
                    log.emit(StatusLine::failed(mode, &entry.name, &e));
                    continue;
                }
            }
            let (insize, outsize) = (entry.content.len() as u64, raw.len() as u64);
            totals.total_in  += insize;
            totals.total_out += outsize;
            log.emit(StatusLine::Done {
                mode,
                path:  entry.name,
                insize,
                outsize,
                ratio: policy::ratio(insize, outsize),
                label: packed_with.map_or("stored", |c| self.backend.name_of(c)).to_owned(),
            });
        }
        (totals, log, toc)
    }

    // ── list ─────────────────────────────────────────────────────────────────

    fn list(&self, path: &Path) -> (Totals, StatusLog, Vec<TocEntry>) {
        let mut totals = Totals::default();
        let mut log = StatusLog::new(self.echo);

        self.enter(Phase::Deserializing);
        let toc = File::open(path)
            .map_err(ContainerError::from)
            .and_then(|f| container::read_toc(BufReader::new(f)));
        match toc {
            Ok(toc) => {
                totals.processed = toc.len();
                totals.total_in = toc.iter().map(|e| e.size).sum();
                totals.total_out = totals.total_in;
                (totals, log, toc)
            }
            Err(e) => {
                totals.errors += 1;
                log.emit(StatusLine::failed("list", &path.display().to_string(), &container_error(path, e)));
                (totals, log, Vec::new())
            }
        }
    }
}

fn write_error(path: &Path, e: ContainerError) -> BundleError {
    match e {
        ContainerError::Io(source) => BundleError::write(path, source),
        other => BundleError::write(path, io::Error::new(io::ErrorKind::Other, other.to_string())),
    }
}

/// Write one extracted entry below `root`.  Names that would land outside
/// `root` are refused.
fn write_entry(root: &Path, name: &str, data: &[u8]) -> Result<()> {
    let rel = Path::new(name);
    let escapes = rel.components().any(|c| {
        matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
    });
    let target = root.join(rel);
    if escapes || name.is_empty() {
        return Err(BundleError::write(
            target,
            io::Error::new(io::ErrorKind::InvalidInput, "entry name leaves the output directory"),
        ));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| BundleError::write(parent, e))?;
    }
    fs::write(&target, data).map_err(|e| BundleError::write(&target, e))
}
