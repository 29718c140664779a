//! Bounded concurrent scheduler.
//!
//! One worker per discovered record.  Workers are launched in batches of at
//! most `threads` onto a dedicated rayon pool; each batch is a
//! [`rayon::ThreadPool::scope`], so every worker of a batch has finished
//! before the next batch starts.  If any requested codec declares itself not
//! parallel-safe the batch size drops to one for the whole run.
//!
//! # Slots
//! The result buffer is pre-sized to the number of records.  Worker `i`
//! receives a `&mut` to slot `i` and nothing else, so archive order is the
//! discovery order no matter which worker finishes first.  Directories and
//! failed reads leave their slot empty; [`Outcome::into_archive`] compacts.
//!
//! # Shared state
//! A single `Mutex<Aggregate>` holds the running totals, the progress snapshot
//! and the status log.  Workers take it only to record a finished file, never
//! around I/O or codec work.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde::Serialize;

use crate::archive::{Archive, Entry};
use crate::codec::{self, CodecBackend, CodecId, DEFAULT_COMPRESSION_LEVEL};
use crate::discover::{entry_name, SourceFile};
use crate::error::{BundleError, Result};
use crate::policy::{self, Choice, SkipRule};
use crate::report::{StatusLine, StatusLog, Totals};

/// Default number of workers per batch.
pub const DEFAULT_THREADS: usize = 8;

/// What each worker does with its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Job {
    /// Measure the requested codecs and keep the best payload (or raw).
    Pack,
    /// Detect the wrapper and decompress.
    Unpack,
    /// Unpack files that are packed, pack the rest.
    Toggle,
}

/// Knobs shared by every worker of a run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerOptions {
    pub threads: usize,
    /// Candidate codecs.  Empty means the default codec.
    pub codecs:  Vec<CodecId>,
    pub level:   i32,
    pub rule:    SkipRule,
    /// Store basenames only.
    pub flat:    bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            codecs:  Vec::new(),
            level:   DEFAULT_COMPRESSION_LEVEL,
            rule:    SkipRule::default(),
            flat:    false,
        }
    }
}

/// Position of the run, updated under the aggregate lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Records finished, directories included.
    pub done:    usize,
    pub total:   usize,
    /// Last file finished.
    pub current: Option<String>,
}

impl Progress {
    pub fn percent(&self) -> usize {
        if self.total == 0 { 100 } else { self.done * 100 / self.total }
    }
}

/// Everything workers share.
#[derive(Debug, Default)]
pub struct Aggregate {
    pub totals:   Totals,
    pub progress: Progress,
    pub log:      StatusLog,
}

fn lock(shared: &Mutex<Aggregate>) -> MutexGuard<'_, Aggregate> {
    // A worker that panicked mid-update leaves plain counters behind; keep going.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Polling view onto a running scheduler.
#[derive(Debug, Clone)]
pub struct ProgressHandle(Arc<Mutex<Aggregate>>);

impl ProgressHandle {
    pub fn snapshot(&self) -> Progress {
        lock(&self.0).progress.clone()
    }

    pub fn totals(&self) -> Totals {
        lock(&self.0).totals
    }
}

/// Callback invoked after every aggregate update, while the lock is held.
pub type ProgressFn<'a> = dyn Fn(&Progress) + Send + Sync + 'a;

/// What happened to a file that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Packed(CodecId),
    /// Compression did not pay off; the entry holds the raw bytes.
    Skipped,
    Unpacked(CodecId),
    /// Unpack was asked for but the file was not packed.
    Unchanged,
}

impl Action {
    /// Whether an in-place run has to rewrite the source file.
    pub fn changes_file(&self) -> bool {
        matches!(self, Action::Packed(_) | Action::Unpacked(_))
    }
}

/// A filled slot.
#[derive(Debug, Clone)]
pub struct Processed {
    pub source: PathBuf,
    pub entry:  Entry,
    pub action: Action,
}

/// Result of a scheduler run.
#[derive(Debug)]
pub struct Outcome {
    /// One slot per discovered record, in discovery order.
    pub slots:  Vec<Option<Processed>>,
    pub totals: Totals,
    pub log:    StatusLog,
}

impl Outcome {
    pub fn into_archive(self) -> (Archive, Totals, StatusLog) {
        let slots = self.slots.into_iter().map(|s| s.map(|p| p.entry)).collect();
        (Archive::from_slots(slots), self.totals, self.log)
    }
}

pub struct Scheduler<'a> {
    backend:     &'a dyn CodecBackend,
    job:         Job,
    opts:        WorkerOptions,
    codecs:      Vec<CodecId>,
    shared:      Arc<Mutex<Aggregate>>,
    on_progress: Option<&'a ProgressFn<'a>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(backend: &'a dyn CodecBackend, job: Job, opts: WorkerOptions, log: StatusLog) -> Self {
        let codecs = codec::resolve_codecs(&opts.codecs);
        let shared = Arc::new(Mutex::new(Aggregate { log, ..Aggregate::default() }));
        Self { backend, job, opts, codecs, shared, on_progress: None }
    }

    pub fn with_progress(mut self, f: &'a ProgressFn<'a>) -> Self {
        self.on_progress = Some(f);
        self
    }

    pub fn progress(&self) -> ProgressHandle {
        ProgressHandle(Arc::clone(&self.shared))
    }

    /// Codecs every packing worker will measure.
    pub fn codecs(&self) -> &[CodecId] {
        &self.codecs
    }

    /// Workers per batch: the configured thread count, or one when a
    /// requested codec is not parallel-safe.
    pub fn batch_size(&self) -> usize {
        if self.codecs.iter().any(|&c| !self.backend.parallel_safe(c)) {
            1
        } else {
            self.opts.threads.max(1)
        }
    }

    /// Process every record.  Per-file failures are counted in the outcome;
    /// only failing to start the pool is an error.
    pub fn run(self, files: &[SourceFile]) -> Result<Outcome> {
        let batch = self.batch_size();
        debug!(
            "scheduling {} records, {} per batch, codecs {:?}",
            files.len(), batch, self.codecs,
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(batch)
            .thread_name(|i| format!("bundler-worker-{i}"))
            .build()?;

        lock(&self.shared).progress.total = files.len();

        let mut slots: Vec<Option<Processed>> = (0..files.len()).map(|_| None).collect();
        let this = &self;
        for (batch_no, (batch_files, batch_slots)) in files
            .chunks(batch)
            .zip(slots.chunks_mut(batch))
            .enumerate()
        {
            let base = batch_no * batch;
            pool.scope(|s| {
                for (offset, (file, slot)) in batch_files.iter().zip(batch_slots).enumerate() {
                    let index = base + offset;
                    s.spawn(move |_| *slot = this.work(index, file));
                }
            });
        }

        let mut agg = lock(&self.shared);
        Ok(Outcome {
            slots,
            totals: agg.totals,
            log:    std::mem::take(&mut agg.log),
        })
    }

    // ── Workers ──────────────────────────────────────────────────────────────

    fn work(&self, index: usize, file: &SourceFile) -> Option<Processed> {
        if file.is_dir {
            self.finish(None, |_| {});
            return None;
        }
        let display = file.name();
        let content = match file.read() {
            Ok(c)  => c,
            Err(e) => {
                let err = BundleError::read(&file.path, e);
                self.fail(self.mode_label(self.job), display, &err);
                return None;
            }
        };
        debug!("worker {index}: {} ({} bytes)", display, content.len());

        let job = match self.job {
            Job::Toggle if codec::is_packed(&content) => Job::Unpack,
            Job::Toggle => Job::Pack,
            j => j,
        };
        let name = entry_name(&file.path, self.opts.flat);
        let result = match job {
            Job::Unpack => self.unpack(&display, &content),
            _           => self.pack(&display, &content),
        };

        match result {
            Ok((bytes, action, label, ratio)) => {
                let line = StatusLine::Done {
                    mode:    self.mode_label(job),
                    path:    display.clone(),
                    insize:  content.len() as u64,
                    outsize: bytes.len() as u64,
                    ratio,
                    label,
                };
                let (insize, outsize) = (content.len() as u64, bytes.len() as u64);
                self.finish(Some(display), |agg| {
                    agg.totals.processed += 1;
                    agg.totals.total_in  += insize;
                    agg.totals.total_out += outsize;
                    agg.log.emit(line);
                });
                Some(Processed {
                    source: file.path.clone(),
                    entry:  Entry::new(name, bytes),
                    action,
                })
            }
            Err(err) => {
                self.fail(self.mode_label(job), display, &err);
                None
            }
        }
    }

    fn pack(&self, display: &str, content: &[u8]) -> Result<(Vec<u8>, Action, String, f64)> {
        let measurements = self.backend.measure(content, &self.codecs, self.opts.level);
        let selection = policy::select(content, &measurements, self.opts.rule);
        if let Some((codec, t)) = selection.fastest_decompressor {
            debug!(
                "{}: fastest decompressor {} ({:?}), best shrink {:.1}%",
                display, self.backend.name_of(codec), t, selection.best_ratio,
            );
        }
        match selection.chosen {
            Choice::Codec(c) => {
                Ok((selection.final_bytes, Action::Packed(c), self.backend.name_of(c).to_owned(), selection.ratio))
            }
            // Raw bytes that already carry a wrapper header would be decoded
            // on extract; store them behind an identity wrapper instead.
            Choice::Raw if codec::is_packed(content) => {
                let bytes = codec::pack(CodecId::None, content, self.opts.level)
                    .map_err(|e| BundleError::decode(display, e))?;
                let ratio = policy::ratio(content.len() as u64, bytes.len() as u64);
                Ok((bytes, Action::Packed(CodecId::None), self.backend.name_of(CodecId::None).to_owned(), ratio))
            }
            Choice::Raw => Ok((selection.final_bytes, Action::Skipped, "skipped".to_owned(), selection.ratio)),
        }
    }

    fn unpack(&self, display: &str, content: &[u8]) -> Result<(Vec<u8>, Action, String, f64)> {
        let packed_with = codec::packed_codec(content);
        let raw = codec::unpack(content).map_err(|e| BundleError::decode(display, e))?;
        let (action, label) = match packed_with {
            Some(c) => (Action::Unpacked(c), self.backend.name_of(c).to_owned()),
            None    => (Action::Unchanged, "raw".to_owned()),
        };
        let ratio = policy::ratio(content.len() as u64, raw.len() as u64);
        Ok((raw, action, label, ratio))
    }

    fn mode_label(&self, job: Job) -> &'static str {
        match job {
            Job::Pack   => "pack",
            Job::Unpack => "unpack",
            Job::Toggle => "toggle",
        }
    }

    fn fail(&self, mode: &'static str, display: String, err: &BundleError) {
        let line = StatusLine::failed(mode, &display, err);
        self.finish(Some(display), |agg| {
            agg.totals.processed += 1;
            agg.totals.errors    += 1;
            agg.log.emit(line);
        });
    }

    /// Record one finished record under the lock and notify the observer.
    fn finish(&self, current: Option<String>, update: impl FnOnce(&mut Aggregate)) {
        let mut agg = lock(&self.shared);
        update(&mut agg);
        agg.progress.done += 1;
        if current.is_some() {
            agg.progress.current = current;
        }
        if let Some(cb) = self.on_progress {
            cb(&agg.progress);
        }
    }
}
