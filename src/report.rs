//! Status lines, the run summary, and the log that collects them.

use std::fmt;
use std::time::Duration;

use crate::error::BundleError;
use crate::policy::ratio;

/// Running totals shared by every worker of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// Files attempted (directories excluded, failures included).
    pub processed: usize,
    pub errors:    usize,
    pub total_in:  u64,
    pub total_out: u64,
}

impl Totals {
    pub fn ratio(&self) -> f64 {
        ratio(self.total_in, self.total_out)
    }
}

/// One line of per-file (or per-step) output.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLine {
    /// `[ OK ] pack: a.txt: 100 -> 40 (60.0%) (zstd)`
    Done {
        mode:    &'static str,
        path:    String,
        insize:  u64,
        outsize: u64,
        ratio:   f64,
        label:   String,
    },
    /// `[FAIL] pack: a.txt: cannot read file: ...`
    Failed {
        mode:   &'static str,
        path:   String,
        reason: String,
    },
    /// Free-form step report, e.g. `[ OK ] move: 3 files`.
    Note { ok: bool, text: String },
}

impl StatusLine {
    pub fn failed(mode: &'static str, path: &str, err: &BundleError) -> Self {
        StatusLine::Failed { mode, path: path.to_owned(), reason: err.reason() }
    }

    pub fn is_failure(&self) -> bool {
        match self {
            StatusLine::Done { .. }      => false,
            StatusLine::Failed { .. }    => true,
            StatusLine::Note { ok, .. }  => !ok,
        }
    }
}

fn tag(ok: bool) -> &'static str {
    if ok { "[ OK ]" } else { "[FAIL]" }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Done { mode, path, insize, outsize, ratio, label } => write!(
                f,
                "{} {}: {}: {} -> {} ({:.1}%) ({})",
                tag(true), mode, path, insize, outsize, ratio, label,
            ),
            StatusLine::Failed { mode, path, reason } => {
                write!(f, "{} {}: {}: {}", tag(false), mode, path, reason)
            }
            StatusLine::Note { ok, text } => write!(f, "{} {}", tag(*ok), text),
        }
    }
}

/// Final line of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub totals:  Totals,
    pub elapsed: Duration,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        write!(
            f,
            "{} {} processed files, {} errors; {} bytes -> {} bytes; ({:.1}%) in {:.3}s",
            tag(t.errors == 0),
            t.processed,
            t.errors,
            t.total_in,
            t.total_out,
            t.ratio(),
            self.elapsed.as_secs_f64(),
        )
    }
}

/// How much of the log reaches the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Echo {
    /// Nothing is printed; lines are only collected.
    Silent,
    /// Failures only.
    Quiet,
    #[default]
    Normal,
}

/// Collects status lines and echoes them as they arrive.  Successes go to
/// stdout, failures to stderr.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    echo:  Echo,
    lines: Vec<StatusLine>,
}

impl StatusLog {
    pub fn new(echo: Echo) -> Self {
        Self { echo, lines: Vec::new() }
    }

    pub fn echo(&self) -> Echo {
        self.echo
    }

    pub fn emit(&mut self, line: StatusLine) {
        match (self.echo, line.is_failure()) {
            (Echo::Silent, _)      => {}
            (_, true)              => eprintln!("{line}"),
            (Echo::Normal, false)  => println!("{line}"),
            (Echo::Quiet, false)   => {}
        }
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[StatusLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<StatusLine> {
        self.lines
    }
}
