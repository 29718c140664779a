use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::container::ContainerError;

/// Everything a run can report.
///
/// `Read`, `Write` and `Decode` are per-file: they are counted and the batch
/// carries on.  `Argument` and `Pool` are raised before any file is touched
/// and end the run.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("{}: cannot read file: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("{}: cannot write to file: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("{name}: cannot decode: {reason}")]
    Decode { name: String, reason: String },
    #[error("{0}")]
    Argument(String),
    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl BundleError {
    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BundleError::Read { path: path.into(), source }
    }

    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BundleError::Write { path: path.into(), source }
    }

    pub fn decode(name: impl Into<String>, reason: impl ToString) -> Self {
        BundleError::Decode { name: name.into(), reason: reason.to_string() }
    }

    /// Message without the path, for status lines that print it already.
    pub fn reason(&self) -> String {
        match self {
            BundleError::Read { source, .. }  => format!("cannot read file: {source}"),
            BundleError::Write { source, .. } => format!("cannot write to file: {source}"),
            BundleError::Decode { reason, .. } => format!("cannot decode: {reason}"),
            other => other.to_string(),
        }
    }

    /// Fatal errors abort the run; everything else is counted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BundleError::Argument(_) | BundleError::Pool(_))
    }
}

/// Map a container failure on `path` to the taxonomy: I/O problems are read
/// errors, anything structural is a decode error.
pub fn container_error(path: &std::path::Path, e: ContainerError) -> BundleError {
    match e {
        ContainerError::Io(source) => BundleError::read(path, source),
        other => BundleError::decode(path.display().to_string(), other),
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
