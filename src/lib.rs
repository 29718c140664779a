pub mod archive;
pub mod codec;
pub mod container;
pub mod discover;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod report;
pub mod scheduler;

pub use archive::{Archive, Entry, TocEntry};
pub use codec::{CodecBackend, CodecId, Measurement};
pub use error::{BundleError, Result};
pub use orchestrator::{Mode, Orchestrator, RunOptions, RunReport};
pub use policy::{Selection, SkipRule};
pub use scheduler::{Job, Scheduler, WorkerOptions};
