//! Plumbing around the external MTP CLI.
//!
//! Commands flow down (`command` → `escape` → `runner`), results flow up
//! (`runner` → `sanitize` / `progress`). Nothing in here knows about sessions or transfers.

pub mod command;
pub mod escape;
pub mod progress;
pub mod runner;
pub mod sanitize;

pub use command::{BoundedCommand, StreamingCommand, SubCommand};
pub use escape::{EscapeCase, escape_case, escape_shell_mtp};
pub use progress::{
    PROGRESS_SAMPLE_INTERVAL_MS, ProgressSample, ProgressState, ProgressTracker, SampledProgress, StreamLine,
    TrackerUpdate, parse_stream_line,
};
pub use runner::{CliRunner, StreamEvent, StreamingProcess, SystemRunner};
pub use sanitize::{CleanedResult, LineClass, RawResult, classify, classify_batch_line, clean_junk};
