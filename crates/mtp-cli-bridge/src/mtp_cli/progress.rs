//! Parsing of streaming transfer output and progress sampling.
//!
//! During a batch the CLI prints one line per progress tick and one per finished file:
//!
//! ```text
//! :progress /DCIM/Camera/IMG 0001.jpg 1048576 3145728
//! :done
//! ```
//!
//! The path may contain spaces, so the byte counts are taken from the end of the line and
//! everything between the tag and the counts is the path. The format is not documented by the
//! CLI; anything that doesn't fit is dropped, never raised.

use regex::Regex;
use std::sync::LazyLock;

/// Minimum time between two externally visible progress updates.
pub const PROGRESS_SAMPLE_INTERVAL_MS: u64 = 1000;

const PROGRESS_TAG: &str = ":progress";
const DONE_TAG: &str = ":done";

/// `<bytesSent> <totalBytes>` at the end of a line, starting at a token boundary.
static TRAILING_COUNTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^| )(\d+) (\d+)$").expect("trailing counts pattern is valid"));

/// One decoded `:progress` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSample {
    pub file_path: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

/// A recognized streaming line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Progress(ProgressSample),
    Done,
}

/// Decodes one line of streaming output. Returns `None` for anything that isn't a well-formed
/// `:progress` or `:done` line, including unknown tags.
pub fn parse_stream_line(line: &str) -> Option<StreamLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = line.split(' ').collect();
    match tokens[0] {
        DONE_TAG => Some(StreamLine::Done),
        PROGRESS_TAG => parse_progress(line, &tokens).map(StreamLine::Progress),
        _ => None,
    }
}

fn parse_progress(line: &str, tokens: &[&str]) -> Option<ProgressSample> {
    if tokens.len() < 3 {
        return None;
    }
    let captures = TRAILING_COUNTS.captures(line)?;
    let bytes_sent = captures[1].parse::<u64>().ok()?;
    let total_bytes = captures[2].parse::<u64>().ok()?;

    // The two count tokens are always the last two, so the path is everything in between.
    let file_path = tokens[1..tokens.len() - 2].join(" ");

    Some(ProgressSample {
        file_path,
        bytes_sent,
        total_bytes,
    })
}

/// Counters carried across samples. All zero at the start of each file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub prev_block_remaining: u64,
    pub curr_block_remaining: u64,
    /// Unix timestamp in milliseconds
    pub prev_timestamp: u64,
    /// Unix timestamp in milliseconds
    pub curr_timestamp: u64,
}

/// A sample that crossed the sampling gate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledProgress {
    pub sample: ProgressSample,
    /// Bytes per second since the previous visible sample
    pub speed: u64,
}

/// Result of feeding one line (or one polled sample) to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerUpdate {
    /// Visible update, at most one per [`PROGRESS_SAMPLE_INTERVAL_MS`].
    Sampled(SampledProgress),
    /// State was updated but the update is folded into the next visible one.
    Coalesced(ProgressSample),
    /// A file finished; state is back to zero.
    FileDone,
    /// Not a progress line.
    Ignored,
}

/// Rate-limited progress sampling with speed estimation.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: ProgressState,
    current_file: Option<String>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Decodes `line` and updates state. `now_ms` is a Unix timestamp in milliseconds.
    pub fn ingest_line(&mut self, line: &str, now_ms: u64) -> TrackerUpdate {
        match parse_stream_line(line) {
            Some(StreamLine::Progress(sample)) => self.observe(sample, now_ms),
            Some(StreamLine::Done) => {
                self.finish_file();
                TrackerUpdate::FileDone
            }
            None => TrackerUpdate::Ignored,
        }
    }

    /// Resets all counters, closing the current file.
    pub fn finish_file(&mut self) {
        self.state = ProgressState::default();
        self.current_file = None;
    }

    /// Updates state from one sample and decides whether it is visible.
    pub fn observe(&mut self, sample: ProgressSample, now_ms: u64) -> TrackerUpdate {
        // A new path without a `:done` in between still starts a new file.
        if self
            .current_file
            .as_deref()
            .is_some_and(|current| current != sample.file_path)
        {
            self.finish_file();
        }

        let mut remaining = sample.total_bytes.saturating_sub(sample.bytes_sent);
        if self.current_file.is_some() {
            // Remaining bytes only shrink within one file.
            remaining = remaining.min(self.state.curr_block_remaining);
        }
        self.current_file = Some(sample.file_path.clone());
        self.state.curr_block_remaining = remaining;
        self.state.curr_timestamp = now_ms;

        let elapsed_ms = now_ms.saturating_sub(self.state.prev_timestamp);
        if elapsed_ms < PROGRESS_SAMPLE_INTERVAL_MS {
            return TrackerUpdate::Coalesced(sample);
        }

        let delta = self.state.prev_block_remaining.saturating_sub(remaining);
        let speed = (delta as f64 * (1000.0 / elapsed_ms as f64)).round() as u64;

        self.state.prev_block_remaining = self.state.curr_block_remaining;
        self.state.prev_timestamp = self.state.curr_timestamp;

        TrackerUpdate::Sampled(SampledProgress { sample, speed })
    }
}
