//! Type definitions for paste operations.
//!
//! Contains the request, the queue, event payloads and the phase enum.

use serde::{Deserialize, Serialize};

use crate::errors::MtpError;

// ============================================================================
// Request
// ============================================================================

/// Which way files move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    LocalToMtp,
    MtpToLocal,
}

impl TransferDirection {
    /// True when the queued sources are on the local filesystem.
    pub fn sources_are_local(self) -> bool {
        matches!(self, Self::LocalToMtp)
    }
}

/// A paste as requested by the file explorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteRequest {
    /// Folder the queued items are copied into. Absolute.
    pub destination_folder: Option<String>,
    /// Source paths, in the order they must be copied
    pub queue: Vec<String>,
    pub direction: TransferDirection,
    /// Device storage to select before transferring
    pub storage_id: String,
}

/// One queued source with its resolved destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source: String,
    pub destination: String,
}

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failed,
}

/// Phase of a paste operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    Preflight,
    /// One bounded command per item
    LegacyPerItem,
    /// One streaming process for the whole queue
    StreamingBatch,
    /// Progress teardown and directory refresh
    Draining,
    Terminal(TransferOutcome),
}

// ============================================================================
// Events
// ============================================================================

/// Emitted once per queued item while sources are walked before a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessEvent {
    pub operation_id: String,
    pub full_path: String,
}

/// Progress payload, at most one per second.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub operation_id: String,
    /// Since the paste started, as "HH:MM:SS"
    pub elapsed_time: String,
    /// Bytes per second
    pub speed: u64,
    /// `speed` for display, like "1.5 MB/s"
    pub speed_label: String,
    /// 0-100
    pub active_file_progress: f64,
    /// File name only, not the full path
    pub current_file: String,
    pub active_file_size: u64,
    pub active_file_size_sent: u64,
    pub total_files: usize,
    pub files_sent: usize,
    /// Zero when the sources weren't walked beforehand
    pub total_file_size: u64,
    pub total_file_size_sent: u64,
    /// 0-100. By bytes when the total size is known, by file count otherwise.
    pub total_file_progress: f64,
    pub direction: TransferDirection,
}

/// Error event payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferErrorEvent {
    pub operation_id: String,
    pub error: MtpError,
    /// Ready to show to the user
    pub message: String,
    pub stderr: Option<String>,
    /// Output of the failing command, when it printed any
    pub data: Option<String>,
}

/// Result of a successful paste.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub operation_id: String,
    pub files_transferred: usize,
    pub bytes_transferred: u64,
}
