//! Paste execution: preflight, optional preprocessing, then the legacy or streaming driver.
//!
//! Phases: `Idle → Preflight → (LegacyPerItem | StreamingBatch) → Draining → Terminal`.
//! `Draining` runs on every path, including preflight rejections, and calls
//! [`TransferObserver::on_finalize`] exactly once. Items are always handled front to back and
//! the first failure stops the batch. Already copied items are left in place.

use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use super::observer::TransferObserver;
use super::types::{
    PasteRequest, PreprocessEvent, TransferDirection, TransferErrorEvent, TransferItem, TransferOutcome,
    TransferPhase, TransferProgress, TransferSummary,
};
use crate::config::{BridgeConfig, MtpMode};
use crate::device::{mentions_vanished, reports_vanished};
use crate::errors::{FailureScope, MtpError};
use crate::format::{format_elapsed, format_speed, percentage, unix_millis_now};
use crate::mtp_cli::{
    BoundedCommand, CleanedResult, CliRunner, LineClass, ProgressSample, ProgressTracker, StreamEvent,
    StreamingCommand, SubCommand, TrackerUpdate, classify_batch_line, clean_junk,
};
use crate::session::SessionGuard;

/// Size of one queued item, as found before copying it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ItemListing {
    bytes: u64,
    files: usize,
}

/// Per-paste mutable state. Owned by one `paste` call.
struct TransferRun<'a> {
    operation_id: String,
    direction: TransferDirection,
    observer: &'a dyn TransferObserver,
    phase: TransferPhase,
    started_at_ms: u64,
    total_files: usize,
    total_file_size: u64,
    files_sent: usize,
    /// Bytes of fully finished files
    completed_bytes: u64,
    /// Latest sample of the file in flight
    active: Option<ProgressSample>,
    /// Stdout of the failing command, passed on to `on_error`
    failure_data: Option<String>,
}

impl<'a> TransferRun<'a> {
    fn new(direction: TransferDirection, observer: &'a dyn TransferObserver) -> Self {
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            direction,
            observer,
            phase: TransferPhase::Idle,
            started_at_ms: unix_millis_now(),
            total_files: 0,
            total_file_size: 0,
            files_sent: 0,
            completed_bytes: 0,
            active: None,
            failure_data: None,
        }
    }

    fn enter(&mut self, phase: TransferPhase) {
        debug!("MTP paste: {} {:?} -> {:?}", self.operation_id, self.phase, phase);
        self.phase = phase;
    }

    fn track(&mut self, sample: ProgressSample) {
        self.active = Some(sample);
    }

    /// Closes the file in flight. `bytes` overrides the last sampled size when given.
    fn file_done(&mut self, files: usize, bytes: Option<u64>) {
        let sampled = self.active.take().map(|sample| sample.total_bytes).unwrap_or(0);
        self.completed_bytes += bytes.unwrap_or(sampled);
        self.files_sent += files;
    }

    fn progress(&self, sample: &ProgressSample, speed: u64) -> TransferProgress {
        let total_file_size_sent = self.completed_bytes + sample.bytes_sent;
        let total_file_progress = if self.total_file_size > 0 {
            percentage(total_file_size_sent, self.total_file_size)
        } else {
            percentage(self.files_sent as u64, self.total_files as u64)
        };
        let current_file = Path::new(&sample.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| sample.file_path.clone());

        TransferProgress {
            operation_id: self.operation_id.clone(),
            elapsed_time: format_elapsed(unix_millis_now().saturating_sub(self.started_at_ms)),
            speed,
            speed_label: format_speed(speed),
            active_file_progress: percentage(sample.bytes_sent, sample.total_bytes),
            current_file,
            active_file_size: sample.total_bytes,
            active_file_size_sent: sample.bytes_sent,
            total_files: self.total_files,
            files_sent: self.files_sent,
            total_file_size: self.total_file_size,
            total_file_size_sent,
            total_file_progress,
            direction: self.direction,
        }
    }

    fn emit_progress(&self, sample: &ProgressSample, speed: u64) {
        self.observer.on_progress(&self.progress(sample, speed));
    }

    fn summary(&self) -> TransferSummary {
        TransferSummary {
            operation_id: self.operation_id.clone(),
            files_transferred: self.files_sent,
            bytes_transferred: self.completed_bytes,
        }
    }
}

fn file_name_of(path: &str) -> Option<&str> {
    Path::new(path).file_name().and_then(|name| name.to_str())
}

/// Rejects a paste before anything runs, and resolves each item's destination.
pub(crate) fn preflight(request: &PasteRequest) -> Result<Vec<TransferItem>, MtpError> {
    let destination_folder = match request.destination_folder.as_deref() {
        Some(folder) if !folder.trim().is_empty() => folder,
        _ => return Err(MtpError::InvalidPath),
    };
    if request.queue.is_empty() {
        return Err(MtpError::NoFilesSelected);
    }

    request
        .queue
        .iter()
        .map(|source| {
            let name = match file_name_of(source) {
                Some(name) if !name.is_empty() && !name.contains('\0') => name,
                _ => {
                    return Err(MtpError::IllegalFileName {
                        name: source.clone(),
                    });
                }
            };
            let destination = if request.direction.sources_are_local() {
                // Device paths always use `/`, whatever the host separator is
                format!("{}/{}", destination_folder.trim_end_matches('/'), name)
            } else {
                Path::new(destination_folder).join(name).to_string_lossy().into_owned()
            };
            Ok(TransferItem {
                source: source.clone(),
                destination,
            })
        })
        .collect()
}

/// Walks a local path, summing regular file sizes. Errors on the root are returned.
fn walk_local(path: &str) -> Result<ItemListing, walkdir::Error> {
    let mut listing = ItemListing::default();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            listing.files += 1;
            listing.bytes += entry.metadata()?.len();
        }
    }
    Ok(listing)
}

/// Bytes written so far under a local destination. Missing means nothing written yet.
fn local_bytes_written(path: &str) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Lists a local source on the blocking pool.
async fn list_local(path: &str) -> Result<ItemListing, MtpError> {
    let owned = path.to_string();
    match tokio::task::spawn_blocking(move || walk_local(&owned)).await {
        Ok(listing) => listing.map_err(|e| MtpError::ListingFailed {
            path: path.to_string(),
            stderr: None,
            error: Some(e.to_string()),
        }),
        Err(e) => Err(MtpError::Io {
            path: path.to_string(),
            message: format!("Task failed: {}", e),
        }),
    }
}

async fn poll_bytes_written(path: &str) -> u64 {
    let owned = path.to_string();
    tokio::task::spawn_blocking(move || local_bytes_written(&owned))
        .await
        .unwrap_or(0)
}

/// Reads the object size from `properties` output (`Key: value` lines).
fn parse_object_size(data: &str) -> Option<u64> {
    data.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !key.to_lowercase().contains("size") {
            return None;
        }
        value.trim().parse().ok()
    })
}

/// Runs pastes between the local filesystem and the device.
pub struct TransferOrchestrator<R: CliRunner> {
    runner: Arc<R>,
    session: Arc<SessionGuard>,
    config: BridgeConfig,
}

impl<R: CliRunner> TransferOrchestrator<R> {
    pub fn new(runner: Arc<R>, session: Arc<SessionGuard>, config: BridgeConfig) -> Self {
        Self {
            runner,
            session,
            config,
        }
    }

    /// Copies every queued item into the destination folder, in order.
    ///
    /// Events go to `observer`; the return value carries the same outcome.
    pub async fn paste(
        &self,
        request: PasteRequest,
        observer: &dyn TransferObserver,
    ) -> Result<TransferSummary, MtpError> {
        let mut run = TransferRun::new(request.direction, observer);
        info!(
            "MTP paste: {} starting, {} item(s), {:?}",
            run.operation_id,
            request.queue.len(),
            request.direction
        );

        let result = self.execute(&mut run, &request).await;

        run.enter(TransferPhase::Draining);
        observer.on_finalize(&run.operation_id);

        match result {
            Ok(()) => {
                run.enter(TransferPhase::Terminal(TransferOutcome::Success));
                info!(
                    "MTP paste: {} completed, {} file(s)",
                    run.operation_id, run.files_sent
                );
                observer.on_completed(&run.operation_id);
                Ok(run.summary())
            }
            Err(e) => {
                run.enter(TransferPhase::Terminal(TransferOutcome::Failed));
                error!("MTP paste: {} failed: {}", run.operation_id, e);
                let stderr = match &e {
                    MtpError::ListingFailed { stderr, .. }
                    | MtpError::TransferFailed { stderr, .. }
                    | MtpError::Subprocess { stderr, .. } => stderr.clone(),
                    _ => None,
                };
                observer.on_error(&TransferErrorEvent {
                    operation_id: run.operation_id.clone(),
                    message: e.user_message(),
                    error: e.clone(),
                    stderr,
                    data: run.failure_data.take(),
                });
                Err(e)
            }
        }
    }

    async fn execute(&self, run: &mut TransferRun<'_>, request: &PasteRequest) -> Result<(), MtpError> {
        run.enter(TransferPhase::Preflight);
        let items = preflight(request)?;
        run.total_files = items.len();

        self.session.ensure_session().await?;
        self.preprocess(run, &items).await;

        match self.config.mode {
            MtpMode::Legacy => {
                run.enter(TransferPhase::LegacyPerItem);
                self.run_legacy(run, &request.storage_id, &items).await
            }
            MtpMode::Streaming => {
                run.enter(TransferPhase::StreamingBatch);
                self.run_streaming(run, &request.storage_id, &items).await
            }
        }
    }

    /// Walks local sources to fill in totals, when enabled for this direction.
    async fn preprocess(&self, run: &mut TransferRun<'_>, items: &[TransferItem]) {
        let enabled = match run.direction {
            TransferDirection::LocalToMtp => self.config.preprocess.local_to_mtp,
            TransferDirection::MtpToLocal => self.config.preprocess.mtp_to_local,
        };
        if !enabled {
            return;
        }
        if !run.direction.sources_are_local() {
            debug!("MTP paste: preprocessing skipped, sources are on the device");
            return;
        }

        let mut totals = ItemListing::default();
        for item in items {
            run.observer.on_preprocess(&PreprocessEvent {
                operation_id: run.operation_id.clone(),
                full_path: item.source.clone(),
            });
            match list_local(&item.source).await {
                Ok(listing) => {
                    totals.files += listing.files;
                    totals.bytes += listing.bytes;
                }
                // Listing proper happens later and reports this
                Err(e) => warn!("MTP paste: couldn't walk {}: {}", item.source, e),
            }
        }
        debug!(
            "MTP paste: preprocessed {} file(s), {} bytes",
            totals.files, totals.bytes
        );
        run.total_files = totals.files;
        run.total_file_size = totals.bytes;
    }

    fn transfer_sub_command(direction: TransferDirection, item: &TransferItem) -> SubCommand {
        match direction {
            TransferDirection::LocalToMtp => SubCommand::Put {
                source: item.source.clone(),
                destination: item.destination.clone(),
            },
            TransferDirection::MtpToLocal => SubCommand::Get {
                source: item.source.clone(),
                destination: item.destination.clone(),
            },
        }
    }

    /// Error for a result with real error lines, clearing the session if the device is gone.
    fn device_failure(&self, cleaned: &CleanedResult, otherwise: impl FnOnce() -> MtpError) -> MtpError {
        if reports_vanished(cleaned) {
            self.session.clear();
            return MtpError::DeviceVanished;
        }
        otherwise()
    }

    // ========================================================================
    // Legacy: one bounded command per item
    // ========================================================================

    async fn list_item(
        &self,
        storage_id: &str,
        direction: TransferDirection,
        item: &TransferItem,
    ) -> Result<ItemListing, MtpError> {
        if direction.sources_are_local() {
            return list_local(&item.source).await;
        }

        let command = BoundedCommand::new(self.config.cli_path.as_str())
            .storage(storage_id)
            .sub(SubCommand::Properties(item.source.clone()));
        let cleaned = clean_junk(self.runner.run_bounded(command).await?);
        if cleaned.has_signal() {
            return Err(self.device_failure(&cleaned, || MtpError::ListingFailed {
                path: item.source.clone(),
                stderr: cleaned.stderr.clone(),
                error: cleaned.error.clone(),
            }));
        }

        let data = cleaned.data.as_deref().unwrap_or_default();
        if data.trim().is_empty() {
            warn!("MTP paste: empty listing for {}, treating device as gone", item.source);
            self.session.clear();
            return Err(MtpError::DeviceVanished);
        }
        Ok(ItemListing {
            bytes: parse_object_size(data).unwrap_or(0),
            files: 1,
        })
    }

    async fn run_legacy(
        &self,
        run: &mut TransferRun<'_>,
        storage_id: &str,
        items: &[TransferItem],
    ) -> Result<(), MtpError> {
        let poll_interval = Duration::from_millis(self.config.legacy_poll_interval_ms.max(1));

        for (index, item) in items.iter().enumerate() {
            debug!(
                "MTP paste: item {}/{}: {} -> {}",
                index + 1,
                items.len(),
                item.source,
                item.destination
            );
            let listing = self.list_item(storage_id, run.direction, item).await?;

            let command = BoundedCommand::new(self.config.cli_path.as_str())
                .storage(storage_id)
                .sub(Self::transfer_sub_command(run.direction, item));
            let transfer = self.runner.run_bounded(command);
            tokio::pin!(transfer);

            let mut ticker = tokio::time::interval(poll_interval);
            let mut tracker = ProgressTracker::new();
            let raw = loop {
                tokio::select! {
                    result = &mut transfer => break result?,
                    _ = ticker.tick() => {
                        // Uploads have nothing to poll, so they only report start and end
                        let sent = match run.direction {
                            TransferDirection::MtpToLocal => poll_bytes_written(&item.destination).await,
                            TransferDirection::LocalToMtp => 0,
                        };
                        let sample = ProgressSample {
                            file_path: item.source.clone(),
                            bytes_sent: sent.min(listing.bytes),
                            total_bytes: listing.bytes,
                        };
                        run.track(sample.clone());
                        if let TrackerUpdate::Sampled(sampled) = tracker.observe(sample, unix_millis_now()) {
                            run.emit_progress(&sampled.sample, sampled.speed);
                        }
                    }
                }
            };

            let cleaned = clean_junk(raw);
            if cleaned.has_signal() {
                run.failure_data = cleaned.data.clone().filter(|data| !data.trim().is_empty());
                return Err(self.device_failure(&cleaned, || MtpError::TransferFailed {
                    scope: FailureScope::Item,
                    path: Some(item.source.clone()),
                    stderr: cleaned.stderr.clone(),
                    error: cleaned.error.clone(),
                }));
            }

            let finished = ProgressSample {
                file_path: item.source.clone(),
                bytes_sent: listing.bytes,
                total_bytes: listing.bytes,
            };
            run.file_done(listing.files, Some(listing.bytes));
            run.emit_progress(&finished, 0);
        }
        Ok(())
    }

    // ========================================================================
    // Streaming: one chained process for the whole queue
    // ========================================================================

    async fn run_streaming(
        &self,
        run: &mut TransferRun<'_>,
        storage_id: &str,
        items: &[TransferItem],
    ) -> Result<(), MtpError> {
        let command = items.iter().fold(
            StreamingCommand::new(self.config.cli_path.as_str()).storage(storage_id),
            |command, item| command.sub(Self::transfer_sub_command(run.direction, item)),
        );
        let mut process = self.runner.spawn_streaming(command)?;

        let mut tracker = ProgressTracker::new();
        let mut stderr_index = 0usize;
        let mut failure: Option<MtpError> = None;
        let mut exit_code: Option<i32> = None;

        while let Some(event) = process.next_event().await {
            match event {
                StreamEvent::Stdout(line) => {
                    if failure.is_some() {
                        continue;
                    }
                    match tracker.ingest_line(&line, unix_millis_now()) {
                        TrackerUpdate::Sampled(sampled) => {
                            run.track(sampled.sample.clone());
                            run.emit_progress(&sampled.sample, sampled.speed);
                        }
                        TrackerUpdate::Coalesced(sample) => run.track(sample),
                        TrackerUpdate::FileDone => run.file_done(1, None),
                        TrackerUpdate::Ignored => debug!("MTP paste: ignoring output line {:?}", line),
                    }
                }
                StreamEvent::Stderr(line) => {
                    let index = stderr_index;
                    stderr_index += 1;
                    if failure.is_some() || classify_batch_line(&line, index) == LineClass::Benign {
                        continue;
                    }
                    error!("MTP paste: CLI reported: {}", line);
                    failure = Some(if mentions_vanished(&line) {
                        self.session.clear();
                        MtpError::DeviceVanished
                    } else {
                        // Between a `:done` and the next `:progress`, the next queued item is in flight
                        let path = match &run.active {
                            Some(sample) => Some(sample.file_path.clone()),
                            None if run.files_sent > 0 => items.get(run.files_sent).map(|item| item.source.clone()),
                            None => None,
                        };
                        MtpError::TransferFailed {
                            scope: if path.is_some() {
                                FailureScope::Item
                            } else {
                                FailureScope::Process
                            },
                            path,
                            stderr: Some(line),
                            error: None,
                        }
                    });
                    process.kill();
                }
                StreamEvent::Exit { code } => {
                    exit_code = code;
                    break;
                }
            }
        }
        debug!("MTP paste: streaming process exited with {:?}", exit_code);

        if let Some(failure) = failure {
            return Err(failure);
        }
        // A kill from outside (no code) counts as a normal exit
        if let Some(code) = exit_code.filter(|code| *code != 0) {
            return Err(MtpError::TransferFailed {
                scope: FailureScope::Process,
                path: None,
                stderr: None,
                error: Some(format!("MTP CLI exited with code {}", code)),
            });
        }
        Ok(())
    }
}
