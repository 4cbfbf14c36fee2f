//! Single-shot device operations: existence checks, rename, delete, mkdir and the diagnostic probe.
//!
//! Each call makes sure a session exists, runs one bounded CLI command per path, and filters the
//! output through the noise sanitizer before deciding between success and failure.

use log::{debug, error, warn};
use std::path::Path;
use std::sync::Arc;

use crate::errors::MtpError;
use crate::mtp_cli::{BoundedCommand, CleanedResult, CliRunner, SubCommand, clean_junk};
use crate::session::SessionGuard;

/// Lowercased fragments the CLI prints when the device is gone.
const VANISHED_MARKERS: [&str; 3] = ["no mtp device", "device not found", "device disconnected"];

/// Lowercased fragment the CLI prints for a missing object.
const NOT_FOUND_MARKER: &str = "not found";

fn signal_text(cleaned: &CleanedResult) -> String {
    let mut text = String::new();
    for part in [&cleaned.stderr, &cleaned.error].into_iter().flatten() {
        text.push_str(&part.to_lowercase());
        text.push('\n');
    }
    text
}

pub(crate) fn mentions_vanished(text: &str) -> bool {
    let lower = text.to_lowercase();
    VANISHED_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// True when the output says the device is no longer there.
pub(crate) fn reports_vanished(cleaned: &CleanedResult) -> bool {
    mentions_vanished(&signal_text(cleaned))
}

pub(crate) fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// Device operations over the MTP CLI.
pub struct MtpCliClient<R: CliRunner> {
    runner: Arc<R>,
    session: Arc<SessionGuard>,
    cli_path: String,
}

impl<R: CliRunner> MtpCliClient<R> {
    pub fn new(runner: Arc<R>, session: Arc<SessionGuard>, cli_path: impl Into<String>) -> Self {
        Self {
            runner,
            session,
            cli_path: cli_path.into(),
        }
    }

    fn command(&self, storage_id: &str, sub_command: SubCommand) -> BoundedCommand {
        BoundedCommand::new(self.cli_path.as_str())
            .storage(storage_id)
            .sub(sub_command)
    }

    async fn run(&self, command: BoundedCommand) -> Result<CleanedResult, MtpError> {
        let raw = self.runner.run_bounded(command).await?;
        // No stdout at all means the command never reached the device
        if raw.stdout.is_none() {
            self.session.clear();
            return Err(MtpError::DeviceVanished);
        }
        Ok(clean_junk(raw))
    }

    /// Turns a result with real error lines into the matching error, clearing the session if
    /// the device is gone.
    fn fail(&self, cleaned: CleanedResult) -> MtpError {
        if reports_vanished(&cleaned) {
            warn!("MTP CLI: device vanished");
            self.session.clear();
            return MtpError::DeviceVanished;
        }
        MtpError::Subprocess {
            stderr: cleaned.stderr,
            error: cleaned.error,
        }
    }

    /// Runs a command that only has to succeed.
    async fn run_action(&self, command: BoundedCommand, what: &str) -> Result<(), MtpError> {
        self.session.ensure_session().await?;
        let cleaned = self.run(command).await?;
        if cleaned.has_signal() {
            let err = self.fail(cleaned);
            error!("MTP CLI: {} failed: {}", what, err);
            return Err(err);
        }
        Ok(())
    }

    /// Checks whether `path` exists on the device.
    pub async fn file_exists(&self, storage_id: &str, path: &str) -> Result<bool, MtpError> {
        self.session.ensure_session().await?;

        let cleaned = self
            .run(self.command(storage_id, SubCommand::Properties(path.to_string())))
            .await?;
        if cleaned.has_signal() {
            if signal_text(&cleaned).contains(NOT_FOUND_MARKER) && !reports_vanished(&cleaned) {
                return Ok(false);
            }
            return Err(self.fail(cleaned));
        }

        // `properties` always prints something for an existing object
        if cleaned.data.as_deref().is_none_or(|data| data.trim().is_empty()) {
            warn!("MTP CLI: empty properties output for {}, treating device as gone", path);
            self.session.clear();
            return Err(MtpError::DeviceVanished);
        }
        Ok(true)
    }

    /// Returns the first of `paths` that exists on the device.
    ///
    /// A lookup that fails for any reason other than a lost session or device ends the search
    /// with `None`, since the answer is then unknown.
    pub async fn any_file_exists(&self, storage_id: &str, paths: &[String]) -> Result<Option<String>, MtpError> {
        for path in paths {
            match self.file_exists(storage_id, path).await {
                Ok(true) => return Ok(Some(path.clone())),
                Ok(false) => {}
                Err(e) if e.needs_reconnect() => return Err(e),
                Err(e) => {
                    debug!("MTP CLI: existence check for {} failed: {}", path, e);
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Renames `old_path` in place. Only the file name of `new_path` is used.
    pub async fn rename(&self, storage_id: &str, old_path: &str, new_path: &str) -> Result<(), MtpError> {
        if old_path.is_empty() || new_path.is_empty() {
            return Err(MtpError::NoFilesSelected);
        }
        let command = self.command(
            storage_id,
            SubCommand::Rename {
                path: old_path.to_string(),
                new_name: base_name(new_path).to_string(),
            },
        );
        self.run_action(command, "rename").await
    }

    /// Deletes `paths` one by one, stopping at the first failure.
    pub async fn delete(&self, storage_id: &str, paths: &[String]) -> Result<(), MtpError> {
        if paths.is_empty() {
            return Err(MtpError::NoFilesSelected);
        }
        for path in paths {
            debug!("MTP CLI: deleting {}", path);
            self.run_action(self.command(storage_id, SubCommand::Rm(path.clone())), "delete")
                .await?;
        }
        Ok(())
    }

    /// Creates `path` and any missing parents.
    pub async fn make_dir(&self, storage_id: &str, path: &str) -> Result<(), MtpError> {
        if path.is_empty() {
            return Err(MtpError::InvalidPath);
        }
        self.run_action(self.command(storage_id, SubCommand::Mkpath(path.to_string())), "mkdir")
            .await
    }

    /// Runs the verbose `pwd` probe and returns what it printed. Doesn't need a session.
    pub async fn verbose_report(&self) -> Result<String, MtpError> {
        let command = BoundedCommand::new(self.cli_path.as_str())
            .sub(SubCommand::Pwd)
            .flag("-v");
        let cleaned = clean_junk(self.runner.run_bounded(command).await?);
        if cleaned.has_signal() {
            return Err(MtpError::Subprocess {
                stderr: cleaned.stderr,
                error: cleaned.error,
            });
        }
        Ok(cleaned.data.unwrap_or_default())
    }
}
