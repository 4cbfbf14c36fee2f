//! Error types for MTP CLI operations.

use serde::Serialize;

/// Whether a transfer failure took down the whole CLI process or only one queued item.
///
/// Both stop the batch; the distinction only changes the message shown to the user.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FailureScope {
    Process,
    Item,
}

/// Error types for MTP CLI operations.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MtpError {
    /// No session is live and device detection failed.
    NoSession { message: String },
    /// The device stopped answering where data was expected. The session has been cleared.
    DeviceVanished,
    /// Destination folder is missing or empty.
    InvalidPath,
    /// Nothing was selected for the operation.
    NoFilesSelected,
    /// A queued name can't be used on the target.
    IllegalFileName { name: String },
    /// Listing a queued item before transfer failed.
    ListingFailed {
        path: String,
        stderr: Option<String>,
        error: Option<String>,
    },
    /// Copying failed, either for the whole CLI process or for one item.
    TransferFailed {
        scope: FailureScope,
        path: Option<String>,
        stderr: Option<String>,
        error: Option<String>,
    },
    /// A single-shot CLI command reported real errors after noise filtering.
    Subprocess {
        stderr: Option<String>,
        error: Option<String>,
    },
    /// The CLI could not be started at all.
    Spawn { message: String },
    /// Local filesystem error.
    Io { path: String, message: String },
}

impl MtpError {
    /// Returns true if the UI should prompt the user to reconnect the device.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, Self::NoSession { .. } | Self::DeviceVanished)
    }

    /// Returns a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoSession { .. } => {
                "No MTP device found. Connect your phone and set it to \"File transfer\" mode.".to_string()
            }
            Self::DeviceVanished => "The device was disconnected. Reconnect it to continue.".to_string(),
            Self::InvalidPath => "Invalid destination path.".to_string(),
            Self::NoFilesSelected => "No files selected.".to_string(),
            Self::IllegalFileName { name } => format!("\"{}\" is not a valid file name.", name),
            Self::ListingFailed { path, .. } => format!("Couldn't read \"{}\".", path),
            Self::TransferFailed { scope, path, .. } => match (scope, path) {
                (FailureScope::Item, Some(path)) => format!("Copying \"{}\" failed.", path),
                (FailureScope::Item, None) => "Copying a file failed.".to_string(),
                (FailureScope::Process, _) => {
                    "The transfer was interrupted. If the progress froze, reconnect the device and try again."
                        .to_string()
                }
            },
            Self::Subprocess { stderr, error } => stderr
                .as_deref()
                .or(error.as_deref())
                .unwrap_or("The device reported an error.")
                .to_string(),
            Self::Spawn { .. } => "Couldn't start the MTP helper. Try reinstalling the app.".to_string(),
            Self::Io { path, message } => format!("{}: {}", path, message),
        }
    }
}

impl std::fmt::Display for MtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSession { message } => write!(f, "No MTP session: {message}"),
            Self::DeviceVanished => write!(f, "MTP device vanished"),
            Self::InvalidPath => write!(f, "Invalid path"),
            Self::NoFilesSelected => write!(f, "No files selected"),
            Self::IllegalFileName { name } => write!(f, "Illegal file name: {name:?}"),
            Self::ListingFailed { path, stderr, error } => {
                write!(f, "Listing failed for {path}")?;
                write_details(f, stderr, error)
            }
            Self::TransferFailed {
                scope,
                path,
                stderr,
                error,
            } => {
                match (scope, path) {
                    (FailureScope::Item, Some(path)) => write!(f, "Transfer failed for {path}")?,
                    (FailureScope::Item, None) => write!(f, "Transfer failed for an item")?,
                    (FailureScope::Process, _) => write!(f, "Transfer process failed")?,
                }
                write_details(f, stderr, error)
            }
            Self::Subprocess { stderr, error } => {
                write!(f, "MTP CLI failed")?;
                write_details(f, stderr, error)
            }
            Self::Spawn { message } => write!(f, "Failed to spawn MTP CLI: {message}"),
            Self::Io { path, message } => write!(f, "I/O error for {path}: {message}"),
        }
    }
}

fn write_details(
    f: &mut std::fmt::Formatter<'_>,
    stderr: &Option<String>,
    error: &Option<String>,
) -> std::fmt::Result {
    if let Some(stderr) = stderr {
        write!(f, ": {stderr}")?;
    }
    if let Some(error) = error {
        write!(f, " ({error})")?;
    }
    Ok(())
}

impl std::error::Error for MtpError {}

/// Failure to start or wait on the CLI process.
#[derive(Debug)]
pub struct RunnerError {
    pub command: String,
    pub source: std::io::Error,
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.command, self.source)
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<RunnerError> for MtpError {
    fn from(e: RunnerError) -> Self {
        MtpError::Spawn { message: e.to_string() }
    }
}
