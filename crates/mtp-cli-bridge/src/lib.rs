//! Bridge to an external MTP command-line client.
//!
//! The CLI does the actual protocol work. This crate builds its commands, runs it, filters the
//! noise it prints, turns its streaming output into progress events, and drives multi-file
//! pastes between the local filesystem and the device:
//!
//! - [`mtp_cli`]: escaping, command construction, process execution, output parsing
//! - [`session`]: lazily detected, process-wide device session
//! - [`device`]: single-shot operations (exists, rename, delete, mkdir, diagnostics)
//! - [`transfer`]: the paste orchestrator and its observer interface
//!
//! No logger is installed here; the host application sets one up for the `log` facade.

// Deny unused code to catch dead code early
#![deny(unused)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod device;
pub mod errors;
pub mod format;
mod ignore_poison;
pub mod mtp_cli;
pub mod session;
pub mod transfer;

pub use config::{BridgeConfig, MtpMode, PreprocessSettings, load_config, parse_config};
pub use device::MtpCliClient;
pub use errors::{FailureScope, MtpError, RunnerError};
pub use session::{CliDeviceDetector, DeviceDetector, DeviceSession, SessionGuard};
pub use transfer::{
    ChannelObserver, PasteRequest, TransferDirection, TransferEvent, TransferObserver, TransferOrchestrator,
};

#[cfg(test)]
mod test_support;
