//! Device session lifecycle.
//!
//! A session means "a device answered and storage can be selected". It starts absent, is created
//! lazily by the first device-facing call, and goes back to absent when any operation finds the
//! device gone. Concurrent callers that find it absent share one detection.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::errors::MtpError;
use crate::ignore_poison::IgnorePoison;
use crate::mtp_cli::{BoundedCommand, CliRunner, SubCommand, clean_junk};

/// A detected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    /// Unique per detection, so a re-detected device gets a new id.
    pub id: String,
    /// What the device reported when probed.
    pub banner: String,
}

/// Finds a device and opens a session on it.
pub trait DeviceDetector: Send + Sync + 'static {
    fn detect(&self) -> BoxFuture<'static, Result<DeviceSession, MtpError>>;
}

/// Detects the device by probing it with the CLI's `pwd` command.
pub struct CliDeviceDetector<R: CliRunner> {
    runner: Arc<R>,
    cli_path: String,
}

impl<R: CliRunner> CliDeviceDetector<R> {
    pub fn new(runner: Arc<R>, cli_path: impl Into<String>) -> Self {
        Self {
            runner,
            cli_path: cli_path.into(),
        }
    }
}

impl<R: CliRunner> DeviceDetector for CliDeviceDetector<R> {
    fn detect(&self) -> BoxFuture<'static, Result<DeviceSession, MtpError>> {
        let runner = Arc::clone(&self.runner);
        let command = BoundedCommand::new(self.cli_path.as_str()).sub(SubCommand::Pwd);

        async move {
            let cleaned = clean_junk(runner.run_bounded(command).await?);
            if cleaned.has_signal() {
                let message = cleaned
                    .stderr
                    .or(cleaned.error)
                    .unwrap_or_else(|| "device probe failed".to_string());
                return Err(MtpError::NoSession { message });
            }

            let banner = cleaned.data.unwrap_or_default().trim().to_string();
            if banner.is_empty() {
                return Err(MtpError::NoSession {
                    message: "no device answered the probe".to_string(),
                });
            }

            Ok(DeviceSession {
                id: uuid::Uuid::new_v4().to_string(),
                banner,
            })
        }
        .boxed()
    }
}

type SharedDetection = Shared<BoxFuture<'static, Result<DeviceSession, MtpError>>>;

enum SessionState {
    Absent,
    Detecting {
        generation: u64,
        detection: SharedDetection,
    },
    Live(DeviceSession),
}

struct Inner {
    state: SessionState,
    /// Bumped on every new detection and every clear. A detection only stores its result if
    /// the generation is unchanged when it finishes.
    generation: u64,
}

/// Owns the process-wide device session.
pub struct SessionGuard {
    detector: Arc<dyn DeviceDetector>,
    inner: Mutex<Inner>,
}

impl SessionGuard {
    pub fn new(detector: Arc<dyn DeviceDetector>) -> Self {
        Self {
            detector,
            inner: Mutex::new(Inner {
                state: SessionState::Absent,
                generation: 0,
            }),
        }
    }

    /// Returns the live session, detecting the device first if there is none.
    ///
    /// Callers arriving while a detection is running wait for that same detection. On failure
    /// the session stays absent, so the next call detects again.
    pub async fn ensure_session(&self) -> Result<DeviceSession, MtpError> {
        let (generation, detection) = {
            let mut inner = self.inner.lock_ignore_poison();
            let pending = match &inner.state {
                SessionState::Live(session) => return Ok(session.clone()),
                SessionState::Detecting { generation, detection } => Some((*generation, detection.clone())),
                SessionState::Absent => None,
            };
            match pending {
                Some(pending) => pending,
                None => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    debug!("MTP session: starting detection #{}", generation);
                    let detection = self.detector.detect().shared();
                    inner.state = SessionState::Detecting {
                        generation,
                        detection: detection.clone(),
                    };
                    (generation, detection)
                }
            }
        };

        let result = detection.await;

        let mut inner = self.inner.lock_ignore_poison();
        let current = matches!(
            inner.state,
            SessionState::Detecting { generation: g, .. } if g == generation
        );
        if current {
            inner.state = match &result {
                Ok(session) => {
                    info!("MTP session: device detected ({})", session.id);
                    SessionState::Live(session.clone())
                }
                Err(e) => {
                    warn!("MTP session: detection failed: {}", e);
                    SessionState::Absent
                }
            };
        }
        result
    }

    /// Drops the session so the next device-facing call detects again.
    ///
    /// A detection still in flight keeps running for its waiters, but its result is not stored.
    pub fn clear(&self) {
        let mut inner = self.inner.lock_ignore_poison();
        if !matches!(inner.state, SessionState::Absent) {
            info!("MTP session: cleared");
        }
        inner.generation += 1;
        inner.state = SessionState::Absent;
    }

    /// The live session, if any. Never triggers detection.
    pub fn current(&self) -> Option<DeviceSession> {
        match &self.inner.lock_ignore_poison().state {
            SessionState::Live(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.current().is_some()
    }
}
