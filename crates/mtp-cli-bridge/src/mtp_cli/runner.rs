//! MTP CLI process execution.
//!
//! Bounded commands run to completion and return everything they printed. Streaming commands
//! hand back a [`StreamingProcess`] whose stdout and stderr lines arrive as events while the
//! process runs, followed by exactly one [`StreamEvent::Exit`].

use log::{debug, warn};
use std::future::Future;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use super::command::{BoundedCommand, StreamingCommand};
use super::sanitize::RawResult;
use crate::errors::RunnerError;

/// One notification from a running streaming process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Stdout(String),
    Stderr(String),
    /// Always the last event. `code` is `None` when the process was killed by a signal.
    Exit { code: Option<i32> },
}

/// Handle to a running streaming process.
pub struct StreamingProcess {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    kill: Option<oneshot::Sender<()>>,
}

impl StreamingProcess {
    /// Wraps an event feed. Sending on (or dropping) the other end of `kill` must end the process.
    pub fn new(events: mpsc::UnboundedReceiver<StreamEvent>, kill: oneshot::Sender<()>) -> Self {
        Self {
            events,
            kill: Some(kill),
        }
    }

    /// Next event in emission order, or `None` once the feed is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Asks the process to terminate. The `Exit` event still arrives afterwards.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Executes MTP CLI commands.
///
/// Implementations must not run two commands against the same device at once; callers
/// serialize their calls.
pub trait CliRunner: Send + Sync + 'static {
    /// Runs `command` to completion and captures its output.
    fn run_bounded(&self, command: BoundedCommand) -> impl Future<Output = Result<RawResult, RunnerError>> + Send;

    /// Starts `command` and returns its live event feed.
    fn spawn_streaming(&self, command: StreamingCommand) -> Result<StreamingProcess, RunnerError>;
}

/// Runs the CLI through `sh`, as a real child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    // `exec` so that killing the child kills the CLI, not just the shell around it.
    cmd.arg("-c").arg(format!("exec {}", line));
    cmd.stdin(Stdio::null());
    cmd
}

impl SystemRunner {
    pub(crate) async fn run_shell(&self, line: &str) -> Result<RawResult, RunnerError> {
        debug!("MTP CLI: running {}", line);

        let output = shell_command(line).output().await.map_err(|source| RunnerError {
            command: line.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let error = if output.status.success() {
            None
        } else {
            debug!("MTP CLI: exited with {}: {}", output.status, stderr.trim());
            Some(format!("Command failed ({}): {}", output.status, line))
        };

        Ok(RawResult {
            stdout: Some(stdout),
            stderr: Some(stderr),
            error,
        })
    }

    pub(crate) fn spawn_shell(&self, line: &str) -> Result<StreamingProcess, RunnerError> {
        debug!("MTP CLI: spawning {}", line);

        let mut child = shell_command(line)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError {
                command: line.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(forward_lines(stdout, tx.clone(), StreamEvent::Stdout)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_lines(stderr, tx.clone(), StreamEvent::Stderr)));

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on an explicit kill and when the handle is dropped.
                _ = kill_rx => {
                    debug!("MTP CLI: killing streaming process");
                    if let Err(e) = child.start_kill() {
                        warn!("MTP CLI: failed to kill streaming process: {}", e);
                    }
                    child.wait().await
                }
            };

            // Drain both pipes before reporting the exit, so it is always the last event.
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("MTP CLI: failed to wait for streaming process: {}", e);
                    None
                }
            };
            let _ = tx.send(StreamEvent::Exit { code });
        });

        Ok(StreamingProcess::new(rx, kill_tx))
    }
}

impl CliRunner for SystemRunner {
    async fn run_bounded(&self, command: BoundedCommand) -> Result<RawResult, RunnerError> {
        self.run_shell(&command.to_shell_line()).await
    }

    fn spawn_streaming(&self, command: StreamingCommand) -> Result<StreamingProcess, RunnerError> {
        self.spawn_shell(&command.to_shell_line())
    }
}

/// Sends each line of `reader` as an event until EOF. Invalid UTF-8 is replaced, not fatal.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<StreamEvent>, wrap: fn(String) -> StreamEvent)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("MTP CLI: failed to read process output: {}", e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mtp_cli::SubCommand;
    use std::os::unix::fs::PermissionsExt;

    async fn collect(mut process: StreamingProcess) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = process.next_event().await {
            let is_exit = matches!(event, StreamEvent::Exit { .. });
            events.push(event);
            if is_exit {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_run_shell_captures_output() {
        let result = SystemRunner.run_shell("printf 'hello\\n'; printf 'oops\\n' >&2").await.unwrap();
        assert_eq!(result.stdout.as_deref(), Some("hello\n"));
        assert_eq!(result.stderr.as_deref(), Some("oops\n"));
        assert_eq!(result.error, None);
    }

    #[tokio::test]
    async fn test_run_shell_nonzero_exit_sets_error() {
        let result = SystemRunner.run_shell("sh -c 'exit 3'").await.unwrap();
        let error = result.error.expect("non-zero exit should set error");
        assert!(error.starts_with("Command failed"), "error: {}", error);
    }

    #[tokio::test]
    async fn test_streaming_events_end_with_exit() {
        let process = SystemRunner
            .spawn_shell("sh -c \"printf ':progress /a 1 2\\n:done\\n'; printf 'warn\\n' >&2\"")
            .unwrap();
        let events = collect(process).await;

        let stdout: Vec<&StreamEvent> = events.iter().filter(|e| matches!(e, StreamEvent::Stdout(_))).collect();
        assert_eq!(
            stdout,
            vec![
                &StreamEvent::Stdout(":progress /a 1 2".to_string()),
                &StreamEvent::Stdout(":done".to_string()),
            ]
        );
        assert!(events.contains(&StreamEvent::Stderr("warn".to_string())));
        assert_eq!(events.last(), Some(&StreamEvent::Exit { code: Some(0) }));
    }

    #[tokio::test]
    async fn test_killed_process_still_reports_exit() {
        let mut process = SystemRunner.spawn_shell("sleep 30").unwrap();
        process.kill();
        let events = collect(process).await;
        assert_eq!(events, vec![StreamEvent::Exit { code: None }]);
    }

    #[tokio::test]
    async fn test_paths_reach_the_cli_without_shell_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("fake-cli");
        std::fs::write(&cli, "#!/bin/sh\nfor arg in \"$@\"; do printf '%s\\n' \"$arg\"; done\n").unwrap();
        std::fs::set_permissions(&cli, std::fs::Permissions::from_mode(0o755)).unwrap();
        let marker = dir.path().join("marker");
        let injected = format!("/DCIM/$(touch {})x.jpg", marker.display());

        let command = BoundedCommand::new(cli.to_string_lossy())
            .storage("65537")
            .sub(SubCommand::Rm(injected.clone()))
            .sub(SubCommand::Rm("/Music/$HOME.mp3".to_string()))
            .sub(SubCommand::Rm("/Music/a`id`b.mp3".to_string()));
        let result = SystemRunner.run_bounded(command).await.unwrap();

        assert_eq!(result.error, None, "stderr: {:?}", result.stderr);
        assert_eq!(
            result.stdout.unwrap_or_default(),
            format!(
                "storage 65537\nrm \"{}\"\nrm \"/Music/$HOME.mp3\"\nrm \"/Music/a\\`id\\`b.mp3\"\n",
                injected
            )
        );
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_surfaces_in_result() {
        // `sh` itself starts, so a missing CLI shows up as a failed run, not a spawn error
        let result = SystemRunner
            .run_bounded(BoundedCommand::new("/nonexistent/mtp-cli"))
            .await
            .unwrap();
        assert!(result.error.is_some());
        assert!(!result.stderr.unwrap_or_default().is_empty());
    }
}
