//! Scripted stand-in for the MTP CLI, for tests that must not spawn processes.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::errors::RunnerError;
use crate::mtp_cli::{BoundedCommand, CliRunner, RawResult, StreamEvent, StreamingCommand, StreamingProcess};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Successful run that printed `stdout`.
pub(crate) fn ok(stdout: &str) -> RawResult {
    RawResult {
        stdout: Some(stdout.to_string()),
        stderr: Some(String::new()),
        error: None,
    }
}

/// Failed run that printed `stderr`.
pub(crate) fn failed(stderr: &str) -> RawResult {
    RawResult {
        stdout: Some(String::new()),
        stderr: Some(stderr.to_string()),
        error: Some("Command failed (exit status: 1)".to_string()),
    }
}

#[derive(Default)]
struct FakeState {
    /// First rule whose needle appears in the shell line wins.
    rules: Vec<(String, RawResult)>,
    streams: VecDeque<Vec<StreamEvent>>,
    spawn_fails: bool,
    calls: Vec<String>,
    kills: Vec<oneshot::Receiver<()>>,
}

/// Answers bounded commands from a rule list and streaming commands from a script.
/// Unmatched bounded commands succeed with `ok` on stdout.
#[derive(Default)]
pub(crate) struct FakeRunner {
    state: Mutex<FakeState>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(&self, needle: &str, result: RawResult) -> &Self {
        self.state.lock().unwrap().rules.push((needle.to_string(), result));
        self
    }

    /// Events the next streaming spawn will emit, in order. Should end with `Exit`.
    pub(crate) fn script_stream(&self, events: Vec<StreamEvent>) -> &Self {
        self.state.lock().unwrap().streams.push_back(events);
        self
    }

    pub(crate) fn fail_spawn(&self) -> &Self {
        self.state.lock().unwrap().spawn_fails = true;
        self
    }

    /// Shell lines of every command run so far, bounded and streaming.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn calls_matching(&self, needle: &str) -> usize {
        self.calls().iter().filter(|line| line.contains(needle)).count()
    }

    /// Whether the streaming process spawned `index`-th was asked to die.
    pub(crate) fn was_killed(&self, index: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        state.kills.get_mut(index).is_some_and(|kill| kill.try_recv().is_ok())
    }
}

impl CliRunner for FakeRunner {
    fn run_bounded(&self, command: BoundedCommand) -> impl Future<Output = Result<RawResult, RunnerError>> + Send {
        let line = command.to_shell_line();
        let result = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(line.clone());
            state
                .rules
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, result)| result.clone())
                .unwrap_or_else(|| ok("ok"))
        };
        async move { Ok(result) }
    }

    fn spawn_streaming(&self, command: StreamingCommand) -> Result<StreamingProcess, RunnerError> {
        let line = command.to_shell_line();
        let mut state = self.state.lock().unwrap();
        state.calls.push(line.clone());
        if state.spawn_fails {
            return Err(RunnerError {
                command: line,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        let events = state
            .streams
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::Exit { code: Some(0) }]);
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            let _ = tx.send(event);
        }
        let (kill_tx, kill_rx) = oneshot::channel();
        state.kills.push(kill_rx);
        Ok(StreamingProcess::new(rx, kill_tx))
    }
}
