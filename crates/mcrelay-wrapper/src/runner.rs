//! Game server process runner
//!
//! Spawns the server with piped stdio. Every stdout line and every stderr line
//! (prefixed with [`STDERR_PREFIX`]) lands on one output channel in arrival order
//! per stream; input lines are written to stdin with a trailing newline.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Marker put in front of every line read from the child's stderr
pub const STDERR_PREFIX: &str = "[ERR] ";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process {0} was started without piped stdio")]
    MissingPipe(&'static str),

    #[error("process input is closed")]
    InputClosed,

    #[error("failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// What to run and where
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Working directory; the current directory when unset
    pub work_dir: Option<PathBuf>,
    /// Extra environment for the child only
    pub env: Vec<(String, String)>,
}

impl RunnerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            work_dir: None,
            // Bedrock ships its shared libraries next to the binary
            env: vec![("LD_LIBRARY_PATH".to_string(), ".".to_string())],
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

/// A running child process with line-oriented stdio
pub struct ProcessRunner {
    child: Child,
    input: mpsc::UnboundedSender<String>,
}

impl ProcessRunner {
    /// Spawn the process and return it with the merged output stream.
    ///
    /// The output channel closes once both stdout and stderr reach EOF.
    pub fn start(
        config: &RunnerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>), RunnerError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.work_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            command: config.command.clone(),
            source,
        })?;

        info!(
            command = %config.command,
            pid = ?child.id(),
            "Started server process"
        );

        let stdin = child.stdin.take().ok_or(RunnerError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(RunnerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(RunnerError::MissingPipe("stderr"))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, "", output_tx.clone()));
        tokio::spawn(forward_lines(stderr, STDERR_PREFIX, output_tx));

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(stdin, input_rx));

        Ok((
            Self {
                child,
                input: input_tx,
            },
            output_rx,
        ))
    }

    /// Queue one line for the process's stdin
    pub fn write_input(&self, line: impl Into<String>) -> Result<(), RunnerError> {
        self.input
            .send(line.into())
            .map_err(|_| RunnerError::InputClosed)
    }

    /// Handle other tasks can use to write to stdin
    pub fn input(&self) -> mpsc::UnboundedSender<String> {
        self.input.clone()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus, RunnerError> {
        let status = self.child.wait().await.map_err(RunnerError::Wait)?;
        info!(%status, "Server process exited");
        Ok(status)
    }

    /// Kill the process and reap it
    pub async fn kill(&mut self) -> Result<(), RunnerError> {
        self.child.kill().await.map_err(RunnerError::Wait)
    }
}

async fn forward_lines<R>(reader: R, prefix: &'static str, output: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if output.send(format!("{}{}", prefix, line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading process output: {}", e);
                break;
            }
        }
    }
}

async fn write_lines(mut stdin: ChildStdin, mut input: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = input.recv().await {
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!("Process stdin closed: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!("Process stdin closed: {}", e);
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for output")
    }

    #[tokio::test]
    async fn test_input_echoed_through_stdout() {
        let (mut runner, mut output) = ProcessRunner::start(&RunnerConfig::new("cat")).unwrap();

        runner.write_input("say hello").unwrap();
        assert_eq!(next_line(&mut output).await.as_deref(), Some("say hello"));

        runner.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_stderr_lines_are_prefixed() {
        let config = RunnerConfig::new("sh").with_args(["-c", "echo oops >&2"]);
        let (mut runner, mut output) = ProcessRunner::start(&config).unwrap();

        assert_eq!(next_line(&mut output).await.as_deref(), Some("[ERR] oops"));
        assert!(next_line(&mut output).await.is_none());
        assert!(runner.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_child_sees_library_path_and_work_dir() {
        let config = RunnerConfig::new("sh")
            .with_args(["-c", "echo $LD_LIBRARY_PATH; pwd"])
            .with_work_dir("/");
        let (mut runner, mut output) = ProcessRunner::start(&config).unwrap();

        assert_eq!(next_line(&mut output).await.as_deref(), Some("."));
        assert_eq!(next_line(&mut output).await.as_deref(), Some("/"));
        runner.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = ProcessRunner::start(&RunnerConfig::new("/nonexistent/bedrock_server"))
            .err()
            .unwrap();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}
