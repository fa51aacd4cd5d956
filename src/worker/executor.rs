use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::error::AttemptError;
use crate::sink::SinkRef;

/// How long pipe drains may run on after the process group has been killed.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on a single sink write, and on the bytes buffered per stream.
pub const MAX_WRITE: usize = 64 * 1024;

/// One attempt of a job, already rendered.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    /// Job name, used for logging only.
    pub job: &'a str,
    pub command: &'a str,
    /// Written to the process and then closed. Empty means no stdin at all.
    pub stdin: &'a str,
    pub timeout: Duration,
    /// Per-attempt token derived from the run's root token.
    pub token: &'a CancellationToken,
}

/// Runs rendered commands through the configured shell.
///
/// Each call to [`execute`](Self::execute) owns exactly one OS process:
/// - stdout and stderr are drained concurrently into the job's sink
/// - stdin is written in full and closed so the process sees EOF
/// - the attempt is bounded by its timeout and by the run's cancellation
/// - on unix the process leads its own group, so a forced kill also takes
///   down anything the shell started
#[derive(Debug, Clone)]
pub struct JobExecutor {
    shell: String,
    shell_args: Vec<String>,
    working_directory: Option<PathBuf>,
    drain_grace: Duration,
}

enum Stop {
    Exited(io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

impl JobExecutor {
    pub fn new(shell: impl Into<String>, shell_args: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            shell_args,
            working_directory: None,
            drain_grace: DRAIN_GRACE,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        let mut executor = Self::new(config.shell.clone(), config.shell_args.clone());
        executor.working_directory = config.working_directory.clone();
        executor
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    fn command(&self, rendered: &str, with_stdin: bool) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.args(&self.shell_args)
            .arg(rendered)
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run one attempt to completion, streaming its output into `sink`.
    ///
    /// Returns once the process has been reaped and its pipes are closed
    /// (or abandoned after the drain grace period).
    pub async fn execute(&self, attempt: Attempt<'_>, sink: SinkRef) -> Result<(), AttemptError> {
        tracing::debug!(
            job = attempt.job,
            shell = %self.shell,
            args = ?self.shell_args,
            command = attempt.command,
            "Spawning process"
        );

        let deadline = Instant::now() + attempt.timeout;
        let mut child = self
            .command(attempt.command, !attempt.stdin.is_empty())
            .spawn()
            .map_err(AttemptError::Spawn)?;
        let pid = child.id();
        tracing::info!(job = attempt.job, pid = ?pid, "Process started");

        let mut streams = Streams::new(attempt.job);
        if let Some(out) = child.stdout.take() {
            streams.push(tokio::spawn(drain(out, sink.clone())));
        }
        if let Some(err) = child.stderr.take() {
            streams.push(tokio::spawn(drain(err, sink.clone())));
        }
        if let Some(pipe) = child.stdin.take() {
            streams.push(tokio::spawn(feed(pipe, attempt.stdin.as_bytes().to_vec())));
        }

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            _ = attempt.token.cancelled() => Stop::Cancelled,
            _ = sleep_until(deadline) => Stop::TimedOut,
        };

        let result = match stop {
            Stop::Exited(status) => {
                // Background children of the shell can keep the pipes open past its exit.
                let drained = tokio::select! {
                    _ = streams.join() => true,
                    _ = attempt.token.cancelled() => false,
                    _ = sleep_until(deadline) => false,
                };
                if !drained {
                    tracing::warn!(job = attempt.job, pid = ?pid, "Output still open after exit, killing process group");
                    kill_group(pid);
                    streams.finish(self.drain_grace).await;
                }
                classify(attempt.job, pid, status)
            }
            Stop::Cancelled => {
                tracing::info!(job = attempt.job, pid = ?pid, "Run cancelled, killing process");
                kill(&mut child, pid).await;
                streams.finish(self.drain_grace).await;
                Err(AttemptError::Cancelled)
            }
            Stop::TimedOut => {
                tracing::warn!(
                    job = attempt.job,
                    pid = ?pid,
                    timeout = ?attempt.timeout,
                    "Process timed out, killing"
                );
                kill(&mut child, pid).await;
                streams.finish(self.drain_grace).await;
                Err(AttemptError::Timeout(attempt.timeout))
            }
        };

        if let Err(e) = sink.flush() {
            tracing::warn!(job = attempt.job, error = %e, "Failed to flush output sink");
        }
        result
    }
}

fn classify(
    job: &str,
    pid: Option<u32>,
    status: io::Result<ExitStatus>,
) -> Result<(), AttemptError> {
    let status = status.map_err(AttemptError::Wait)?;
    match status.code() {
        Some(0) => {
            tracing::info!(job, pid = ?pid, "Process exited cleanly");
            Ok(())
        }
        Some(code) => Err(AttemptError::Exit(code)),
        None => Err(AttemptError::Signaled(signal_of(&status))),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> i32 {
    -1
}

async fn kill(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    // Covers platforms without process groups and a failed killpg.
    if let Err(e) = child.start_kill() {
        tracing::debug!(pid = ?pid, error = %e, "start_kill failed");
    }
    match child.wait().await {
        Ok(status) => tracing::debug!(pid = ?pid, ?status, "Process reaped"),
        Err(e) => tracing::error!(pid = ?pid, error = %e, "Failed to reap killed process"),
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        tracing::debug!(pgid, error = %e, "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Copy a pipe into the sink until EOF, one line per write where possible.
///
/// A line longer than [`MAX_WRITE`] is split so memory stays bounded no
/// matter what the process prints. A failing sink does not stop the drain;
/// the pipe must keep flowing or the process would block on a full buffer.
async fn drain<R>(pipe: R, sink: SinkRef) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut chunk = Vec::with_capacity(4096);
    let mut sink_error = None;
    let mut emit = |chunk: &mut Vec<u8>| {
        if sink_error.is_none() {
            if let Err(e) = sink.write(chunk) {
                sink_error = Some(e);
            }
        }
        chunk.clear();
    };
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let room = MAX_WRITE - chunk.len();
        let take = match available.iter().position(|&b| b == b'\n') {
            Some(i) if i < room => i + 1,
            _ => available.len().min(room),
        };
        chunk.extend_from_slice(&available[..take]);
        reader.consume(take);
        if chunk.len() >= MAX_WRITE || chunk.ends_with(b"\n") {
            emit(&mut chunk);
        }
    }
    if !chunk.is_empty() {
        emit(&mut chunk);
    }
    sink_error.map_or(Ok(()), Err)
}

async fn feed(mut pipe: ChildStdin, data: Vec<u8>) -> io::Result<()> {
    match pipe.write_all(&data).await {
        // The process is free to exit without reading its input.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
        Ok(()) => pipe.shutdown().await,
    }
}

/// Pipe tasks of one attempt. Anything still running on drop is aborted.
struct Streams<'a> {
    job: &'a str,
    handles: Vec<JoinHandle<io::Result<()>>>,
}

impl<'a> Streams<'a> {
    fn new(job: &'a str) -> Self {
        Self {
            job,
            handles: Vec::with_capacity(3),
        }
    }

    fn push(&mut self, handle: JoinHandle<io::Result<()>>) {
        self.handles.push(handle);
    }

    /// Await every task. Safe to cancel and call again.
    async fn join(&mut self) {
        while let Some(handle) = self.handles.last_mut() {
            let res = handle.await;
            self.handles.pop();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(job = self.job, error = %e, "Output stream failed"),
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(job = self.job, error = %e, "Output stream task panicked"),
            }
        }
    }

    async fn finish(&mut self, grace: Duration) {
        if timeout(grace, self.join()).await.is_err() {
            tracing::warn!(job = self.job, "Output streams still open after kill, abandoning");
            self.abort();
        }
    }

    fn abort(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Streams<'_> {
    fn drop(&mut self) {
        self.abort();
    }
}
