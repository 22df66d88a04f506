//! The bridge: child lifecycle, stdin writer and handoff queue drain.
//!
//! ```text
//!   Uninitialized --prepare--> Running --finish--> Closed
//! ```
//!
//! `write` and the flush operations are only valid while running. Every
//! `prepare` must be paired with a `finish`; dropping a running bridge kills
//! the child and aborts the output reader.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

#[cfg(unix)]
use std::os::fd::OwnedFd;

use tokio::io::{AsyncWriteExt, BufWriter};
#[cfg(unix)]
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::BridgeError;
use super::reader::{OutputReader, ReaderSummary};
use super::types::{Batch, CommandSpec, SeparatorSet, TupleSink};
use crate::environment::{resolve_working_dir, Environment};

/// Number of batches the handoff queue holds before the reader blocks.
pub const HANDOFF_QUEUE_CAPACITY: usize = 10;

/// How long `flush_blocking` waits for a batch.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(120);

/// Buffer size of the child's stdin writer.
pub const STDIN_BUFFER_SIZE: usize = 128 * 1024;

/// Upper bound on a single read from the child's output.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Lifecycle state of a [`Bridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Running,
    Closed,
}

/// Resources held while the bridge is running.
struct Running {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    batches: mpsc::Receiver<Batch>,
    reader: Option<JoinHandle<ReaderSummary>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Streaming bridge to a child process.
pub struct Bridge {
    command: Option<CommandSpec>,
    separators: watch::Sender<SeparatorSet>,
    flush_timeout: Duration,
    queue_capacity: usize,
    stdin_buffer_size: usize,
    read_chunk_size: usize,
    cancel: CancellationToken,
    state: BridgeState,
    running: Option<Running>,
}

impl Bridge {
    /// Create an unconfigured bridge with default separators and limits.
    #[must_use]
    pub fn new() -> Self {
        let (separators, _) = watch::channel(SeparatorSet::default());
        Self {
            command: None,
            separators,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            queue_capacity: HANDOFF_QUEUE_CAPACITY,
            stdin_buffer_size: STDIN_BUFFER_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            cancel: CancellationToken::new(),
            state: BridgeState::Uninitialized,
            running: None,
        }
    }

    /// Create a bridge for the given command.
    #[must_use]
    pub fn with_command(command: CommandSpec) -> Self {
        let mut bridge = Self::new();
        bridge.command = Some(command);
        bridge
    }

    /// Set how long `flush_blocking` waits for a batch.
    #[must_use]
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Set the handoff queue capacity (minimum 1).
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the stdin buffer size.
    #[must_use]
    pub fn stdin_buffer_size(mut self, size: usize) -> Self {
        self.stdin_buffer_size = size.max(1);
        self
    }

    /// Set the maximum size of a single output read.
    #[must_use]
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Use an externally owned cancellation token.
    ///
    /// Cancelling it interrupts pending waits in `flush_blocking` and `finish`,
    /// which then return as if no more tuples were available.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Store the command and, optionally, the separator set.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::AlreadyPrepared` once the child has been started.
    pub fn configure(
        &mut self,
        command: CommandSpec,
        separators: Option<SeparatorSet>,
    ) -> Result<(), BridgeError> {
        if self.state != BridgeState::Uninitialized {
            return Err(BridgeError::AlreadyPrepared);
        }
        self.command = Some(command);
        if let Some(separators) = separators {
            self.separators.send_replace(separators);
        }
        Ok(())
    }

    /// Replace the separator set.
    ///
    /// Allowed in any state. A running reader picks the change up on its next
    /// read, so there is no guarantee about the exact character it applies
    /// from; set separators before the first `write`.
    pub fn set_separators(&mut self, separators: SeparatorSet) {
        self.separators.send_replace(separators);
    }

    /// The current separator set.
    #[must_use]
    pub fn separators(&self) -> SeparatorSet {
        self.separators.borrow().clone()
    }

    /// The configured command, if any.
    #[must_use]
    pub fn command(&self) -> Option<&CommandSpec> {
        self.command.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    #[must_use]
    pub fn get_flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    /// A handle to the token that interrupts pending waits.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The child's process ID, while running and not yet reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|r| r.child.id())
    }

    /// Number of batches waiting in the handoff queue.
    #[must_use]
    pub fn queued_batches(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.batches.len())
    }

    /// Spawn the child and start the output reader.
    ///
    /// Must be called from within a Tokio runtime. On Unix the child's stdout
    /// and stderr share one pipe, so records from both streams arrive in the
    /// order the child wrote them. Elsewhere stderr is inherited.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the bridge is not uninitialized, no command
    /// is configured, the environment lookup fails, the spawn fails, or the
    /// pipes cannot be set up.
    pub fn prepare<E: Environment + ?Sized>(&mut self, env: &E) -> Result<(), BridgeError> {
        match self.state {
            BridgeState::Uninitialized => {}
            BridgeState::Running => return Err(BridgeError::AlreadyPrepared),
            BridgeState::Closed => return Err(BridgeError::Closed),
        }
        let command = self.command.as_ref().ok_or(BridgeError::NotConfigured)?;

        let working_dir: Option<PathBuf> = match resolve_working_dir(env)? {
            Some(dir) => Some(dir),
            None => command.get_working_dir().map(PathBuf::from),
        };

        let mut cmd = Command::new(command.program());
        cmd.args(command.get_args())
            .stdin(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        let output = merged_output(&mut cmd)?;
        #[cfg(not(unix))]
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::from_spawn_io(command.program(), e))?;
        // Release our copies of the pipe's write end so EOF follows the child.
        drop(cmd);

        let stdin = child.stdin.take().ok_or(BridgeError::MissingPipe("stdin"))?;
        #[cfg(not(unix))]
        let output = child
            .stdout
            .take()
            .ok_or(BridgeError::MissingPipe("stdout"))?;

        tracing::info!(
            pid = child.id(),
            program = %command.program(),
            cwd = ?working_dir,
            "Spawned subprocess"
        );

        let (tx, batches) = mpsc::channel(self.queue_capacity);
        let reader = OutputReader::new(self.separators.subscribe(), tx, self.read_chunk_size);
        let reader = tokio::spawn(reader.run(output));

        self.running = Some(Running {
            child,
            stdin: Some(BufWriter::with_capacity(self.stdin_buffer_size, stdin)),
            batches,
            reader: Some(reader),
        });
        self.state = BridgeState::Running;
        Ok(())
    }

    /// Write one record, terminated by `\n`, to the child's stdin and flush.
    ///
    /// The record is written verbatim; it must not contain a newline.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Write` if writing or flushing fails.
    pub async fn write(&mut self, line: &str) -> Result<(), BridgeError> {
        let running = self.running_mut()?;
        let stdin = running.stdin.as_mut().ok_or(BridgeError::Closed)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(BridgeError::Write)?;
        stdin.write_all(b"\n").await.map_err(BridgeError::Write)?;
        stdin.flush().await.map_err(BridgeError::Write)?;
        Ok(())
    }

    /// Wait for exactly one batch and append its tuples to `sink`.
    ///
    /// Returns the number of tuples appended. Cancellation returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Timeout` if no batch arrives within the flush
    /// timeout, and `BridgeError::OutputClosed` if the reader has exited and
    /// the queue is empty.
    pub async fn flush_blocking<S: TupleSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<usize, BridgeError> {
        let timeout = self.flush_timeout;
        let cancel = self.cancel.clone();
        let running = self.running_mut()?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Flush interrupted, treating as no more tuples");
                Ok(0)
            }
            received = tokio::time::timeout(timeout, running.batches.recv()) => match received {
                Ok(Some(batch)) => Ok(deliver(batch, sink)),
                Ok(None) => Err(BridgeError::OutputClosed),
                Err(_) => {
                    tracing::warn!(timeout = ?timeout, "Timed out waiting for subprocess");
                    Err(BridgeError::Timeout(timeout))
                }
            },
        }
    }

    /// Append every immediately available batch to `sink` without waiting.
    ///
    /// Returns the number of tuples appended.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the bridge is not running.
    pub fn flush_non_blocking<S: TupleSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<usize, BridgeError> {
        let running = self.running_mut()?;
        Ok(drain_ready(&mut running.batches, sink))
    }

    /// Close stdin, wait for the child and the reader, then drain the queue.
    ///
    /// Batches arriving while waiting are appended to `sink` as they come, so
    /// a full queue cannot stall the child's exit. Calling `finish` on a
    /// closed bridge is a no-op. Returns the number of tuples appended.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::NotPrepared` if the bridge was never prepared.
    pub async fn finish<S: TupleSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<usize, BridgeError> {
        match self.state {
            BridgeState::Uninitialized => return Err(BridgeError::NotPrepared),
            BridgeState::Closed => return Ok(0),
            BridgeState::Running => {}
        }
        let Some(mut running) = self.running.take() else {
            return Err(BridgeError::NotPrepared);
        };
        self.state = BridgeState::Closed;

        if let Some(mut stdin) = running.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "Ignoring error closing subprocess stdin");
            }
        }

        let cancel = self.cancel.clone();
        let mut delivered = 0;

        let status = wait_child(&mut running, &cancel, &mut *sink, &mut delivered).await;
        match status {
            Some(Ok(status)) => tracing::info!(status = %status, "Subprocess exited"),
            Some(Err(e)) => tracing::warn!(error = %e, "Failed to wait for subprocess"),
            None => tracing::debug!("Wait for subprocess interrupted"),
        }

        if let Some(mut reader) = running.reader.take() {
            let joined = loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break None,
                    Some(batch) = running.batches.recv() => {
                        delivered += deliver(batch, &mut *sink);
                    }
                    joined = &mut reader => break Some(joined),
                }
            };
            match joined {
                Some(Ok(summary)) => tracing::debug!(
                    tuples = summary.tuples,
                    batches = summary.batches,
                    "Output reader joined"
                ),
                Some(Err(e)) => tracing::warn!(error = %e, "Output reader task failed"),
                None => {
                    tracing::debug!("Wait for output reader interrupted");
                    reader.abort();
                }
            }
        }

        delivered += drain_ready(&mut running.batches, sink);
        Ok(delivered)
    }

    fn running_mut(&mut self) -> Result<&mut Running, BridgeError> {
        match self.state {
            BridgeState::Uninitialized => Err(BridgeError::NotPrepared),
            BridgeState::Closed => Err(BridgeError::Closed),
            BridgeState::Running => self.running.as_mut().ok_or(BridgeError::NotPrepared),
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("command", &self.command)
            .field("separators", &*self.separators.borrow())
            .field("flush_timeout", &self.flush_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

/// Point the child's stdout and stderr at one pipe and return its read end.
#[cfg(unix)]
fn merged_output(cmd: &mut Command) -> Result<pipe::Receiver, BridgeError> {
    let (reader, writer) = os_pipe::pipe().map_err(BridgeError::Pipe)?;
    let stderr = writer.try_clone().map_err(BridgeError::Pipe)?;
    cmd.stdout(writer).stderr(stderr);
    pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(BridgeError::Pipe)
}

/// Wait for the child to exit while draining batches into `sink`.
///
/// Returns `None` if interrupted.
async fn wait_child<S: TupleSink + ?Sized>(
    running: &mut Running,
    cancel: &CancellationToken,
    sink: &mut S,
    delivered: &mut usize,
) -> Option<std::io::Result<ExitStatus>> {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            Some(batch) = running.batches.recv() => {
                *delivered += deliver(batch, &mut *sink);
            }
            status = running.child.wait() => return Some(status),
        }
    }
}

fn drain_ready<S: TupleSink + ?Sized>(batches: &mut mpsc::Receiver<Batch>, sink: &mut S) -> usize {
    let mut delivered = 0;
    while let Ok(batch) = batches.try_recv() {
        delivered += deliver(batch, &mut *sink);
    }
    delivered
}

fn deliver<S: TupleSink + ?Sized>(batch: Batch, sink: &mut S) -> usize {
    let len = batch.len();
    for tuple in batch {
        sink.add(tuple);
    }
    len
}
