//! Scoped child processes with a wall-clock budget.
//!
//! [`ChildGuard`] owns a spawned process and guarantees it is terminated and reaped when the
//! guard goes out of scope, whatever happened in between. On Unix the child leads its own
//! process group so that anything it spawned goes down with it; "no such process" counts as a
//! successful termination. Once the leader has been reaped its group id may be recycled, so
//! the group is only signalled again while something still holds the output pipe.

#[cfg(unix)]
use std::fs::File;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Interval between exit checks while a child runs.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output keeps draining after the group was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// A spawned process that is killed and reaped on drop.
#[derive(Debug)]
pub struct ChildGuard {
    child: Child,
    status: Option<ExitStatus>,
}

impl ChildGuard {
    /// Spawn `cmd` in a fresh process group.
    pub fn spawn(cmd: &mut Command) -> io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn()?;
        Ok(ChildGuard { child, status: None })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Wait for exit until `deadline`; `None` means the deadline passed first.
    pub fn wait_until(&mut self, deadline: Instant) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kill the child's process group and reap the child.
    ///
    /// Does nothing once the child has been reaped.
    pub fn terminate(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.kill_stragglers();
        match self.child.wait() {
            Ok(status) => self.status = Some(status),
            Err(err) => tracing::warn!(pid = self.child.id(), error = %err, "failed to reap child process"),
        }
    }

    /// Kill the child's process group whether or not the leader is still running.
    ///
    /// After the leader was reaped this is only sound while other members of the group are
    /// known to be alive.
    pub fn kill_stragglers(&mut self) {
        if let Err(err) = kill_group(&mut self.child) {
            tracing::warn!(pid = self.child.id(), error = %err, "failed to kill child process");
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        return kill_single(child);
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // EPERM: only a zombie leader is left (macOS reports it this way).
        Ok(()) | Err(Errno::ESRCH) | Err(Errno::EPERM) => Ok(()),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> io::Result<()> {
    kill_single(child)
}

fn kill_single(child: &mut Child) -> io::Result<()> {
    match child.kill() {
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

// ============================================================================
// Captured runs
// ============================================================================

/// How a captured run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    Status(ExitStatus),
    TimedOut,
}

/// Merged stdout/stderr of a finished process.
#[derive(Debug, Clone)]
pub struct Captured {
    pub exit: Exit,
    pub output: Vec<u8>,
}

impl Captured {
    pub fn success(&self) -> bool {
        matches!(&self.exit, Exit::Status(status) if status.success())
    }

    pub fn timed_out(&self) -> bool {
        self.exit == Exit::TimedOut
    }
}

/// Run `cmd` to completion with stdout and stderr merged into one stream, killing it once
/// `timeout` elapses.
///
/// Returns an error only when the process cannot be started.
///
/// A leader that exits while processes it started keep the output open is treated as timed
/// out once the deadline passes.
pub fn run_captured(cmd: Command, timeout: Duration) -> io::Result<Captured> {
    let deadline = Instant::now() + timeout;
    let (mut guard, mut reader) = spawn_merged(cmd)?;
    let mut exit = match guard.wait_until(deadline) {
        Ok(Some(status)) => Exit::Status(status),
        Ok(None) => Exit::TimedOut,
        Err(err) => {
            tracing::warn!(pid = guard.id(), error = %err, "lost track of child process");
            Exit::TimedOut
        }
    };
    guard.terminate();

    let drained = if exit == Exit::TimedOut {
        reader.wait_until(Instant::now() + DRAIN_GRACE)
    } else if reader.wait_until(deadline) {
        true
    } else {
        // The pipe is still open, so some member of the group is still alive.
        tracing::debug!(pid = guard.id(), "output still open after exit");
        guard.kill_stragglers();
        exit = Exit::TimedOut;
        reader.wait_until(Instant::now() + DRAIN_GRACE)
    };
    if !drained {
        tracing::warn!(pid = guard.id(), "child output still open; keeping what was read");
    }
    Ok(Captured {
        exit,
        output: reader.take(),
    })
}

/// Background reader(s) collecting a child's output into one buffer.
struct OutputReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
    pending: usize,
}

impl OutputReader {
    fn start(sources: Vec<Box<dyn Read + Send>>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let pending = sources.len();
        for mut source in sources {
            let buffer = Arc::clone(&buffer);
            let tx = tx.clone();
            thread::spawn(move || {
                let mut chunk = [0u8; 4096];
                loop {
                    match source.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                        Err(err) => {
                            tracing::debug!(error = %err, "child output stream ended with an error");
                            break;
                        }
                    }
                }
                let _ = tx.send(());
            });
        }
        OutputReader { buffer, done, pending }
    }

    /// Wait for every stream to reach end of file; `false` when `deadline` passed first.
    fn wait_until(&mut self, deadline: Instant) -> bool {
        while self.pending > 0 {
            match self.done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(()) => self.pending -= 1,
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("output reader thread panicked");
                    self.pending = 0;
                }
            }
        }
        true
    }

    fn take(self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock())
    }
}

#[cfg(unix)]
fn spawn_merged(mut cmd: Command) -> io::Result<(ChildGuard, OutputReader)> {
    let (read_end, write_end) = nix::unistd::pipe()?;
    let stderr_end = write_end.try_clone()?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(stderr_end));
    let guard = ChildGuard::spawn(&mut cmd)?;
    // The command holds the parent's copies of the write end; the reader only sees EOF once
    // they are closed.
    drop(cmd);
    let reader = OutputReader::start(vec![Box::new(File::from(read_end))]);
    Ok((guard, reader))
}

#[cfg(not(unix))]
fn spawn_merged(mut cmd: Command) -> io::Result<(ChildGuard, OutputReader)> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut guard = ChildGuard::spawn(&mut cmd)?;
    let mut sources: Vec<Box<dyn Read + Send>> = Vec::new();
    if let Some(stdout) = guard.child.stdout.take() {
        sources.push(Box::new(stdout));
    }
    if let Some(stderr) = guard.child.stderr.take() {
        sources.push(Box::new(stderr));
    }
    Ok((guard, OutputReader::start(sources)))
}
