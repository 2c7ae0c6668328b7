//! Line-fed runs of the interactive prompt through a pseudo-terminal.

use std::io;
use std::process::Command;
use std::time::Duration;

/// How long one read poll waits for more output.
pub const READ_POLL: Duration = Duration::from_millis(20);

/// End-of-input byte that makes the prompt exit.
pub const END_OF_INPUT: &[u8] = b"\x04";

/// Run `cmd` attached to a fresh pseudo-terminal and type `input` into it line by line.
///
/// The startup banner is awaited first (for at most `timeout`), then every line is written
/// and followed by a short poll for the echo and response. Hosts without pseudo-terminals
/// report the target-requested skip sentinel instead.
#[cfg(unix)]
pub fn run_interactive(mut cmd: Command, input: &[u8], timeout: Duration) -> io::Result<Vec<u8>> {
    use std::fs::File;
    use std::io::Write;
    use std::process::Stdio;
    use std::time::Instant;

    use crossrun_core::matcher::split_lines;
    use nix::pty::{Winsize, openpty};
    use nix::sys::termios::Termios;

    use super::child::ChildGuard;

    let pty = openpty(None::<&Winsize>, None::<&Termios>)?;
    cmd.stdin(Stdio::from(pty.slave.try_clone()?))
        .stdout(Stdio::from(pty.slave.try_clone()?))
        .stderr(Stdio::from(pty.slave));
    let mut guard = ChildGuard::spawn(&mut cmd)?;
    drop(cmd);

    let mut session = Session {
        master: File::from(pty.master),
        closed: false,
    };
    let mut output = session.read_available(Some(Instant::now() + timeout))?;
    for line in split_lines(input) {
        if session.closed {
            break;
        }
        if let Err(err) = session.master.write_all(&line) {
            tracing::debug!(error = %err, "prompt stopped accepting input");
            break;
        }
        output.extend(session.read_available(None)?);
    }
    if !session.closed && session.master.write_all(END_OF_INPUT).is_ok() {
        session.read_available(None)?;
    }
    guard.terminate();
    Ok(output)
}

#[cfg(not(unix))]
pub fn run_interactive(_cmd: Command, _input: &[u8], _timeout: Duration) -> io::Result<Vec<u8>> {
    Ok(crossrun_core::sentinel::SKIP.to_vec())
}

#[cfg(unix)]
struct Session {
    master: std::fs::File,
    /// The terminal's other side is gone; nothing more will arrive.
    closed: bool,
}

#[cfg(unix)]
impl Session {
    /// Read whatever arrives until a poll interval passes in silence.
    ///
    /// With `wait_for_first` set, silence before the first byte is tolerated until that
    /// deadline.
    fn read_available(&mut self, wait_for_first: Option<std::time::Instant>) -> io::Result<Vec<u8>> {
        use std::io::Read;
        use std::os::fd::AsFd;
        use std::time::Instant;

        use nix::errno::Errno;
        use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        while !self.closed {
            let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLIN)];
            let ready = match poll(&mut fds, PollTimeout::from(READ_POLL.as_millis() as u16)) {
                Ok(n) => n > 0,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            };
            if ready {
                match self.master.read(&mut buf) {
                    Ok(0) => self.closed = true,
                    Ok(n) => collected.extend_from_slice(&buf[..n]),
                    // Linux reports a hung-up terminal as EIO.
                    Err(err) if err.raw_os_error() == Some(Errno::EIO as i32) => self.closed = true,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err),
                }
                continue;
            }
            let keep_waiting = collected.is_empty() && wait_for_first.is_some_and(|deadline| Instant::now() < deadline);
            if !keep_waiting {
                break;
            }
        }
        Ok(collected)
    }
}
