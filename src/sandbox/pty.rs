use crate::logger;
use anyhow::{Context, Result};
use log::warn;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::pty::{Winsize, openpty};
use nix::sys::termios::{SetArg, Termios, cfmakeraw, tcgetattr, tcsetattr};
use nix::unistd::{dup2, read, setsid, write};
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

const RELAY_BUF_SIZE: usize = 4096;
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

/// A pseudo-terminal pair bridging the caller's terminal and the sandboxed
/// process. Created before the namespace transitions; after the fork each
/// side keeps exactly one end (`into_parent` / `into_child`) and the other
/// descriptor is closed by the conversion.
pub struct PtySession {
    master: OwnedFd,
    slave: OwnedFd,
    saved_termios: Option<Termios>,
    stdin_is_tty: bool,
}

impl PtySession {
    /**
     * Allocate the pair. When the caller sits on a real terminal its
     * attributes and window size are copied onto the slave so the program
     * inside sees a terminal matching the outer one; otherwise the slave
     * starts with a synthetic 80x24 and default attributes.
     */
    pub fn open() -> Result<Self> {
        let stdin_is_tty =
            unsafe { libc::isatty(libc::STDIN_FILENO) == 1 };

        let saved_termios = if stdin_is_tty {
            match tcgetattr(io::stdin()) {
                Ok(attrs) => Some(attrs),
                Err(e) => {
                    warn!("failed to read terminal attributes: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let winsize = window_size(stdin_is_tty);
        let pty = openpty(Some(&winsize), saved_termios.as_ref())
            .context("openpty failed")?;

        Ok(Self {
            master: pty.master,
            slave: pty.slave,
            saved_termios,
            stdin_is_tty,
        })
    }

    /// Supervisor half: keeps the master, closes the slave.
    pub fn into_parent(self) -> ParentPty {
        ParentPty {
            master: self.master,
            saved_termios: self.saved_termios,
            stdin_is_tty: self.stdin_is_tty,
        }
    }

    /// Sandbox-init half: keeps the slave, closes the master.
    pub fn into_child(self) -> ChildPty {
        ChildPty { slave: self.slave }
    }
}

pub struct ParentPty {
    master: OwnedFd,
    saved_termios: Option<Termios>,
    stdin_is_tty: bool,
}

impl ParentPty {
    /**
     * Switch the caller's own terminal into raw mode so keystrokes and
     * control characters reach the sandbox unmodified. No-op without a
     * terminal. From here until `restore`, log output needs CRLF line
     * endings.
     */
    pub fn set_raw(&self) {
        if !self.stdin_is_tty {
            return;
        }
        logger::set_crlf_output(true);
        let result = tcgetattr(io::stdin()).and_then(|mut termios| {
            cfmakeraw(&mut termios);
            tcsetattr(io::stdin(), SetArg::TCSANOW, &termios)
        });
        if let Err(e) = result {
            warn!("failed to switch terminal to raw mode: {}", e);
        }
    }

    /**
     * Move bytes between the caller's stdin and the PTY master until either
     * side reports end-of-file or an error. Single-threaded and blocking:
     * the supervisor has nothing else to do while the sandbox runs. Only an
     * interrupted wait is retried; every other failure ends the relay and
     * hands control to the wait for the child.
     */
    pub fn relay(&self) {
        let mut buf = [0u8; RELAY_BUF_SIZE];
        let stdin = io::stdin();
        let stdout = io::stdout();

        loop {
            let mut fds = [
                PollFd::new(stdin.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.master.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("relay wait failed: {}", e);
                    break;
                }
            }
            let stdin_ready = readable(&fds[0]);
            let master_ready = readable(&fds[1]);
            if !stdin_ready && !master_ready {
                // Nothing readable yet something woke us (e.g. POLLNVAL).
                break;
            }

            /* caller stdin -> pty master */
            if stdin_ready {
                match read(libc::STDIN_FILENO, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if write_all(&self.master, &buf[..n]).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            /* pty master -> caller stdout */
            if master_ready {
                match read(self.master.as_raw_fd(), &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if write_all(&stdout, &buf[..n]).is_err() {
                            break;
                        }
                    }
                    // EIO is how the master reports that the slave side is
                    // gone, i.e. the sandboxed process exited.
                    Err(Errno::EIO) => break,
                    Err(e) => {
                        warn!("failed to read from pty master: {}", e);
                        break;
                    }
                }
            }
        }
    }

    /**
     * Close the master and put the caller's terminal back the way we found
     * it. Runs after the child has been waited on; failures are warnings,
     * control must return to the caller's shell regardless.
     */
    pub fn restore(self) {
        let ParentPty {
            master,
            saved_termios,
            stdin_is_tty,
        } = self;
        drop(master);
        if stdin_is_tty {
            if let Some(termios) = &saved_termios {
                if let Err(e) =
                    tcsetattr(io::stdin(), SetArg::TCSANOW, termios)
                {
                    warn!("failed to restore terminal attributes: {}", e);
                }
            }
        }
        logger::set_crlf_output(false);
    }
}

pub struct ChildPty {
    slave: OwnedFd,
}

impl ChildPty {
    /**
     * Wire the slave up as the sandboxed process's terminal: become a
     * session leader, duplicate the slave onto stdin/stdout/stderr, close
     * the original descriptor if it is not one of those, and adopt the
     * slave as the controlling terminal. Failing to duplicate the standard
     * descriptors leaves the child with no usable stdio, which is fatal;
     * session and controlling-terminal problems degrade job control only.
     */
    pub fn attach(self) -> Result<()> {
        if let Err(e) = setsid() {
            warn!("setsid failed: {}", e);
        }

        let slave_fd = self.slave.as_raw_fd();
        dup2(slave_fd, libc::STDIN_FILENO).context("dup2 stdin failed")?;
        dup2(slave_fd, libc::STDOUT_FILENO).context("dup2 stdout failed")?;
        dup2(slave_fd, libc::STDERR_FILENO).context("dup2 stderr failed")?;

        if slave_fd > libc::STDERR_FILENO {
            drop(self.slave);
        } else {
            // Already one of the standard descriptors; dropping would close
            // the stream we just installed.
            std::mem::forget(self.slave);
        }

        let rc = unsafe {
            libc::ioctl(
                libc::STDIN_FILENO,
                libc::TIOCSCTTY as libc::c_ulong,
                0,
            )
        };
        if rc != 0 {
            warn!("TIOCSCTTY failed: {}", Errno::last());
        }

        Ok(())
    }
}

fn window_size(stdin_is_tty: bool) -> Winsize {
    if stdin_is_tty {
        let mut winsize: Winsize = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::ioctl(
                libc::STDIN_FILENO,
                libc::TIOCGWINSZ as libc::c_ulong,
                &mut winsize,
            )
        };
        if rc == 0 {
            return winsize;
        }
        warn!("failed to query terminal window size: {}", Errno::last());
    }
    Winsize {
        ws_row: DEFAULT_ROWS,
        ws_col: DEFAULT_COLS,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

fn readable(fd: &PollFd) -> bool {
    fd.revents()
        .map(|revents| {
            revents.intersects(
                PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR,
            )
        })
        .unwrap_or(false)
}

/* The relay forwards byte-for-byte, so a short write has to be finished
 * before the next poll; anything unwritable ends the relay instead. */
fn write_all<F: AsFd>(fd: &F, mut buf: &[u8]) -> nix::Result<()> {
    while !buf.is_empty() {
        match write(fd, buf) {
            Ok(0) => return Err(Errno::EIO),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
