//! Self-pipe signal funnel.
//!
//! A raw, async-signal-safe handler writes one byte (the signal number)
//! into a `socketpair`, whose read half is registered with the reactor
//! like any other descriptor. All dispatch happens on the reactor thread
//! once the byte is read back out — never inside the handler itself.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};
use nix::unistd;

use crate::error::StartupError;

static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn relay(signo: nix::libc::c_int) {
    let fd = SIGNAL_WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = [signo as u8];
        unsafe {
            nix::libc::write(fd, byte.as_ptr().cast(), 1);
        }
    }
}

/// What the reactor's dispatch loop does once it reads a relayed signal
/// byte off the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// `SIGCHLD`: a worker process exited (multi-process deployment only).
    ChildExited,
    /// `SIGTERM`/`SIGINT`: graceful shutdown requested.
    Terminate,
    /// `SIGALRM`: the idle-timeout alarm fired; the reactor ticks the heap
    /// once the current event batch has drained.
    AlarmDue,
}

/// Owns both ends of the self-pipe socketpair. The write end is handed to
/// the signal handler through a static; the read end is registered with the
/// reactor and drained from ordinary event-loop code.
#[derive(Debug)]
pub struct SignalFunnel {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl SignalFunnel {
    /// Installs handlers for `SIGCHLD`, `SIGTERM`, `SIGINT`, and `SIGALRM`,
    /// and ignores `SIGPIPE` so a peer resetting a connection mid-write
    /// cannot kill the process.
    pub fn install() -> Result<Self, StartupError> {
        let (read_fd, write_fd) = socket::socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK,
        )
        .map_err(StartupError::Signals)?;

        SIGNAL_WRITE_FD.store(write_fd, Ordering::Relaxed);

        let relay_action = SigAction::new(SigHandler::Handler(relay), SaFlags::SA_RESTART, SigSet::empty());
        let ignore_action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());

        unsafe {
            signal::sigaction(Signal::SIGCHLD, &relay_action).map_err(StartupError::Signals)?;
            signal::sigaction(Signal::SIGTERM, &relay_action).map_err(StartupError::Signals)?;
            signal::sigaction(Signal::SIGINT, &relay_action).map_err(StartupError::Signals)?;
            signal::sigaction(Signal::SIGALRM, &relay_action).map_err(StartupError::Signals)?;
            signal::sigaction(Signal::SIGPIPE, &ignore_action).map_err(StartupError::Signals)?;
        }

        Ok(Self { read_fd, write_fd })
    }

    /// Registers the pipe's read half with the reactor under `token`.
    pub fn register(&mut self, registry: &Registry, token: Token) -> std::io::Result<()> {
        SourceFd(&self.read_fd).register(registry, token, Interest::READABLE)
    }

    /// Drains every byte currently buffered in the pipe, translating each
    /// signal number into a [`SignalEvent`]. Call once per reactor wakeup
    /// on the funnel's token.
    pub fn drain(&mut self) -> Vec<SignalEvent> {
        let mut events = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(self.read_fd, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if let Some(event) = classify(byte as nix::libc::c_int) {
                            events.push(event);
                        }
                    }
                    if n < buf.len() {
                        break;
                    }
                }
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

fn classify(signo: nix::libc::c_int) -> Option<SignalEvent> {
    if signo == Signal::SIGCHLD as nix::libc::c_int {
        Some(SignalEvent::ChildExited)
    } else if signo == Signal::SIGTERM as nix::libc::c_int || signo == Signal::SIGINT as nix::libc::c_int {
        Some(SignalEvent::Terminate)
    } else if signo == Signal::SIGALRM as nix::libc::c_int {
        Some(SignalEvent::AlarmDue)
    } else {
        None
    }
}

impl Drop for SignalFunnel {
    fn drop(&mut self) {
        let _ = unistd::close(self.read_fd);
        let _ = unistd::close(self.write_fd);
    }
}
