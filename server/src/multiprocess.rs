//! Multi-process deployment: one reactor per OS process, coordinated by a
//! parent that never itself `accept()`s, only tells a round-robin child
//! when to. The listening socket is opened before `fork()` so every child
//! inherits the same descriptor, and each per-child `socketpair` carries
//! nothing but a one-byte "go accept" signal — the connection itself is
//! never passed between processes.

use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, fork, read, write, ForkResult, Pid};
use slab::Slab;

use crate::config::Config;
use crate::connection::Connection;
use crate::context::ServerContext;
use crate::error::StartupError;
use crate::listener::{accept_loop, bind_raw_listener, close_connection, dispatch_connection};
use crate::signals::{SignalEvent, SignalFunnel};
use crate::timer::IdleHeap;
use crate::workqueue::WorkQueue;

/// Written down a child's notify pipe to mean "a connection is waiting,
/// call `accept()`".
const NEW_CONN: u8 = b'1';

struct ChildHandle {
    pid: Pid,
    pipe_fd: RawFd,
    alive: bool,
}

/// Forks `config.workers` children sharing one listening socket, then runs
/// the parent's dispatch loop until every child has exited. Blocking:
/// intended to be the entire body of `main` for
/// `Deployment::MultiProcess`. Each child runs its own complete reactor;
/// only the accept step is centrally dispatched.
pub fn run(config: &Config, ctx: Arc<ServerContext>) -> Result<(), StartupError> {
    let listener_fd = bind_raw_listener(config.port)?;
    let mut children = Vec::with_capacity(config.workers);

    for _ in 0..config.workers {
        let (parent_end, child_end) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK,
        )
        .map_err(StartupError::Fork)?;

        match unsafe { fork() }.map_err(StartupError::Fork)? {
            ForkResult::Parent { child } => {
                let _ = close(child_end);
                children.push(ChildHandle {
                    pid: child,
                    pipe_fd: parent_end,
                    alive: true,
                });
            }
            ForkResult::Child => {
                let _ = close(parent_end);
                for sibling in &children {
                    let _ = close(sibling.pipe_fd);
                }
                let result = run_child(config, Arc::clone(&ctx), listener_fd, child_end);
                if let Err(e) = result {
                    tracing::error!(error = %e, "child reactor exited with an error");
                    std::process::exit(1);
                }
                std::process::exit(0);
            }
        }
    }

    run_parent(config, listener_fd, children)
}

fn run_parent(config: &Config, listener_fd: RawFd, mut children: Vec<ChildHandle>) -> Result<(), StartupError> {
    const LISTENER_TOKEN: Token = Token(0);
    const SIGNAL_TOKEN: Token = Token(1);
    const CHILD_TOKEN_BASE: usize = 2;

    let mut poll = Poll::new().map_err(StartupError::Reactor)?;
    poll.registry()
        .register(&mut SourceFd(&listener_fd), LISTENER_TOKEN, Interest::READABLE)
        .map_err(StartupError::Reactor)?;

    let mut signals = SignalFunnel::install()?;
    signals
        .register(poll.registry(), SIGNAL_TOKEN)
        .map_err(StartupError::Reactor)?;

    for (i, child) in children.iter().enumerate() {
        poll.registry()
            .register(
                &mut SourceFd(&child.pipe_fd),
                Token(CHILD_TOKEN_BASE + i),
                Interest::READABLE,
            )
            .map_err(StartupError::Reactor)?;
    }

    let mut next_child = 0usize;
    let mut shutting_down = false;
    let mut events = Events::with_capacity(128);

    loop {
        if children.iter().all(|c| !c.alive) {
            break;
        }

        poll.poll(&mut events, None).map_err(StartupError::Reactor)?;

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    if shutting_down || children.is_empty() {
                        continue;
                    }
                    let start = next_child;
                    loop {
                        let idx = next_child;
                        next_child = (next_child + 1) % children.len();
                        if children[idx].alive {
                            let _ = write(children[idx].pipe_fd, &[NEW_CONN]);
                            break;
                        }
                        if next_child == start {
                            break;
                        }
                    }
                    let _ = poll.registry().reregister(
                        &mut SourceFd(&listener_fd),
                        LISTENER_TOKEN,
                        Interest::READABLE,
                    );
                }
                SIGNAL_TOKEN => {
                    for sig in signals.drain() {
                        match sig {
                            SignalEvent::Terminate => {
                                shutting_down = true;
                                for child in &children {
                                    if child.alive {
                                        let _ = kill(child.pid, Signal::SIGTERM);
                                    }
                                }
                            }
                            SignalEvent::ChildExited => reap_children(&mut children),
                            SignalEvent::AlarmDue => {}
                        }
                    }
                }
                token => {
                    let idx = token.0 - CHILD_TOKEN_BASE;
                    if idx < children.len() {
                        // EOF on a child's pipe is a secondary signal that
                        // it has exited, alongside SIGCHLD.
                        let mut buf = [0u8; 1];
                        if let Ok(0) = read(children[idx].pipe_fd, &mut buf) {
                            children[idx].alive = false;
                        }
                    }
                }
            }
        }
    }

    let _ = close(listener_fd);
    for child in &children {
        let _ = close(child.pipe_fd);
    }
    Ok(())
}

fn reap_children(children: &mut [ChildHandle]) {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                if let Some(child) = children.iter_mut().find(|c| c.pid == pid) {
                    child.alive = false;
                    let _ = close(child.pipe_fd);
                }
            }
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

fn run_child(
    config: &Config,
    ctx: Arc<ServerContext>,
    listener_fd: RawFd,
    notify_fd: RawFd,
) -> Result<(), StartupError> {
    const NOTIFY_TOKEN: Token = Token(0);
    const SIGNAL_TOKEN: Token = Token(1);
    const WAKE_TOKEN: Token = Token(2);
    const FIRST_CONN_TOKEN: usize = 3;

    let mut poll = Poll::new().map_err(StartupError::Reactor)?;
    poll.registry()
        .register(&mut SourceFd(&notify_fd), NOTIFY_TOKEN, Interest::READABLE)
        .map_err(StartupError::Reactor)?;

    let mut signals = SignalFunnel::install()?;
    signals
        .register(poll.registry(), SIGNAL_TOKEN)
        .map_err(StartupError::Reactor)?;
    nix::unistd::alarm::set(config.timeslot_secs as u32);

    let waker =
        Arc::new(mio::Waker::new(poll.registry(), WAKE_TOKEN).map_err(StartupError::Reactor)?);
    let (closed_tx, closed_rx) = crossbeam_channel::unbounded();

    let registry_for_workers = poll.registry().try_clone().map_err(StartupError::Reactor)?;
    let queue = WorkQueue::start(
        config.workers,
        config.queue_capacity,
        Arc::clone(&ctx),
        &registry_for_workers,
        closed_tx,
        Arc::clone(&waker),
    )
    .map_err(StartupError::Reactor)?;

    // Safety: this process's fd table still holds `listener_fd` from
    // before `fork()`; wrapping it here does not duplicate or invalidate
    // the parent's or siblings' copies.
    let listener = unsafe { TcpListener::from_std(std::net::TcpListener::from_raw_fd(listener_fd)) };

    let mut connections: Slab<Arc<Connection>> = Slab::with_capacity(config.max_connections);
    let mut idle = IdleHeap::new();
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs());
    let mut events = Events::with_capacity(1024);

    'reactor: loop {
        poll.poll(&mut events, None).map_err(StartupError::Reactor)?;
        let mut timer_due = false;

        for event in events.iter() {
            match event.token() {
                NOTIFY_TOKEN => {
                    let mut buf = [0u8; 64];
                    let mut notified = false;
                    loop {
                        match read(notify_fd, &mut buf) {
                            Ok(0) => break 'reactor,
                            Ok(n) => {
                                notified = true;
                                if n < buf.len() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    if notified {
                        accept_loop(
                            &listener,
                            poll.registry(),
                            &mut connections,
                            &mut idle,
                            idle_timeout,
                            config.max_connections,
                        );
                    }
                }
                SIGNAL_TOKEN => {
                    for sig in signals.drain() {
                        match sig {
                            SignalEvent::Terminate => break 'reactor,
                            SignalEvent::AlarmDue => timer_due = true,
                            SignalEvent::ChildExited => {}
                        }
                    }
                }
                WAKE_TOKEN => {
                    while let Ok(token) = closed_rx.try_recv() {
                        idle.remove(token);
                        let key = token.0 - FIRST_CONN_TOKEN;
                        if connections.contains(key) {
                            connections.remove(key);
                        }
                    }
                }
                token => dispatch_connection(
                    token,
                    event,
                    poll.registry(),
                    &mut connections,
                    &mut idle,
                    idle_timeout,
                    &queue,
                ),
            }
        }

        if timer_due {
            for token in idle.tick(Instant::now()) {
                let key = token.0 - FIRST_CONN_TOKEN;
                if let Some(conn) = connections.get(key).cloned() {
                    if conn.request_timeout_close() {
                        close_connection(&conn, poll.registry(), &mut connections, &mut idle);
                    }
                }
            }
            nix::unistd::alarm::set(config.timeslot_secs as u32);
        }
    }

    queue.shutdown();
    Ok(())
}
