// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-process reactor: readiness polling and the listening socket's
//! accept/dispatch loop (threaded variant), wired to the idle-timeout heap
//! and the signal funnel.
//!
//! The listening socket's readable event accepts in a loop until
//! `WouldBlock`; a connection table already at capacity is answered with
//! the busy literal and closed immediately rather than left to accumulate
//! backlog. `SIGALRM`, re-armed each time it fires, gates when the idle
//! heap is ticked — once per alarm, after the current batch of readiness
//! events has fully drained, never from inside a per-event handler.

use std::net::Ipv4Addr;
use std::os::unix::io::FromRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;

use crate::config::Config;
use crate::connection::{Connection, WriteOutcome};
use crate::context::ServerContext;
use crate::error::StartupError;
use crate::response::BUSY_BODY;
use crate::signals::{SignalEvent, SignalFunnel};
use crate::timer::IdleHeap;
use crate::workqueue::WorkQueue;

const LISTENER_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
const WAKE_TOKEN: Token = Token(2);
const FIRST_CONN_TOKEN: usize = 3;

/// Runs the threaded, single-process reactor until a `Terminate` signal is
/// observed, then drains the work queue and returns.
pub fn run(config: &Config, ctx: Arc<ServerContext>) -> Result<(), StartupError> {
    let mut poll = Poll::new().map_err(StartupError::Reactor)?;
    let mut listener = bind_listener(config.port)?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
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

    let mut connections: Slab<Arc<Connection>> = Slab::with_capacity(config.max_connections);
    let mut idle = IdleHeap::new();
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs());
    let mut events = Events::with_capacity(1024);

    'reactor: loop {
        poll.poll(&mut events, None).map_err(StartupError::Reactor)?;
        let mut timer_due = false;

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => accept_loop(
                    &listener,
                    poll.registry(),
                    &mut connections,
                    &mut idle,
                    idle_timeout,
                    config.max_connections,
                ),
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

pub(crate) fn dispatch_connection(
    token: Token,
    event: &mio::event::Event,
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    idle: &mut IdleHeap,
    idle_timeout: Duration,
    queue: &WorkQueue,
) {
    let key = token.0 - FIRST_CONN_TOKEN;
    let Some(conn) = connections.get(key).cloned() else {
        return;
    };

    if event.is_writable() {
        match conn.write_step() {
            Ok(WriteOutcome::Pending) => {}
            Ok(WriteOutcome::KeepAlive) => {
                if conn.reregister(registry, Interest::READABLE).is_ok() {
                    idle.adjust(conn.token(), Instant::now() + idle_timeout);
                } else {
                    close_connection(&conn, registry, connections, idle);
                }
            }
            Ok(WriteOutcome::Close) | Err(_) => close_connection(&conn, registry, connections, idle),
        }
        return;
    }

    if event.is_readable() || event.is_read_closed() || event.is_error() {
        match conn.read_step() {
            Ok(_) => {
                idle.adjust(conn.token(), Instant::now() + idle_timeout);
                if queue.submit(Arc::clone(&conn)).is_err() {
                    close_connection(&conn, registry, connections, idle);
                }
            }
            Err(_) => close_connection(&conn, registry, connections, idle),
        }
    }
}

pub(crate) fn accept_loop(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    idle: &mut IdleHeap,
    idle_timeout: Duration,
    max_connections: usize,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if connections.len() >= max_connections {
                    reject_busy(stream);
                    continue;
                }

                let entry = connections.vacant_entry();
                let token = Token(FIRST_CONN_TOKEN + entry.key());
                let conn = Arc::new(Connection::new(stream, token, peer_addr));
                if conn.register(registry).is_ok() {
                    idle.add(token, Instant::now() + idle_timeout);
                    entry.insert(conn);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Writes the fixed busy literal and closes, rejecting a newly accepted
/// connection outright once the live-connection count is already at its
/// configured maximum.
fn reject_busy(mut stream: TcpStream) {
    use std::io::Write;
    let _ = stream.write_all(BUSY_BODY.as_bytes());
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

pub(crate) fn close_connection(
    conn: &Arc<Connection>,
    registry: &Registry,
    connections: &mut Slab<Arc<Connection>>,
    idle: &mut IdleHeap,
) {
    let _ = conn.deregister(registry);
    idle.remove(conn.token());
    let key = conn.token().0 - FIRST_CONN_TOKEN;
    if connections.contains(key) {
        connections.remove(key);
    }
}

/// Builds the listening socket by hand (`socket`/`setsockopt`/`bind`/
/// `listen`) rather than through `std::net::TcpListener::bind`, so
/// `SO_REUSEADDR` and a fixed backlog of 5 carry over exactly instead of
/// falling back to std's un-configurable default backlog.
fn bind_listener(port: u16) -> Result<TcpListener, StartupError> {
    let fd = bind_raw_listener(port)?;
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    TcpListener::from_std(std_listener).map_err(StartupError::Bind)
}

/// The same socket setup as [`bind_listener`], but returning the raw
/// descriptor rather than a wrapped, polled [`TcpListener`]. The
/// multi-process deployment needs this: the listening socket is created
/// once, before `fork()`, so every child inherits the same descriptor and
/// only the child notified by the parent calls `accept()` on it.
pub(crate) fn bind_raw_listener(port: u16) -> Result<std::os::unix::io::RawFd, StartupError> {
    use nix::sys::socket::{
        bind, listen, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
    };
    use std::net::SocketAddrV4;

    let fd = socket(AddressFamily::Inet, SockType::Stream, SockFlag::SOCK_NONBLOCK, None)
        .map_err(|e| StartupError::Bind(nix_to_io(e)))?;
    setsockopt(fd, sockopt::ReuseAddr, &true).map_err(|e| StartupError::Bind(nix_to_io(e)))?;

    let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    bind(fd, &addr).map_err(|e| StartupError::Bind(nix_to_io(e)))?;
    listen(fd, 5).map_err(|e| StartupError::Bind(nix_to_io(e)))?;
    Ok(fd)
}

fn nix_to_io(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
