//! Connection state and lifecycle, tying the parser, router/resolver, and
//! response assembler together into the single `process()` entry point a
//! worker invokes, plus the `read`/`write` steps the reactor drives
//! directly.
//!
//! Mutable state lives behind a `Mutex` per field. Even though the
//! ONE_SHOT discipline guarantees only one thread ever touches a given
//! connection at a time, Rust still needs a `Sync` bound to share the
//! `Arc<Connection>` between the reactor and a worker thread.

use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use mio::net::TcpStream;
use mio::Token;
use parser::request::{ParseOutcome, RequestParser};
use parser::status::Status;

use crate::context::ServerContext;
use crate::error::ConnError;
use crate::response::{self, Body};
use crate::router::BadRequestPolicy;

/// Fixed read buffer size.
pub const READ_BUFFER_CAPACITY: usize = 2048;
/// Fixed write buffer size.
pub const WRITE_BUFFER_CAPACITY: usize = 1024;

/// Lifecycle states. `Idle` and `Parsing` are both "interested in READ"
/// from the reactor's point of view; they are kept distinct so a timer
/// firing mid-parse can tell a connection is busy (see
/// [`Connection::is_busy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Registered for READ, no worker holds it.
    Idle,
    /// Checked out to a worker for parsing and response assembly.
    Parsing,
    /// Registered for WRITE, draining a gathered write.
    Writing,
    /// Torn down; must not be touched again.
    Closed,
}

/// What the reactor should do with a connection's descriptor after a read
/// event or a completed `process()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Re-arm for READ; no complete request yet.
    RearmRead,
    /// Re-arm for WRITE; a response is ready to drain.
    RearmWrite,
    /// Tear the connection down.
    Close,
}

/// Outcome of a single gathered-write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Would block; remain `Writing`, re-arm for WRITE.
    Pending,
    /// Response fully sent, keep-alive requested; connection reset to
    /// `Idle` for the next request.
    KeepAlive,
    /// Response fully sent, keep-alive not requested.
    Close,
}

#[derive(Debug)]
struct PendingResponse {
    header: Vec<u8>,
    mapped: Option<memmap2::Mmap>,
    sent: usize,
    total: usize,
    keep_alive: bool,
}

#[derive(Debug)]
struct Inner {
    state: ConnState,
    read_buf: Box<[u8; READ_BUFFER_CAPACITY]>,
    filled: usize,
    scanned: usize,
    line_start: usize,
    parser: RequestParser,
    response: Option<PendingResponse>,
}

impl Inner {
    fn fresh() -> Self {
        Self {
            state: ConnState::Idle,
            read_buf: Box::new([0u8; READ_BUFFER_CAPACITY]),
            filled: 0,
            scanned: 0,
            line_start: 0,
            parser: RequestParser::new(),
            response: None,
        }
    }
}

/// A single accepted connection: its socket, read/write state, and parser
/// progress. Identified by the `Token` it is registered under.
#[derive(Debug)]
pub struct Connection {
    token: Token,
    peer_addr: SocketAddr,
    stream: Mutex<TcpStream>,
    inner: Mutex<Inner>,
    /// Set while a worker holds this connection in `process()`, consulted
    /// by the idle-timer tick so a timer firing mid-process does not race
    /// a worker's own teardown.
    busy: AtomicBool,
    /// Set by the reactor's timer tick when it finds [`Connection::busy`]
    /// already true; the worker checks this on return from `process()` and
    /// closes the connection instead of re-arming it.
    close_pending: AtomicBool,
}

impl Connection {
    /// Wraps a freshly accepted socket.
    pub fn new(stream: TcpStream, token: Token, peer_addr: SocketAddr) -> Self {
        Self {
            token,
            peer_addr,
            stream: Mutex::new(stream),
            inner: Mutex::new(Inner::fresh()),
            busy: AtomicBool::new(false),
            close_pending: AtomicBool::new(false),
        }
    }

    /// The token this connection is registered under.
    pub fn token(&self) -> Token {
        self.token
    }

    /// The peer's socket address, as captured at `accept` time.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Registers this connection's socket with `registry`, `EDGE_TRIGGERED
    /// + ONE_SHOT`. mio has no separate "PEER_CLOSED" interest flag; a peer
    /// close surfaces as a zero-length read or `Event::is_read_closed()`,
    /// which the reactor treats identically to an error event.
    pub fn register(&self, registry: &mio::Registry) -> io::Result<()> {
        let mut stream = self.stream.lock().expect("stream lock poisoned");
        registry.register(&mut *stream, self.token, mio::Interest::READABLE)
    }

    /// Re-arms the descriptor for the given interest (mio is always
    /// effectively edge-triggered and one-shot per registration already
    /// implied by `reregister`).
    pub fn reregister(&self, registry: &mio::Registry, interest: mio::Interest) -> io::Result<()> {
        let mut stream = self.stream.lock().expect("stream lock poisoned");
        registry.reregister(&mut *stream, self.token, interest)
    }

    /// Deregisters the descriptor; part of teardown.
    pub fn deregister(&self, registry: &mio::Registry) -> io::Result<()> {
        let mut stream = self.stream.lock().expect("stream lock poisoned");
        registry.deregister(&mut *stream)
    }

    /// `true` while a worker is inside `process()` for this connection.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Marks this connection busy before handing it to a worker. Returns
    /// `false` (and leaves the flag untouched) if it was already busy,
    /// which would indicate a ONE_SHOT violation upstream.
    pub fn mark_busy(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clears the busy flag and reports whether a timer tick requested
    /// closure while this connection was checked out.
    pub fn clear_busy(&self) -> bool {
        self.busy.store(false, Ordering::Release);
        self.close_pending.swap(false, Ordering::AcqRel)
    }

    /// Called by the idle-timer tick when this connection's deadline has
    /// passed. Returns `true` if the caller should close the connection
    /// immediately; if the connection is busy, only a flag is set and the
    /// worker closes it on return instead.
    pub fn request_timeout_close(&self) -> bool {
        if self.busy.load(Ordering::Acquire) {
            self.close_pending.store(true, Ordering::Release);
            false
        } else {
            true
        }
    }

    /// Reads as many bytes as are available into the read buffer without
    /// blocking: loops `recv` until it would block or the buffer is full,
    /// returning the peer-close/overrun conditions as errors.
    pub fn read_step(&self) -> Result<usize, ConnError> {
        let mut stream = self.stream.lock().expect("stream lock poisoned");
        let mut inner = self.inner.lock().expect("inner lock poisoned");
        inner.state = ConnState::Idle;

        let mut total = 0;
        loop {
            if inner.filled >= READ_BUFFER_CAPACITY {
                return Err(ConnError::Protocol(parser::ParseError::Overrun));
            }
            let (read_buf, filled) = (&mut inner.read_buf, inner.filled);
            match stream.read(&mut read_buf[filled..]) {
                Ok(0) => {
                    return Err(ConnError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed connection",
                    )))
                }
                Ok(n) => {
                    inner.filled += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnError::Io(e)),
            }
        }
        Ok(total)
    }

    /// Parses as much of the buffered bytes as possible and, once a full
    /// request is available, routes it and assembles the response.
    /// Invoked by a worker thread.
    pub fn process(&self, ctx: &ServerContext) -> Directive {
        let mut inner = self.inner.lock().expect("inner lock poisoned");
        inner.state = ConnState::Parsing;

        loop {
            let outcome = {
                let Inner {
                    read_buf,
                    filled,
                    scanned,
                    line_start,
                    parser,
                    ..
                } = &mut *inner;
                parser.parse(&mut read_buf[..], *filled, scanned, line_start)
            };

            match outcome {
                Ok(ParseOutcome::NoRequest) => {
                    inner.state = ConnState::Idle;
                    return Directive::RearmRead;
                }
                Ok(ParseOutcome::GetRequest) => {
                    let keep_alive = inner.parser.keep_alive;
                    let method = inner.parser.method.expect("method set on GetRequest");
                    let url = inner.parser.url.clone();
                    let body = inner.parser.body.clone();

                    let served_url = crate::router::route(method, &url, body.as_deref(), ctx);
                    let response = build_response(&served_url, keep_alive, ctx);
                    inner.response = Some(response);
                    inner.state = ConnState::Writing;
                    return Directive::RearmWrite;
                }
                Ok(ParseOutcome::BadRequest) | Err(_) => {
                    let status = match ctx.bad_request_policy {
                        BadRequestPolicy::Literal404 => Status::NotFound,
                        BadRequestPolicy::Rfc400 => Status::BadRequest,
                    };
                    let body = match status {
                        Status::NotFound => response::NOT_FOUND_BODY,
                        _ => response::BAD_REQUEST_BODY,
                    };
                    inner.response = Some(assemble_error(status, body));
                    inner.state = ConnState::Writing;
                    return Directive::RearmWrite;
                }
            }
        }
    }

    /// Drains the assembled response via a gathered write. Called directly
    /// by the reactor on WRITE readiness, not via the worker pool.
    pub fn write_step(&self) -> Result<WriteOutcome, ConnError> {
        let mut stream = self.stream.lock().expect("stream lock poisoned");
        let mut inner = self.inner.lock().expect("inner lock poisoned");

        loop {
            let Some(resp) = inner.response.as_mut() else {
                return Ok(WriteOutcome::Close);
            };

            let header_remaining = resp.header.len().saturating_sub(resp.sent.min(resp.header.len()));
            let header_sent_so_far = resp.sent.min(resp.header.len());
            let mapped_sent = resp.sent.saturating_sub(resp.header.len());

            let slices: Vec<IoSlice<'_>> = if header_remaining > 0 {
                let mut v = vec![IoSlice::new(&resp.header[header_sent_so_far..])];
                if let Some(mapped) = &resp.mapped {
                    v.push(IoSlice::new(&mapped[..]));
                }
                v
            } else if let Some(mapped) = &resp.mapped {
                vec![IoSlice::new(&mapped[mapped_sent..])]
            } else {
                vec![]
            };

            if slices.is_empty() {
                let keep_alive = resp.keep_alive;
                inner.response = None;
                return Ok(finish_write(&mut inner, keep_alive));
            }

            match stream.write_vectored(&slices) {
                Ok(0) => {
                    return Err(ConnError::Internal(
                        "gathered write made no progress".to_string(),
                    ))
                }
                Ok(n) => {
                    resp.sent += n;
                    if resp.sent >= resp.total {
                        let keep_alive = resp.keep_alive;
                        inner.response = None;
                        return Ok(finish_write(&mut inner, keep_alive));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    inner.state = ConnState::Writing;
                    return Ok(WriteOutcome::Pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnError::Io(e)),
            }
        }
    }
}

fn finish_write(inner: &mut Inner, keep_alive: bool) -> WriteOutcome {
    if keep_alive {
        *inner = Inner::fresh();
        WriteOutcome::KeepAlive
    } else {
        inner.state = ConnState::Closed;
        WriteOutcome::Close
    }
}

fn build_response(served_url: &str, keep_alive: bool, ctx: &ServerContext) -> PendingResponse {
    match crate::router::resolve(&ctx.doc_root, served_url) {
        Ok(resolved) => {
            let assembled = response::assemble(
                Status::Ok,
                keep_alive,
                Body::Mapped(resolved.mapping, resolved.len),
                WRITE_BUFFER_CAPACITY,
            );
            match assembled {
                Ok(r) => PendingResponse {
                    header: r.header,
                    mapped: r.mapped,
                    sent: 0,
                    total: r.total_len,
                    keep_alive,
                },
                Err(_) => error_response(Status::InternalServerError, response::INTERNAL_ERROR_BODY, keep_alive),
            }
        }
        Err(ConnError::NotFound) => error_response(Status::NotFound, response::NOT_FOUND_BODY, keep_alive),
        Err(ConnError::Forbidden) => error_response(Status::Forbidden, response::FORBIDDEN_BODY, keep_alive),
        Err(ConnError::IsDirectory) => error_response(Status::BadRequest, response::BAD_REQUEST_BODY, keep_alive),
        Err(_) => error_response(
            Status::InternalServerError,
            response::INTERNAL_ERROR_BODY,
            keep_alive,
        ),
    }
}

fn error_response(status: Status, body: &'static str, keep_alive: bool) -> PendingResponse {
    let assembled = response::assemble(status, keep_alive, Body::Literal(body), WRITE_BUFFER_CAPACITY)
        .expect("literal error bodies always fit the write buffer");
    PendingResponse {
        header: assembled.header,
        mapped: assembled.mapped,
        sent: 0,
        total: assembled.total_len,
        keep_alive,
    }
}

fn assemble_error(status: Status, body: &'static str) -> PendingResponse {
    error_response(status, body, false)
}
