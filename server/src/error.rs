//! Error taxonomy for the server crate.

use thiserror::Error;

/// Failures that can occur while servicing a single connection. These never
/// propagate past the worker or reactor that owns the connection; they are
/// mapped to a teardown or, where applicable, an HTTP error response.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The peer closed the connection, or a read/write syscall failed for a
    /// reason other than `WouldBlock`.
    #[error("connection io error: {0}")]
    Io(#[from] std::io::Error),
    /// The parser rejected the request outright.
    #[error("malformed request: {0}")]
    Protocol(#[from] parser::ParseError),
    /// The resolved filesystem path does not exist or could not be stat'd.
    #[error("resource not found")]
    NotFound,
    /// The resolved filesystem path exists but is not world-readable.
    #[error("resource forbidden")]
    Forbidden,
    /// The resolved filesystem path names a directory.
    #[error("resource is a directory")]
    IsDirectory,
    /// Something internal failed while assembling a response (buffer
    /// overflow, mmap failure).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures at pool or queue boundaries.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The live-connection count is already at the configured maximum.
    #[error("server is at its connection limit")]
    Exhausted,
    /// The bounded work queue is full.
    #[error("work queue is full")]
    QueueFull,
}

/// Failures that abort startup, surfaced through `main`'s `ExitCode` with a
/// nonzero exit.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Failed to bind or configure the listening socket.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    /// Failed to construct the reactor (`mio::Poll`).
    #[error("failed to construct reactor: {0}")]
    Reactor(#[source] std::io::Error),
    /// Failed to install the self-pipe signal funnel.
    #[error("failed to install signal handling: {0}")]
    Signals(#[source] nix::Error),
    /// Failed to open the database pool.
    #[error("failed to connect to database: {0}")]
    Database(#[from] dbpool::PoolError),
    /// Failed to fork a worker process (multi-process deployment).
    #[error("failed to fork worker process: {0}")]
    Fork(#[source] nix::Error),
}
