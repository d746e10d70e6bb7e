//! Bounded work queue and fixed-size worker thread pool.
//!
//! A single `crossbeam_channel::bounded` is both the queue and a counting
//! semaphore, rejecting submissions once it is full — the same
//! free-list-as-semaphore idiom `dbpool::Pool` uses. A worker that finishes
//! `process()` re-arms the connection's mio registration itself rather than
//! handing control back to the reactor thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use mio::{Interest, Registry, Token, Waker};

use crate::connection::{Connection, Directive};
use crate::context::ServerContext;
use crate::error::ResourceError;

enum WorkItem {
    Process(Arc<Connection>),
    Shutdown,
}

/// Owns the bounded channel and the worker threads draining it. Dropping or
/// calling [`WorkQueue::shutdown`] stops every worker after its current
/// item.
#[derive(Debug)]
pub struct WorkQueue {
    tx: Sender<WorkItem>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkQueue {
    /// Spawns `worker_count` threads sharing a channel of capacity
    /// `capacity`. Each worker gets its own cloned [`Registry`] handle (mio
    /// registries are safe to share and call from multiple threads) so it
    /// can re-arm a connection's interest without crossing back to the
    /// reactor thread. `closed_tx`/`waker` let a worker that decides a
    /// connection must close hand its token back to the reactor, which owns
    /// the connection table and must be the one to drop it.
    pub fn start(
        worker_count: usize,
        capacity: usize,
        ctx: Arc<ServerContext>,
        registry: &Registry,
        closed_tx: Sender<Token>,
        waker: Arc<Waker>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let mut handles = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let rx = rx.clone();
            let ctx = Arc::clone(&ctx);
            let registry = registry.try_clone()?;
            let closed_tx = closed_tx.clone();
            let waker = Arc::clone(&waker);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("rask-worker-{id}"))
                    .spawn(move || worker_loop(&rx, &ctx, &registry, &closed_tx, &waker))
                    .expect("failed to spawn worker thread"),
            );
        }

        Ok(Self { tx, handles })
    }

    /// Enqueues `conn` for a worker to call `process()` on. Marks the
    /// connection busy first so a timer tick racing this submission knows
    /// to defer closing it; clears the flag again if the queue turned out
    /// to be full.
    pub fn submit(&self, conn: Arc<Connection>) -> Result<(), ResourceError> {
        if !conn.mark_busy() {
            // Already checked out; ONE_SHOT should make this unreachable.
            return Ok(());
        }
        match self.tx.try_send(WorkItem::Process(conn)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(WorkItem::Process(conn))) => {
                conn.clear_busy();
                Err(ResourceError::QueueFull)
            }
            Err(TrySendError::Full(WorkItem::Shutdown)) => unreachable!(),
            Err(TrySendError::Disconnected(_)) => Err(ResourceError::QueueFull),
        }
    }

    /// Sends one shutdown marker per worker and joins them all.
    pub fn shutdown(self) {
        for _ in &self.handles {
            let _ = self.tx.send(WorkItem::Shutdown);
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    rx: &Receiver<WorkItem>,
    ctx: &Arc<ServerContext>,
    registry: &Registry,
    closed_tx: &Sender<Token>,
    waker: &Waker,
) {
    while let Ok(item) = rx.recv() {
        let conn = match item {
            WorkItem::Shutdown => break,
            WorkItem::Process(conn) => conn,
        };

        let directive = conn.process(ctx);
        let close_requested = conn.clear_busy();
        let directive = if close_requested {
            Directive::Close
        } else {
            directive
        };

        match directive {
            Directive::RearmRead => {
                let _ = conn.reregister(registry, Interest::READABLE);
            }
            Directive::RearmWrite => {
                let _ = conn.reregister(registry, Interest::WRITABLE);
            }
            Directive::Close => {
                let _ = conn.deregister(registry);
                let _ = closed_tx.send(conn.token());
                let _ = waker.wake();
            }
        }
    }
}
