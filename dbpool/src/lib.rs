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

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! A bounded pool of authenticated database handles with RAII-style scoped
//! leases. `max` connections are opened once at [`Pool::connect`]; callers
//! never see a raw handle outside a [`Lease`], whose `Drop` always returns
//! the handle.
//!
//! A `crossbeam_channel::bounded(max)` doubles as both the free list and a
//! counting semaphore: a blocking `recv` on an empty channel is exactly
//! "wait for a free connection", and `send` back on release can never
//! exceed capacity because at most `max` handles ever exist.

use std::fmt;

use crossbeam_channel::{Receiver, Sender};
use postgres::{Client, NoTls};

/// Errors returned while establishing or using the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The underlying driver reported an error while connecting or
    /// executing a statement.
    #[error("database error: {0}")]
    Driver(#[from] postgres::Error),
    /// Every handle has been dropped and the pool is no longer usable
    /// (only reachable if every sender was dropped, which does not happen
    /// in normal operation).
    #[error("connection pool is closed")]
    Closed,
}

/// Connection parameters for the user/session database.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Host or address of the database server.
    pub url: String,
    /// Database port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database name to select.
    pub database: String,
    /// Number of handles to open and keep leasable; `free + in_use == max`
    /// holds at every point outside an acquire/release critical section.
    pub max_connections: u32,
}

impl PoolConfig {
    fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.url, self.port, self.user, self.password, self.database
        )
    }
}

/// A bounded pool of open, authenticated [`postgres::Client`] handles.
pub struct Pool {
    max_connections: u32,
    free_tx: Sender<Client>,
    free_rx: Receiver<Client>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_connections", &self.max_connections)
            .field("free", &self.free_rx.len())
            .finish()
    }
}

impl Pool {
    /// Opens `config.max_connections` handles up front and returns a pool
    /// ready to lease them out, rather than opening connections lazily on
    /// first use.
    pub fn connect(config: &PoolConfig) -> Result<Self, PoolError> {
        let (free_tx, free_rx) = crossbeam_channel::bounded(config.max_connections as usize);
        let conn_str = config.connection_string();

        for _ in 0..config.max_connections {
            let client = Client::connect(&conn_str, NoTls)?;
            // capacity matches max_connections exactly, so this can never block
            free_tx
                .send(client)
                .expect("channel sized to max_connections");
        }

        tracing::info!(
            max_connections = config.max_connections,
            "database pool initialized"
        );

        Ok(Self {
            max_connections: config.max_connections,
            free_tx,
            free_rx,
        })
    }

    /// Blocks the calling thread until a handle is free, then leases it.
    /// The handle is returned to the pool when the returned [`Lease`] is
    /// dropped, however the caller's use of it ends (including panics
    /// unwound through the guard).
    pub fn acquire(&self) -> Result<Lease<'_>, PoolError> {
        let client = self.free_rx.recv().map_err(|_| PoolError::Closed)?;
        Ok(Lease {
            client: Some(client),
            free_tx: &self.free_tx,
        })
    }

    /// Number of handles currently idle in the pool. Exposed for the
    /// invariant tests in `server`: `free + in_use == max_connections`.
    pub fn free_count(&self) -> usize {
        self.free_rx.len()
    }

    /// Total handles this pool was constructed with.
    pub fn capacity(&self) -> u32 {
        self.max_connections
    }
}

/// A scoped, exclusive lease on one pooled handle. Deref to
/// [`postgres::Client`] for issuing queries; the handle is returned to the
/// pool's free list on drop.
pub struct Lease<'a> {
    client: Option<Client>,
    free_tx: &'a Sender<Client>,
}

impl std::ops::Deref for Lease<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("client taken only on drop")
    }
}

impl std::ops::DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("client taken only on drop")
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // capacity was sized to max_connections; this send cannot block
            // or fail unless every receiver (the Pool) has already been
            // dropped, in which case discarding the handle is correct.
            let _ = self.free_tx.send(client);
        }
    }
}

impl fmt::Debug for Lease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}
