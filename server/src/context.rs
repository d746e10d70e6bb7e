//! State shared by every connection regardless of which worker or process
//! handles it: the document root, the in-memory user table, and the
//! database pool. Held behind an `Arc` so worker threads (or, in the
//! multi-process deployment, the per-process singleton) can all reach it
//! without their own copy.

use std::path::PathBuf;

use dbpool::Pool;

use crate::router::BadRequestPolicy;
use crate::users::UserTable;

/// Everything a connection needs besides its own socket and buffers.
#[derive(Debug)]
pub struct ServerContext {
    /// Filesystem prefix joined with the request URL to locate assets.
    pub doc_root: PathBuf,
    /// Username/password table, primed at startup and grown by
    /// registration.
    pub users: UserTable,
    /// Database handle pool, absent only in configurations/tests that
    /// never exercise the login or registration routes.
    pub pool: Option<Pool>,
    /// Whether a parser-rejected request reports 404 or 400 (RFC-correct).
    pub bad_request_policy: BadRequestPolicy,
}
