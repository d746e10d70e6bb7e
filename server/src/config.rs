//! Command-line configuration.
//!
//! The listening port is a mandatory positional argument, first on the
//! line, and parsing fails if it is missing; everything else is an
//! additive flag with a sensible default.

use clap::{Parser, ValueEnum};

use crate::router::BadRequestPolicy;

/// Which concurrency model services connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Deployment {
    /// One reactor thread plus a fixed pool of worker threads fed by an
    /// in-process bounded queue.
    Threaded,
    /// One reactor per OS process, coordinated by a parent that dispatches
    /// accepted connections round-robin over UNIX-domain socket pairs.
    MultiProcess,
}

/// Server configuration, parsed from the command line.
#[derive(Debug, Parser)]
#[command(name = "server", about = "HTTP/1.1 static file and login server")]
pub struct Config {
    /// TCP port to listen on.
    pub port: u16,

    /// Filesystem root that request paths are resolved against.
    #[arg(long, default_value = "./resources")]
    pub doc_root: String,

    /// Worker thread count (threaded deployment only).
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Maximum pending items in the work queue before `append` rejects.
    #[arg(long, default_value_t = 10_000)]
    pub queue_capacity: usize,

    /// Maximum simultaneously live connections.
    #[arg(long, default_value_t = 65_536)]
    pub max_connections: usize,

    /// Idle-timer resolution in seconds; the idle deadline is always
    /// three times this value.
    #[arg(long, default_value_t = 5)]
    pub timeslot_secs: u64,

    /// Which concurrency model to run.
    #[arg(long, value_enum, default_value_t = Deployment::Threaded)]
    pub deployment: Deployment,

    /// Database host.
    #[arg(long, default_value = "localhost")]
    pub db_url: String,

    /// Database port.
    #[arg(long, default_value_t = 5432)]
    pub db_port: u16,

    /// Database user.
    #[arg(long, default_value = "root")]
    pub db_user: String,

    /// Database password.
    #[arg(long, default_value = "")]
    pub db_password: String,

    /// Database name.
    #[arg(long, default_value = "webserver")]
    pub db_name: String,

    /// Number of leasable database handles.
    #[arg(long, default_value_t = 8)]
    pub db_pool_size: u32,

    /// Whether a parser-rejected request reports status 404 or the
    /// RFC-correct 400.
    #[arg(long, value_enum, default_value_t = BadRequestPolicy::Literal404)]
    pub bad_request_policy: BadRequestPolicy,
}

impl Config {
    /// Idle deadline, in seconds: three times the timer resolution.
    pub fn idle_timeout_secs(&self) -> u64 {
        3 * self.timeslot_secs
    }
}
