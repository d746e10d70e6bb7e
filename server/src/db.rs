//! Startup priming and the registration-path insert, both against the
//! `user(username VARCHAR, passwd VARCHAR)` schema.
//!
//! The registration path issues a parameterized `INSERT`; submitted
//! usernames and passwords never touch a formatted SQL string.

use dbpool::{Pool, PoolError};

use crate::users::UserTable;

/// Runs `SELECT username,passwd FROM user` through a leased handle and
/// loads every row into `users`. Must run after the pool is constructed
/// and before the reactor starts accepting connections.
pub fn prime_users(pool: &Pool, users: &UserTable) -> Result<(), PoolError> {
    let mut lease = pool.acquire()?;
    let rows = lease.query("SELECT username, passwd FROM user", &[])?;
    let count = rows.len();
    users.load(
        rows.into_iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1))),
    );
    tracing::info!(count, "primed user table from database");
    Ok(())
}

/// Inserts a newly registered user. Returns `Ok(false)` if the insert
/// violated a uniqueness constraint (a racing registration for the same
/// name), `Ok(true)` on success.
pub fn register_user(pool: &Pool, username: &str, password: &str) -> Result<bool, PoolError> {
    let mut lease = pool.acquire()?;
    let result = lease.execute(
        "INSERT INTO user (username, passwd) VALUES ($1, $2)",
        &[&username, &password],
    );

    match result {
        Ok(_) => Ok(true),
        Err(e) if e.code().map(|c| c.code()) == Some("23505") => Ok(false),
        Err(e) => Err(e.into()),
    }
}
