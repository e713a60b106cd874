//! Shared `PostgreSQL` pool and blocking helpers.
//!
//! Diesel is synchronous, so every adapter offloads its work to the
//! blocking thread pool instead of stalling the async executor.

use diesel::PgConnection;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError, PooledConnection};
use std::time::Duration;
use thiserror::Error;

/// `PostgreSQL` connection pool type shared by the task store and broker.
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Pooled connection type.
pub type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

const TASKS_SCHEMA: &str = include_str!("../migrations/2026-01-05-000000_create_tasks/up.sql");
const BROKER_SCHEMA: &str =
    include_str!("../migrations/2026-01-05-000100_create_broker_log/up.sql");

/// Builds a connection pool, failing if no connection can be established
/// within `connect_timeout`.
///
/// # Errors
///
/// Returns [`PoolError`] when the pool cannot open its first connection.
pub fn build_pool(url: &str, max_size: u32, connect_timeout: Duration) -> Result<PgPool, PoolError> {
    Pool::builder()
        .max_size(max_size)
        .connection_timeout(connect_timeout)
        .build(ConnectionManager::<PgConnection>::new(url))
}

/// Errors raised while selecting a reachable database.
#[derive(Debug, Error)]
pub enum PgConnectError {
    /// The candidate list was empty.
    #[error("no postgres URLs configured")]
    NoCandidates,
    /// Every candidate failed; carries the last failure.
    #[error("no postgres candidate reachable: {0}")]
    Unreachable(#[source] PoolError),
}

/// Tries each URL in order and returns the pool for the first reachable one.
///
/// # Errors
///
/// Returns [`PgConnectError::Unreachable`] with the last failure when no
/// candidate answers, or [`PgConnectError::NoCandidates`] for an empty list.
pub fn build_first_available(
    urls: &[String],
    max_size: u32,
    connect_timeout: Duration,
) -> Result<PgPool, PgConnectError> {
    let mut last_error = None;
    for url in urls {
        match build_pool(url, max_size, connect_timeout) {
            Ok(pool) => return Ok(pool),
            Err(err) => {
                tracing::warn!(error = %err, "postgres candidate unreachable, trying next");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.map_or(PgConnectError::NoCandidates, PgConnectError::Unreachable))
}

/// Creates the task and broker tables when they do not yet exist.
///
/// # Errors
///
/// Returns a diesel error if the DDL fails.
pub fn ensure_schema(connection: &mut PgConnection) -> diesel::QueryResult<()> {
    connection.batch_execute(TASKS_SCHEMA)?;
    connection.batch_execute(BROKER_SCHEMA)
}

/// Runs a blocking task and maps join errors into the caller's error type.
pub(crate) async fn run_blocking_with<F, T, E, M>(f: F, map_err: M) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    M: FnOnce(tokio::task::JoinError) -> E,
{
    tokio::task::spawn_blocking(f).await.map_err(map_err)?
}

/// Obtains a connection from the pool with a caller-provided error mapper.
pub(crate) fn get_conn_with<E, M>(pool: &PgPool, map_err: M) -> Result<PooledConn, E>
where
    M: FnOnce(PoolError) -> E,
{
    pool.get().map_err(map_err)
}
