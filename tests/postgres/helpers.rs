//! Shared helpers for `PostgreSQL` integration tests.

use chrono::{DateTime, Local, Utc};
use mockable::Clock;
use pixelflow::pg::{PgPool, build_pool, ensure_schema};
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

/// Environment variable naming the test database.
pub const DATABASE_URL_ENV: &str = "PIXELFLOW_TEST_DATABASE_URL";

static SCHEMA: OnceLock<Result<(), String>> = OnceLock::new();

/// Returns a pool on the test database, or `None` when none is configured.
///
/// # Errors
///
/// Returns an error if the configured database cannot be reached or
/// migrated.
pub fn test_pool() -> eyre::Result<Option<PgPool>> {
    let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
        tracing::warn!("{DATABASE_URL_ENV} unset; skipping postgres test");
        return Ok(None);
    };
    let pool = build_pool(&url, 8, Duration::from_secs(5))?;
    let schema = SCHEMA.get_or_init(|| {
        pool.get()
            .map_err(|err| err.to_string())
            .and_then(|mut conn| ensure_schema(&mut conn).map_err(|err| err.to_string()))
    });
    schema.clone().map_err(|err| eyre::eyre!(err))?;
    Ok(Some(pool))
}

/// Returns a name no other test uses.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.0.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.0
    }
}
