//! Connection pool ownership, migrations, and shared row-mapping helpers.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{DataError, Result};

/// Database-backed store shared by every repository in the workspace.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Open a bounded connection pool against the given database URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(5)
            .max_lifetime(Duration::from_secs(60 * 60))
            .idle_timeout(Duration::from_secs(30 * 60))
            .connect(database_url)
            .await
            .map_err(map_query_err("connect pool"))?;
        Ok(Self { pool })
    }

    /// Build a store whose pool connects on first use. Intended for tests
    /// that exercise handlers which never touch the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .connect_lazy(database_url)
            .map_err(map_query_err("parse database url"))?;
        Ok(Self { pool })
    }

    /// Apply pending migrations. Forward-only; already-applied files are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails or the database is unreachable.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(())
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| DataError::QueryFailed { operation, source }
}

pub(crate) fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

pub(crate) fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_handles_large_values() {
        assert_eq!(clamp_i64(42), 42);
        assert_eq!(clamp_i64(u64::MAX), i64::MAX);
    }

    #[test]
    fn signed_to_unsigned_floors_negatives() {
        assert_eq!(to_u64(-1), 0);
        assert_eq!(to_u64(7), 7);
        assert_eq!(to_u32(-5), 0);
        assert_eq!(to_u32(5), 5);
    }

    #[tokio::test]
    async fn lazy_pool_accepts_valid_url() {
        assert!(Store::connect_lazy("postgres://localhost/torva").is_ok());
    }
}
