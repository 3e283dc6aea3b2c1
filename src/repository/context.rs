//! Database context for managing connections and repository access.
//!
//! The DbContext is the primary entry point for all database operations.
//! It holds the connection pool and hands out repositories.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::conversion::{ClaimPolicy, ConversionRepository};
use super::document::DocumentRepository;
use super::pool::{DbPool, DieselError};

/// Database context that manages the connection pool and provides repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("postgres://localhost/papertext")?;
/// ctx.init_schema().await?;
/// let record = ctx.conversions(ClaimPolicy::default()).get(42).await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context from a database file path (SQLite only).
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: DbPool::sqlite_from_path(db_path),
        }
    }

    /// Create a context from a database URL.
    ///
    /// Supports:
    /// - SQLite: file paths or `sqlite:` URLs
    /// - PostgreSQL: `postgres://` or `postgresql://` URLs
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        Ok(Self {
            pool: DbPool::from_url(url)?,
        })
    }

    /// Get the conversion record repository.
    pub fn conversions(&self, policy: ClaimPolicy) -> ConversionRepository {
        ConversionRepository::new(self.pool.clone(), policy)
    }

    /// Get the document repository.
    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    /// Initialize database schema. Safe to run repeatedly.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        crate::with_conn_split!(self.pool,
            sqlite: conn => {
                init_sqlite_schema(&mut conn).await
            },
            postgres: conn => {
                init_postgres_schema(&mut conn).await
            }
        )
    }
}

async fn init_sqlite_schema(conn: &mut super::pool::SqliteConn) -> Result<(), DieselError> {
    conn.batch_execute(include_str!("schema_sqlite.sql")).await
}

#[cfg(feature = "postgres")]
async fn init_postgres_schema(conn: &mut super::pool::PgConn) -> Result<(), DieselError> {
    use diesel_async::RunQueryDsl;

    // PostgreSQL needs statements executed separately
    let statements = include_str!("schema_postgres.sql");
    for stmt in statements.split(';') {
        let stmt = stmt.trim();
        if !stmt.is_empty() {
            diesel::sql_query(stmt).execute(conn).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));

        ctx.init_schema().await.unwrap();
        ctx.init_schema().await.unwrap();

        let counts = ctx
            .conversions(ClaimPolicy::default())
            .count_by_status()
            .await
            .unwrap();
        assert!(counts.is_empty());
    }
}
