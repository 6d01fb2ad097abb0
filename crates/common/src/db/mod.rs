//! Database layer: SeaORM entities, the `Repository` facade, and the
//! primary/replica pool shared by the gateway, orchestrator, and worker.

pub mod models;
mod repository;

pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Writes always hit `primary`; reads prefer the replica when one is
/// configured so listing and report queries stay off the write path.
#[derive(Clone)]
pub struct DbPool {
    pub primary: DatabaseConnection,
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Open the primary connection, and the read replica when
    /// `database.read_url` is set.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let primary = connect("primary", &config.url, config).await?;
        let replica = match config.read_url.as_deref() {
            Some(read_url) => Some(connect("replica", read_url, config).await?),
            None => None,
        };
        Ok(Self { primary, replica })
    }

    /// Route every query through one connection. Used by tests that drive
    /// the repository without a live Postgres.
    pub fn single(conn: DatabaseConnection) -> Self {
        Self { primary: conn, replica: None }
    }

    /// Connection for reads: the replica if present, otherwise primary.
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Connection for writes: always primary.
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Round-trip a trivial query on every configured connection.
    pub async fn ping(&self) -> Result<()> {
        ping_conn("primary", &self.primary).await?;
        if let Some(replica) = &self.replica {
            ping_conn("replica", replica).await?;
        }
        Ok(())
    }
}

async fn connect(role: &str, url: &str, config: &DatabaseConfig) -> Result<DatabaseConnection> {
    info!(role, "Connecting to database");

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(true);

    Database::connect(options)
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("{role} connection failed: {e}"),
        })
}

async fn ping_conn(role: &str, conn: &DatabaseConnection) -> Result<()> {
    conn.execute_unprepared("SELECT 1")
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("{role} ping failed: {e}"),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_route_to_replica_when_present() {
        let pool = DbPool {
            primary: DatabaseConnection::default(),
            replica: Some(DatabaseConnection::default()),
        };
        assert!(std::ptr::eq(pool.read(), pool.replica.as_ref().unwrap()));
        assert!(std::ptr::eq(pool.write(), &pool.primary));
    }

    #[test]
    fn test_reads_fall_back_to_primary() {
        let pool = DbPool::single(DatabaseConnection::default());
        assert!(std::ptr::eq(pool.read(), &pool.primary));
        assert!(std::ptr::eq(pool.write(), &pool.primary));
    }
}
