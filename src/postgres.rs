use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor as _, PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::{ConnectionFactory, IsolationLevel, PersistenceProvider, ProviderSession};
use crate::ProviderResult;

/// PostgreSQL persistence provider.
///
/// Each persistence unit maps to a database URL; the unit's connection
/// factory is a connection pool.
#[derive(Debug, Clone, Default)]
pub struct PgProvider {
    units: HashMap<String, String>,
    max_connections: Option<u32>,
}

impl PgProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a persistence unit to a database URL.
    pub fn with_unit(mut self, unit: impl Into<String>, database_url: impl Into<String>) -> Self {
        self.units.insert(unit.into(), database_url.into());
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = Some(max_connections);
        self
    }
}

#[async_trait]
impl PersistenceProvider for PgProvider {
    type Factory = PgConnectionFactory;

    async fn create_factory(&self, unit: &str) -> ProviderResult<Self::Factory> {
        let url = self
            .units
            .get(unit)
            .ok_or_else(|| format!("no database URL configured for persistence unit '{unit}'"))?;

        let mut options = PgPoolOptions::new();
        if let Some(max) = self.max_connections {
            options = options.max_connections(max);
        }
        let pool = options.connect(url).await?;
        Ok(PgConnectionFactory::new(Arc::new(pool)))
    }
}

/// Connection factory backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    pool: Arc<PgPool>,
}

impl PgConnectionFactory {
    /// Create a new factory over the given connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    type Session = PgSession;

    async fn create_session(&self) -> ProviderResult<Self::Session> {
        let conn = self.pool.acquire().await?;
        Ok(PgSession::new(conn))
    }

    async fn close(&self) -> ProviderResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.pool.is_closed()
    }
}

/// A pooled PostgreSQL connection used as a provider session.
///
/// Repositories run their queries through [`connection`](Self::connection);
/// the transaction is driven with plain `BEGIN`/`COMMIT`/`ROLLBACK` so it can
/// span any number of repository calls.
#[derive(Debug)]
pub struct PgSession {
    conn: Option<PoolConnection<Postgres>>,
    active: bool,
}

impl PgSession {
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Some(conn),
            active: false,
        }
    }

    /// The underlying connection, for running queries in this session.
    pub fn connection(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        self.conn.as_deref_mut().ok_or(sqlx::Error::PoolClosed)
    }

    /// Runs a statement through the simple query protocol.
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        self.connection()?.execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl ProviderSession for PgSession {
    fn is_active(&self) -> bool {
        self.active
    }

    async fn begin(&mut self) -> ProviderResult<()> {
        self.execute("BEGIN").await?;
        self.active = true;
        Ok(())
    }

    async fn commit(&mut self) -> ProviderResult<()> {
        // Postgres ends the transaction even when COMMIT fails.
        let result = self.execute("COMMIT").await;
        self.active = false;
        Ok(result?)
    }

    async fn rollback(&mut self) -> ProviderResult<()> {
        let result = self.execute("ROLLBACK").await;
        self.active = false;
        Ok(result?)
    }

    async fn isolation_level(&mut self) -> ProviderResult<IsolationLevel> {
        let value: String = sqlx::query_scalar("SHOW transaction_isolation")
            .fetch_one(self.connection()?)
            .await?;
        IsolationLevel::from_sql(&value)
            .ok_or_else(|| format!("unrecognised transaction isolation '{value}'").into())
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> ProviderResult<()> {
        let sql = format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        );
        self.execute(&sql).await?;
        Ok(())
    }

    async fn close(&mut self) -> ProviderResult<()> {
        let result = if self.active {
            self.rollback().await
        } else {
            Ok(())
        };
        // Dropping the connection returns it to the pool, unless its state is unknown.
        if let Some(mut conn) = self.conn.take() {
            if result.is_err() {
                conn.close_on_drop();
            }
        }
        result
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // A connection still inside a transaction must not go back to the pool.
        if self.active {
            if let Some(conn) = self.conn.as_mut() {
                conn.close_on_drop();
            }
        }
    }
}
