//! Provider boundary.
//!
//! A persistence provider turns a persistence unit name into a connection
//! factory, the factory mints sessions, and sessions carry the transaction
//! and the raw isolation level of their underlying connection. Entity
//! operations are inherent to concrete session types and are reached through
//! [`SessionHandle::lock`](crate::SessionHandle::lock).

use async_trait::async_trait;
use std::fmt;

use crate::ProviderResult;

/// Transaction isolation level of a provider connection.
///
/// The integer codes follow the conventional JDBC constants so configuration
/// can carry plain numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Code meaning "leave the connection's isolation level unchanged".
    pub const UNCHANGED: i32 = -1;

    pub fn code(self) -> i32 {
        match self {
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }

    /// Decodes an integer isolation code.
    ///
    /// Returns `Ok(None)` for [`IsolationLevel::UNCHANGED`] and an error for
    /// codes that do not name a level.
    pub fn from_code(code: i32) -> Result<Option<Self>, InvalidIsolationCode> {
        match code {
            Self::UNCHANGED => Ok(None),
            1 => Ok(Some(Self::ReadUncommitted)),
            2 => Ok(Some(Self::ReadCommitted)),
            4 => Ok(Some(Self::RepeatableRead)),
            8 => Ok(Some(Self::Serializable)),
            other => Err(InvalidIsolationCode(other)),
        }
    }

    /// SQL spelling, as used by `SET ... ISOLATION LEVEL`.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Parses the spelling reported by the database, case-insensitively.
    pub fn from_sql(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "READ UNCOMMITTED" => Some(Self::ReadUncommitted),
            "READ COMMITTED" => Some(Self::ReadCommitted),
            "REPEATABLE READ" => Some(Self::RepeatableRead),
            "SERIALIZABLE" => Some(Self::Serializable),
            _ => None,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unknown transaction isolation code: {0}")]
pub struct InvalidIsolationCode(pub i32);

/// Entry point of a persistence provider.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    type Factory: ConnectionFactory;

    /// Builds the (expensive) connection factory for a persistence unit.
    async fn create_factory(&self, unit: &str) -> ProviderResult<Self::Factory>;
}

/// Provider-level factory for one persistence unit.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Session: ProviderSession;

    /// Opens a new session. Sessions start without an active transaction.
    async fn create_session(&self) -> ProviderResult<Self::Session>;

    /// Closes the factory and releases everything it holds.
    async fn close(&self) -> ProviderResult<()>;

    fn is_open(&self) -> bool;
}

/// A provider session: one logical connection used by a single caller.
#[async_trait]
pub trait ProviderSession: Send + 'static {
    fn is_active(&self) -> bool;

    async fn begin(&mut self) -> ProviderResult<()>;

    async fn commit(&mut self) -> ProviderResult<()>;

    async fn rollback(&mut self) -> ProviderResult<()>;

    /// Reads the isolation level of the underlying connection.
    async fn isolation_level(&mut self) -> ProviderResult<IsolationLevel>;

    /// Sets the isolation level used by subsequent transactions.
    async fn set_isolation_level(&mut self, level: IsolationLevel) -> ProviderResult<()>;

    /// Releases the session.
    async fn close(&mut self) -> ProviderResult<()>;
}
