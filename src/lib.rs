//! Postgres Unit of Work Module
//!
//! Transaction-scoped persistence sessions for request handling. Named
//! persistence managers live in a registry; each unit of work gets one session
//! per manager, an optional transaction with an optional isolation override,
//! and is committed or rolled back and released by the session interceptor.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod postgres;
pub mod provider;
pub mod registry;
pub mod scope;
pub mod session;

pub use config::ManagerConfig;
pub use error::{PersistenceError, ProviderError, ProviderResult, Result, SessionError};
pub use interceptor::{HandlerFuture, SessionConfig, SessionInterceptor};
pub use manager::{PersistenceManager, DEFAULT_NAME};
pub use postgres::{PgConnectionFactory, PgProvider, PgSession};
pub use provider::{ConnectionFactory, IsolationLevel, PersistenceProvider, ProviderSession};
pub use registry::PersistenceManagerRegistry;
pub use scope::{current_caller, unit_scope, CallerId};
pub use session::SessionHandle;
