//! Per-request session lifecycle.
//!
//! A [`SessionInterceptor`] drives one unit of work against the registry:
//!
//! 1. `before`: resolve the manager, optionally override the isolation level
//!    and begin a transaction.
//! 2. The guarded operation runs against the caller's session handle.
//! 3. `after` commits, `exception` rolls back. Both then restore the isolation
//!    level and close the handle, whatever the commit or rollback did.
//!
//! When a commit fails the commit error is returned after cleanup. When the
//! operation fails its own error is returned; rollback and cleanup failures on
//! that path are logged.

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::provider::{ConnectionFactory, IsolationLevel};
use crate::scope::{self, CallerId};
use crate::{PersistenceManager, PersistenceManagerRegistry, Result, SessionError};

/// How a unit of work uses its persistence session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Manager name; `None` resolves the registry's only manager.
    pub unit: Option<String>,
    /// Run the operation inside a transaction.
    pub transactional: bool,
    /// Isolation override applied for the transaction; `None` leaves the
    /// connection's level unchanged.
    pub isolation: Option<IsolationLevel>,
}

impl SessionConfig {
    /// Non-transactional session on the default manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transactional session on the default manager.
    pub fn transactional() -> Self {
        Self {
            transactional: true,
            ..Self::default()
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
}

/// Boxed future returned by [`SessionInterceptor::wrap`]ped handlers.
pub type HandlerFuture<T, E> =
    Pin<Box<dyn Future<Output = std::result::Result<T, SessionError<E>>> + Send>>;

type StashKey = (CallerId, Uuid);

pub struct SessionInterceptor<F: ConnectionFactory> {
    id: Uuid,
    registry: Arc<PersistenceManagerRegistry<F>>,
    original_isolation: Arc<DashMap<StashKey, IsolationLevel>>,
}

impl<F: ConnectionFactory> SessionInterceptor<F> {
    pub fn new(registry: Arc<PersistenceManagerRegistry<F>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            original_isolation: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PersistenceManagerRegistry<F>> {
        &self.registry
    }

    fn manager(&self, config: &SessionConfig) -> Result<Arc<PersistenceManager<F>>> {
        self.registry.get(config.unit.as_deref())
    }

    /// Opens the unit of work.
    ///
    /// On failure nothing is left open: a stashed isolation level is restored
    /// and the caller's handle closed before the error is returned.
    pub async fn before(&self, config: &SessionConfig) -> Result<Arc<PersistenceManager<F>>> {
        debug!(unit = ?config.unit, "Initializing persistence session");
        let manager = self.manager(config)?;

        if config.transactional {
            if let Err(e) = self.open_transaction(&manager, config).await {
                self.release(&manager).await;
                return Err(e);
            }
        }
        Ok(manager)
    }

    async fn open_transaction(
        &self,
        manager: &PersistenceManager<F>,
        config: &SessionConfig,
    ) -> Result<()> {
        if let Some(level) = config.isolation {
            debug!(%level, "Configuring transaction isolation level");
            self.configure_isolation(manager, level).await?;
        }
        debug!("Beginning transaction");
        manager.begin_transaction().await?;
        debug!("Inside transaction");
        Ok(())
    }

    /// Finishes a successful unit of work.
    pub async fn after(&self, config: &SessionConfig) -> Result<()> {
        let manager = self.manager(config)?;

        let committed = if config.transactional {
            debug!("Committing transaction");
            manager.commit().await
        } else {
            Ok(())
        };
        if let Err(e) = &committed {
            error!(unit = %manager.unit(), error = %e, "Commit failed");
        }

        let restored = self.restore_isolation(&manager).await;
        let closed = manager.close_handle().await;
        settle(committed, [("restore isolation", restored), ("close session", closed)])
    }

    /// Finishes a failed unit of work and hands back the failure signal
    /// carrying `failure`.
    pub async fn exception<E>(&self, config: &SessionConfig, failure: E) -> SessionError<E> {
        let manager = match self.manager(config) {
            Ok(manager) => manager,
            Err(e) => {
                error!(error = %e, "No persistence manager to clean up after failed operation");
                return SessionError::Operation(failure);
            }
        };

        if config.transactional {
            error!(unit = %manager.unit(), "Operation failed, rolling back transaction");
            match manager.rollback().await {
                Ok(()) => debug!("Transaction rolled back"),
                Err(e) => error!(unit = %manager.unit(), error = %e, "Rollback failed"),
            }
        }
        self.release(&manager).await;
        SessionError::Operation(failure)
    }

    /// Runs `op` as one unit of work inside its own caller scope.
    pub async fn run<T, E, Op, Fut>(
        &self,
        config: &SessionConfig,
        op: Op,
    ) -> std::result::Result<T, SessionError<E>>
    where
        Op: FnOnce(Arc<PersistenceManager<F>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        scope::unit_scope(async {
            let manager = match self.before(config).await {
                Ok(manager) => manager,
                Err(e) => return Err(SessionError::Persistence(e)),
            };
            match op(manager).await {
                Ok(value) => match self.after(config).await {
                    Ok(()) => Ok(value),
                    Err(e) => Err(SessionError::Persistence(e)),
                },
                Err(failure) => Err(self.exception(config, failure).await),
            }
        })
        .await
    }

    /// Wraps `handler` so every call runs as a unit of work configured by
    /// `config`.
    pub fn wrap<Req, T, E, H, Fut>(
        self: Arc<Self>,
        config: SessionConfig,
        handler: H,
    ) -> impl Fn(Req) -> HandlerFuture<T, E> + Send + Sync + 'static
    where
        H: Fn(Arc<PersistenceManager<F>>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        Req: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let config = Arc::new(config);
        let handler = Arc::new(handler);
        move |request: Req| -> HandlerFuture<T, E> {
            let interceptor = Arc::clone(&self);
            let config = Arc::clone(&config);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                interceptor
                    .run(&config, move |manager| (*handler)(manager, request))
                    .await
            })
        }
    }

    async fn configure_isolation(
        &self,
        manager: &PersistenceManager<F>,
        level: IsolationLevel,
    ) -> Result<()> {
        let key = (scope::current_caller(), manager.id());
        let original = manager.isolation_level().await?;
        self.original_isolation.insert(key, original);

        let stash = Arc::downgrade(&self.original_isolation);
        scope::on_scope_exit((self.id, manager.id()), move || {
            if let Some(stash) = stash.upgrade() {
                stash.remove(&key);
            }
        });

        manager.set_isolation_level(level).await?;
        debug!(%original, %level, "Transaction isolation level configured");
        Ok(())
    }

    async fn restore_isolation(&self, manager: &PersistenceManager<F>) -> Result<()> {
        let key = (scope::current_caller(), manager.id());
        let Some((_, original)) = self.original_isolation.remove(&key) else {
            return Ok(());
        };
        scope::cancel_scope_exit(&(self.id, manager.id()));
        debug!(%original, "Restoring transaction isolation level");
        manager.set_isolation_level(original).await
    }

    /// Restores isolation and closes the handle, logging failures.
    async fn release(&self, manager: &PersistenceManager<F>) {
        if let Err(e) = self.restore_isolation(manager).await {
            error!(unit = %manager.unit(), error = %e, "Error restoring transaction isolation level");
        }
        if let Err(e) = manager.close_handle().await {
            error!(unit = %manager.unit(), error = %e, "Error closing session");
        }
    }
}

/// Combines the primary step's outcome with the cleanup steps that followed.
/// The primary error wins; otherwise the first cleanup error is returned.
fn settle<const N: usize>(primary: Result<()>, cleanup: [(&str, Result<()>); N]) -> Result<()> {
    let mut outcome = primary;
    for (step, result) in cleanup {
        if let Err(e) = result {
            if outcome.is_err() {
                warn!(step, error = %e, "Cleanup failed after an earlier error");
            } else {
                error!(step, error = %e, "Cleanup failed");
                outcome = Err(e);
            }
        }
    }
    outcome
}
