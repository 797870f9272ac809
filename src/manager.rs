use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::provider::{ConnectionFactory, IsolationLevel, PersistenceProvider};
use crate::scope::{self, CallerId, ReleaseKey};
use crate::{PersistenceError, Result, SessionHandle};

/// Name of the persistence manager and unit used when none is configured.
pub const DEFAULT_NAME: &str = "default";

type Handles<S> = DashMap<CallerId, Arc<SessionHandle<S>>>;

/// Owns the provider connection factory for one persistence unit and mints
/// caller-bound session handles from it.
///
/// At most one handle is live per caller. Handles are created lazily by
/// [`handle`](Self::handle) and released by [`close_handle`](Self::close_handle)
/// or when the caller's unit-of-work scope ends. Once
/// [`destroy`](Self::destroy)ed a manager cannot be reused.
pub struct PersistenceManager<F: ConnectionFactory> {
    id: Uuid,
    unit: String,
    factory: RwLock<Option<Arc<F>>>,
    handles: Arc<Handles<F::Session>>,
}

impl<F: ConnectionFactory> PersistenceManager<F> {
    /// Create a manager around an already built connection factory.
    pub fn new(unit: impl Into<String>, factory: F) -> Self {
        Self {
            id: Uuid::new_v4(),
            unit: unit.into(),
            factory: RwLock::new(Some(Arc::new(factory))),
            handles: Arc::new(DashMap::new()),
        }
    }

    /// Build the connection factory for `unit` through `provider`.
    pub async fn create<P>(provider: &P, unit: &str) -> Result<Self>
    where
        P: PersistenceProvider<Factory = F>,
    {
        match provider.create_factory(unit).await {
            Ok(factory) => {
                debug!(unit, "Persistence manager initialized");
                Ok(Self::new(unit, factory))
            }
            Err(source) => {
                error!(unit, error = %source, "Persistence manager initialization failed");
                Err(PersistenceError::ResourceInit {
                    unit: unit.to_string(),
                    source,
                })
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// `false` once destroyed or when the provider reports its factory closed.
    pub fn is_open(&self) -> bool {
        self.factory
            .read()
            .as_ref()
            .is_some_and(|factory| factory.is_open())
    }

    fn factory(&self) -> Result<Arc<F>> {
        match self.factory.read().as_ref() {
            Some(factory) if factory.is_open() => Ok(Arc::clone(factory)),
            _ => Err(PersistenceError::closed(&self.unit)),
        }
    }

    /// Returns the session handle bound to the current caller, opening a
    /// provider session on first use.
    pub async fn handle(&self) -> Result<Arc<SessionHandle<F::Session>>> {
        let factory = self.factory()?;
        let caller = scope::current_caller();

        let existing = self.handles.get(&caller).map(|entry| Arc::clone(entry.value()));
        if let Some(handle) = existing {
            return Ok(handle);
        }

        let session = factory.create_session().await.map_err(|source| {
            error!(unit = %self.unit, error = %source, "Error creating session");
            PersistenceError::ResourceInit {
                unit: self.unit.clone(),
                source,
            }
        })?;
        let handle = Arc::new(SessionHandle::new(&self.unit, session));

        let raced = match self.handles.entry(caller) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&handle));
                None
            }
        };
        if let Some(existing) = raced {
            debug!(unit = %self.unit, ?caller, "Session already bound, discarding duplicate");
            if let Err(e) = handle.close().await {
                warn!(unit = %self.unit, error = %e, "Error closing duplicate session");
            }
            return Ok(existing);
        }

        let handles = Arc::downgrade(&self.handles);
        scope::on_scope_exit(self.release_key(), move || {
            if let Some(handles) = handles.upgrade() {
                handles.remove(&caller);
            }
        });

        debug!(unit = %self.unit, ?caller, "Session opened");
        Ok(handle)
    }

    fn release_key(&self) -> ReleaseKey {
        (self.id, self.id)
    }

    /// Whether the current caller has a live handle.
    pub fn has_handle(&self) -> bool {
        self.handles.contains_key(&scope::current_caller())
    }

    /// Closes and unbinds the current caller's handle, if any.
    pub async fn close_handle(&self) -> Result<()> {
        let caller = scope::current_caller();
        match self.handles.remove(&caller) {
            Some((_, handle)) => {
                scope::cancel_scope_exit(&self.release_key());
                debug!(unit = %self.unit, ?caller, "Closing session");
                handle.close().await
            }
            None => Ok(()),
        }
    }

    /// Closes the provider factory. Every later call on this manager fails
    /// with [`PersistenceError::Closed`], including a second `destroy`.
    pub async fn destroy(&self) -> Result<()> {
        let factory = self
            .factory
            .write()
            .take()
            .ok_or_else(|| PersistenceError::closed(&self.unit))?;

        // Sessions still bound are dropped with the factory.
        self.handles.clear();

        factory.close().await.map_err(|source| {
            error!(unit = %self.unit, error = %source, "Error closing connection factory");
            PersistenceError::provider(source)
        })?;
        debug!(unit = %self.unit, "Persistence manager destroyed");
        Ok(())
    }

    pub async fn begin_transaction(&self) -> Result<()> {
        self.handle().await?.begin().await
    }

    pub async fn commit(&self) -> Result<()> {
        self.handle().await?.commit().await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.handle().await?.rollback().await
    }

    pub async fn isolation_level(&self) -> Result<IsolationLevel> {
        self.handle().await?.isolation_level().await
    }

    pub async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.handle().await?.set_isolation_level(level).await
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PersistenceManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("id", &self.id)
            .field("unit", &self.unit)
            .field("open", &self.is_open())
            .field("handles", &self.handles.len())
            .finish()
    }
}
