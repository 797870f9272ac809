use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::ManagerConfig;
use crate::provider::{ConnectionFactory, PersistenceProvider};
use crate::{PersistenceError, PersistenceManager, Result};

/// Concurrent mapping from manager name to [`PersistenceManager`].
pub struct PersistenceManagerRegistry<F: ConnectionFactory> {
    instances: DashMap<String, Arc<PersistenceManager<F>>>,
}

impl<F: ConnectionFactory> PersistenceManagerRegistry<F> {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Creates one manager per configured `name:unit` pair and registers it.
    ///
    /// If any unit fails to initialize, the managers created so far are
    /// destroyed before the error is returned.
    pub async fn from_config<P>(provider: &P, config: &ManagerConfig) -> Result<Self>
    where
        P: PersistenceProvider<Factory = F>,
    {
        let registry = Self::new();
        for (name, unit) in config.entries() {
            let manager = match PersistenceManager::create(provider, unit).await {
                Ok(manager) => manager,
                Err(e) => {
                    if let Err(cleanup) = registry.clear().await {
                        error!(error = %cleanup, "Failed to release partially initialized registry");
                    }
                    return Err(e);
                }
            };
            registry.register(name, Arc::new(manager));
            info!(manager = name, unit, "Registered persistence manager");
        }
        Ok(registry)
    }

    /// Registers `manager` under `name` unless the name is taken.
    ///
    /// Returns `true` if the manager was inserted; a later registration for an
    /// existing name is ignored.
    pub fn register(&self, name: impl Into<String>, manager: Arc<PersistenceManager<F>>) -> bool {
        let name = name.into();
        match self.instances.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                debug!(manager = %entry.key(), "Persistence manager already registered, ignoring");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(manager);
                true
            }
        }
    }

    /// Resolves a manager by name. `None` or an empty name resolves the sole
    /// registered manager.
    pub fn get(&self, name: Option<&str>) -> Result<Arc<PersistenceManager<F>>> {
        match name {
            None | Some("") => self.get_default(),
            Some(name) => self
                .instances
                .get(name)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| PersistenceError::not_found(name)),
        }
    }

    fn get_default(&self) -> Result<Arc<PersistenceManager<F>>> {
        match self.instances.len() {
            0 => Err(PersistenceError::not_found("<default>")),
            1 => self
                .instances
                .iter()
                .next()
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| PersistenceError::not_found("<default>")),
            count => Err(PersistenceError::AmbiguousDefault { count }),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Destroys every registered manager and empties the registry.
    ///
    /// Every manager is attempted even if an earlier one fails; the first
    /// failure is returned once the registry is empty. A manager registered
    /// under several names is destroyed once.
    pub async fn clear(&self) -> Result<()> {
        let managers: Vec<(String, Arc<PersistenceManager<F>>)> = self
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut first_error = None;
        for (name, manager) in managers {
            match manager.destroy().await {
                Ok(()) | Err(PersistenceError::Closed { .. }) => {}
                Err(e) => {
                    error!(manager = %name, error = %e, "Failed to destroy persistence manager");
                    first_error.get_or_insert(e);
                }
            }
            self.instances.remove(&name);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<F: ConnectionFactory> Default for PersistenceManagerRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}
