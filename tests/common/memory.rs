use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use postgres_unit_of_work::{
    ConnectionFactory, IsolationLevel, PersistenceProvider, ProviderResult, ProviderSession,
};

use super::entities::Beverage;

/// Provider calls, recorded in the order they reach the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateFactory(String),
    CreateSession,
    Begin,
    Commit,
    Rollback,
    GetIsolation,
    SetIsolation(IsolationLevel),
    CloseSession,
    CloseFactory,
}

/// Provider operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    CreateFactory,
    CreateSession,
    Begin,
    Commit,
    Rollback,
    Isolation,
    CloseSession,
    CloseFactory,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("injected {0:?} failure")]
    Injected(Fault),

    #[error("entity {0} already exists")]
    EntityExists(Uuid),
}

#[derive(Debug, Default)]
struct Shared {
    calls: Mutex<Vec<Call>>,
    faults: Mutex<HashSet<Fault>>,
    store: RwLock<HashMap<Uuid, Beverage>>,
}

impl Shared {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, fault: Fault) -> Result<(), MemoryError> {
        if self.faults.lock().contains(&fault) {
            Err(MemoryError::Injected(fault))
        } else {
            Ok(())
        }
    }
}

/// In-memory persistence provider that records every call it receives.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    shared: Arc<Shared>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fault: Fault) {
        self.shared.faults.lock().insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        self.shared.faults.lock().remove(&fault);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.shared.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.lock().clear();
    }

    /// Number of committed entities.
    pub fn stored(&self) -> usize {
        self.shared.store.read().len()
    }

    /// A factory built directly, bypassing `create_factory`.
    pub fn factory(&self) -> MemoryFactory {
        MemoryFactory {
            shared: Arc::clone(&self.shared),
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl PersistenceProvider for MemoryProvider {
    type Factory = MemoryFactory;

    async fn create_factory(&self, unit: &str) -> ProviderResult<Self::Factory> {
        self.shared.record(Call::CreateFactory(unit.to_string()));
        self.shared.check(Fault::CreateFactory)?;
        Ok(self.factory())
    }
}

#[derive(Debug)]
pub struct MemoryFactory {
    shared: Arc<Shared>,
    open: AtomicBool,
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    type Session = MemorySession;

    async fn create_session(&self) -> ProviderResult<Self::Session> {
        self.shared.record(Call::CreateSession);
        // Opening a connection suspends, as real I/O would.
        tokio::task::yield_now().await;
        self.shared.check(Fault::CreateSession)?;
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            active: false,
            isolation: IsolationLevel::ReadCommitted,
            pending: HashMap::new(),
        })
    }

    async fn close(&self) -> ProviderResult<()> {
        self.shared.record(Call::CloseFactory);
        self.open.store(false, Ordering::SeqCst);
        self.shared.check(Fault::CloseFactory)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Session over the shared store. Writes stay pending until commit.
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    active: bool,
    isolation: IsolationLevel,
    pending: HashMap<Uuid, Option<Beverage>>,
}

impl MemorySession {
    fn visible(&self, id: &Uuid) -> Option<Beverage> {
        match self.pending.get(id) {
            Some(entry) => entry.clone(),
            None => self.shared.store.read().get(id).cloned(),
        }
    }

    pub fn persist(&mut self, beverage: Beverage) -> Result<(), MemoryError> {
        if self.visible(&beverage.id).is_some() {
            return Err(MemoryError::EntityExists(beverage.id));
        }
        self.pending.insert(beverage.id, Some(beverage));
        Ok(())
    }

    pub fn find(&self, id: Uuid) -> Option<Beverage> {
        self.visible(&id)
    }

    pub fn contains(&self, beverage: &Beverage) -> bool {
        self.visible(&beverage.id).is_some()
    }

    pub fn merge(&mut self, beverage: Beverage) -> Beverage {
        self.pending.insert(beverage.id, Some(beverage.clone()));
        beverage
    }

    /// Removing an entity that is not present is a no-op.
    pub fn remove(&mut self, beverage: &Beverage) {
        if self.visible(&beverage.id).is_some() {
            self.pending.insert(beverage.id, None);
        }
    }

    pub fn count(&self) -> usize {
        let store = self.shared.store.read();
        let mut ids: HashSet<&Uuid> = store.keys().collect();
        for (id, entry) in &self.pending {
            match entry {
                Some(_) => ids.insert(id),
                None => ids.remove(id),
            };
        }
        ids.len()
    }
}

#[async_trait]
impl ProviderSession for MemorySession {
    fn is_active(&self) -> bool {
        self.active
    }

    async fn begin(&mut self) -> ProviderResult<()> {
        self.shared.record(Call::Begin);
        self.shared.check(Fault::Begin)?;
        self.active = true;
        Ok(())
    }

    async fn commit(&mut self) -> ProviderResult<()> {
        self.shared.record(Call::Commit);
        self.active = false;
        if let Err(e) = self.shared.check(Fault::Commit) {
            self.pending.clear();
            return Err(e.into());
        }
        let mut store = self.shared.store.write();
        for (id, entry) in self.pending.drain() {
            match entry {
                Some(beverage) => store.insert(id, beverage),
                None => store.remove(&id),
            };
        }
        Ok(())
    }

    async fn rollback(&mut self) -> ProviderResult<()> {
        self.shared.record(Call::Rollback);
        self.active = false;
        self.pending.clear();
        self.shared.check(Fault::Rollback)?;
        Ok(())
    }

    async fn isolation_level(&mut self) -> ProviderResult<IsolationLevel> {
        self.shared.record(Call::GetIsolation);
        self.shared.check(Fault::Isolation)?;
        Ok(self.isolation)
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> ProviderResult<()> {
        self.shared.record(Call::SetIsolation(level));
        self.shared.check(Fault::Isolation)?;
        self.isolation = level;
        Ok(())
    }

    async fn close(&mut self) -> ProviderResult<()> {
        self.shared.record(Call::CloseSession);
        self.active = false;
        self.pending.clear();
        self.shared.check(Fault::CloseSession)?;
        Ok(())
    }
}
