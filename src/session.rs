use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::provider::{IsolationLevel, ProviderSession};
use crate::{PersistenceError, Result};

/// SessionHandle wraps one provider session bound to a single caller.
///
/// The handle is shared between the persistence manager and the code running
/// the unit of work; once closed, every further operation fails with
/// [`PersistenceError::Closed`].
#[derive(Debug)]
pub struct SessionHandle<S> {
    unit: String,
    session: Mutex<Option<S>>,
}

impl<S: ProviderSession> SessionHandle<S> {
    pub(crate) fn new(unit: impl Into<String>, session: S) -> Self {
        Self {
            unit: unit.into(),
            session: Mutex::new(Some(session)),
        }
    }

    /// Persistence unit this handle's session belongs to.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Locks the provider session for direct use (queries, entity operations).
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, S>> {
        MutexGuard::try_map(self.session.lock().await, |session| session.as_mut())
            .map_err(|_| self.closed())
    }

    pub async fn is_open(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn is_active(&self) -> Result<bool> {
        Ok(self.lock().await?.is_active())
    }

    fn closed(&self) -> PersistenceError {
        PersistenceError::closed(&self.unit)
    }

    /// Begins a transaction unless one is already active.
    pub async fn begin(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed())?;
        if session.is_active() {
            return Ok(());
        }
        session.begin().await.map_err(PersistenceError::provider)
    }

    /// Commits the active transaction; does nothing when none is active.
    pub async fn commit(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed())?;
        if !session.is_active() {
            return Ok(());
        }
        session.commit().await.map_err(PersistenceError::provider)
    }

    /// Rolls back the active transaction; does nothing when none is active.
    pub async fn rollback(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed())?;
        if !session.is_active() {
            return Ok(());
        }
        session.rollback().await.map_err(PersistenceError::provider)
    }

    pub async fn isolation_level(&self) -> Result<IsolationLevel> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed())?;
        session
            .isolation_level()
            .await
            .map_err(PersistenceError::isolation)
    }

    pub async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed())?;
        session
            .set_isolation_level(level)
            .await
            .map_err(PersistenceError::isolation)
    }

    /// Closes the provider session. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        // Take the session first so the handle reads as closed even if the
        // provider fails to release it.
        let session = self.session.lock().await.take();
        match session {
            Some(mut session) => session.close().await.map_err(PersistenceError::provider),
            None => Ok(()),
        }
    }
}
