//! Caller identity for session binding.
//!
//! A unit of work runs inside a [`unit_scope`]. Every session handle and
//! isolation stash bound while the scope is alive is keyed by the scope's id
//! and released when the scope is dropped, whether the unit of work finished
//! or was cancelled.
//!
//! Outside any scope the caller is the current tokio task, or the OS thread
//! when no task is running (`block_on`). Nothing releases those bindings
//! automatically: such callers must close their handles themselves.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::thread::{self, ThreadId};
use uuid::Uuid;

/// Identifies who a session handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerId {
    Scope(Uuid),
    Task(tokio::task::Id),
    Thread(ThreadId),
}

/// Identifies one release registered with a scope: (owner id, bound resource id).
pub(crate) type ReleaseKey = (Uuid, Uuid);

type Release = Box<dyn FnOnce() + Send>;

struct UnitScope {
    id: Uuid,
    releases: Mutex<HashMap<ReleaseKey, Release>>,
}

impl UnitScope {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            releases: Mutex::new(HashMap::new()),
        }
    }
}

impl Drop for UnitScope {
    fn drop(&mut self) {
        let releases = std::mem::take(self.releases.get_mut());
        if !releases.is_empty() {
            tracing::trace!(scope = %self.id, count = releases.len(), "Releasing scope bindings");
        }
        for release in releases.into_values() {
            release();
        }
    }
}

tokio::task_local! {
    static UNIT_SCOPE: UnitScope;
}

/// Runs `fut` inside a unit-of-work scope.
///
/// Nested calls reuse the enclosing scope, so nested units of work on the same
/// task share their session handles.
pub async fn unit_scope<F: Future>(fut: F) -> F::Output {
    if in_scope() {
        fut.await
    } else {
        UNIT_SCOPE.scope(UnitScope::new(), fut).await
    }
}

pub fn in_scope() -> bool {
    UNIT_SCOPE.try_with(|_| ()).is_ok()
}

/// The caller the current code runs on behalf of.
pub fn current_caller() -> CallerId {
    if let Ok(id) = UNIT_SCOPE.try_with(|scope| scope.id) {
        return CallerId::Scope(id);
    }
    match tokio::task::try_id() {
        Some(task) => CallerId::Task(task),
        None => CallerId::Thread(thread::current().id()),
    }
}

/// Registers `release` to run when the current scope ends, replacing any
/// release already registered under `key`.
///
/// Returns `false` (and drops `release`) outside a scope.
pub(crate) fn on_scope_exit(key: ReleaseKey, release: impl FnOnce() + Send + 'static) -> bool {
    UNIT_SCOPE
        .try_with(|scope| {
            scope.releases.lock().insert(key, Box::new(release));
        })
        .is_ok()
}

/// Drops the release registered under `key` without running it.
pub(crate) fn cancel_scope_exit(key: &ReleaseKey) {
    let _ = UNIT_SCOPE.try_with(|scope| scope.releases.lock().remove(key));
}

#[cfg(test)]
fn pending_releases() -> usize {
    UNIT_SCOPE
        .try_with(|scope| scope.releases.lock().len())
        .unwrap_or(0)
}
