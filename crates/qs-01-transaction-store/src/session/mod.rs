//! # Session Scope Manager
//!
//! Binds exactly one storage session to each logical unit of work.
//!
//! ```text
//! enter_scope() ──→ ScopeGuard ──context()──→ ScopeContext ──session()──→ session
//!                       │                                       (opened lazily,
//!                  release()/Drop                                 once per scope)
//!                       ↓
//!             unbind + close session
//! ```
//!
//! The scope id is carried explicitly in a [`ScopeContext`] handed down the
//! call chain. The manager's registry maps it to the scope's session, so
//! concurrent units of work never share a session, and a scope that has been
//! released can no longer resolve one.


use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::ports::outbound::{StorageEngine, StorageSession};

/// Key of one active scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh UUID v4 id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct ScopeSlot {
    session: OnceCell<Arc<dyn StorageSession>>,
}

type Registry = Arc<Mutex<HashMap<ScopeId, Arc<ScopeSlot>>>>;

/// Owns the storage engine and the registry of active scopes.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct SessionManager {
    engine: Arc<dyn StorageEngine>,
    scopes: Registry,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            scopes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Bind a new scope. A random id is generated when none is supplied.
    ///
    /// ## Errors
    ///
    /// - `ScopeAlreadyActive`: `scope_id` is already bound
    pub fn enter_scope(&self, scope_id: Option<ScopeId>) -> Result<ScopeGuard, StoreError> {
        let id = scope_id.unwrap_or_else(ScopeId::random);
        {
            let mut scopes = self.scopes.lock();
            if scopes.contains_key(&id) {
                return Err(StoreError::ScopeAlreadyActive {
                    scope: id.to_string(),
                });
            }
            scopes.insert(id.clone(), Arc::new(ScopeSlot::default()));
        }
        debug!(db_session = %id, "Entered session scope");
        Ok(ScopeGuard {
            manager: self.clone(),
            id,
            released: false,
        })
    }

    /// The session bound to `scope`, opening it on first use.
    ///
    /// ## Errors
    ///
    /// - `NoActiveScope`: the scope was never entered or is already released
    pub async fn current_session(
        &self,
        scope: &ScopeId,
    ) -> Result<Arc<dyn StorageSession>, StoreError> {
        let slot = self
            .scopes
            .lock()
            .get(scope)
            .cloned()
            .ok_or_else(|| no_active_scope(scope))?;

        let session = slot
            .session
            .get_or_try_init(|| async {
                let session = self.engine.open_session().await?;
                debug!(db_session = %scope, session = %session.id(), "Opened session");
                Ok::<_, StoreError>(session)
            })
            .await?
            .clone();

        // Released while the session was opening; the slot's last reference
        // goes with `slot` and the session with it.
        if !self.is_active(scope) {
            return Err(no_active_scope(scope));
        }
        Ok(session)
    }

    #[must_use]
    pub fn is_active(&self, scope: &ScopeId) -> bool {
        self.scopes.lock().contains_key(scope)
    }

    /// Number of currently bound scopes.
    #[must_use]
    pub fn active_scopes(&self) -> usize {
        self.scopes.lock().len()
    }

    /// Run `body` inside a fresh scope, releasing it on every exit path.
    ///
    /// The body's result is returned as is. A failure to close the session
    /// is reported only when the body itself succeeded.
    pub async fn run_in_scope<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(ScopeContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        let mut guard = self.enter_scope(None)?;
        let result = body(guard.context()).await;
        match (result, guard.release().await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(db_session = %guard.id(), error = %close_err, "Failed to close session after error");
                Err(err)
            }
        }
    }

    fn unbind(&self, scope: &ScopeId) -> Option<Arc<ScopeSlot>> {
        self.scopes.lock().remove(scope)
    }
}

fn no_active_scope(scope: &ScopeId) -> StoreError {
    StoreError::NoActiveScope {
        scope: scope.to_string(),
    }
}

/// RAII handle of an active scope.
///
/// Dropping the guard unbinds the scope immediately and schedules the
/// session close on the runtime; call [`release`](Self::release) to await it.
pub struct ScopeGuard {
    manager: SessionManager,
    id: ScopeId,
    released: bool,
}

impl ScopeGuard {
    #[must_use]
    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    #[must_use]
    pub fn context(&self) -> ScopeContext {
        ScopeContext {
            manager: self.manager.clone(),
            id: self.id.clone(),
        }
    }

    pub async fn session(&self) -> Result<Arc<dyn StorageSession>, StoreError> {
        self.manager.current_session(&self.id).await
    }

    /// Unbind the scope and close its session, rolling back uncommitted
    /// work. Idempotent.
    pub async fn release(&mut self) -> Result<(), StoreError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let opened = self
            .manager
            .unbind(&self.id)
            .and_then(|slot| slot.session.get().cloned());
        if let Some(session) = opened {
            session.close().await?;
        }
        debug!(db_session = %self.id, "Released session scope");
        Ok(())
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let Some(session) = self
            .manager
            .unbind(&self.id)
            .and_then(|slot| slot.session.get().cloned())
        else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let id = self.id.clone();
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(db_session = %id, error = %e, "Failed to close abandoned session");
                    }
                });
            }
            // No runtime left: the session's own Drop releases the connection.
            Err(_) => drop(session),
        }
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

/// Cloneable handle passed down the call chain of one unit of work.
#[derive(Clone)]
pub struct ScopeContext {
    manager: SessionManager,
    id: ScopeId,
}

impl ScopeContext {
    #[must_use]
    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    /// The scope's session; the same handle for every call in the scope.
    pub async fn session(&self) -> Result<Arc<dyn StorageSession>, StoreError> {
        self.manager.current_session(&self.id).await
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.manager.is_active(&self.id)
    }
}

impl fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeContext").field("id", &self.id).finish()
    }
}
