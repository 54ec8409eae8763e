//! Persistence of the agent session id across restarts.
//!
//! [`SessionIdentity`] is what the rest of the client talks to. It keeps the
//! id in memory and writes through to a [`SessionIdentityStore`]; when the
//! backend fails it logs once and carries on memory-only.

use parking_lot::Mutex;
use tracing::{debug, warn};

use agentflow_core::SessionId;

use crate::error::StoreError;
use crate::kv::KvRepo;

/// Key-value persistence of one session id under a fixed key.
pub trait SessionIdentityStore: Send + Sync {
    fn get(&self) -> Result<Option<SessionId>, StoreError>;
    fn set(&self, id: &SessionId) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    id: Mutex<Option<SessionId>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionIdentityStore for MemorySessionStore {
    fn get(&self) -> Result<Option<SessionId>, StoreError> {
        Ok(self.id.lock().clone())
    }

    fn set(&self, id: &SessionId) -> Result<(), StoreError> {
        *self.id.lock() = Some(id.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.id.lock() = None;
        Ok(())
    }
}

/// Stores the id in the `kv` table under `namespace`.
pub struct SqliteSessionStore {
    kv: KvRepo,
    namespace: String,
}

impl SqliteSessionStore {
    pub fn new(kv: KvRepo, namespace: impl Into<String>) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
        }
    }
}

impl SessionIdentityStore for SqliteSessionStore {
    fn get(&self) -> Result<Option<SessionId>, StoreError> {
        Ok(self
            .kv
            .get(&self.namespace)?
            .filter(|v| !v.is_empty())
            .map(SessionId::from_raw))
    }

    fn set(&self, id: &SessionId) -> Result<(), StoreError> {
        self.kv.put(&self.namespace, id.as_str())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.kv.delete(&self.namespace).map(|_| ())
    }
}

struct Inner {
    current: Option<SessionId>,
    backend: Option<Box<dyn SessionIdentityStore>>,
}

/// Session identity with write-through persistence that degrades to
/// memory-only on storage failure. Never returns an error.
pub struct SessionIdentity {
    inner: Mutex<Inner>,
}

impl SessionIdentity {
    /// Load the persisted id, if any.
    pub fn new(backend: Box<dyn SessionIdentityStore>) -> Self {
        let (current, backend) = match backend.get() {
            Ok(current) => (current, Some(backend)),
            Err(e) => {
                warn!(error = %e, "session store unavailable, keeping session id in memory");
                (None, None)
            }
        };
        debug!(session_id = ?current, "session identity loaded");
        Self {
            inner: Mutex::new(Inner { current, backend }),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                backend: None,
            }),
        }
    }

    pub fn get(&self) -> Option<SessionId> {
        self.inner.lock().current.clone()
    }

    /// Replace the held id. Returns true when the value changed.
    pub fn set(&self, id: &SessionId) -> bool {
        let mut inner = self.inner.lock();
        if inner.current.as_ref() == Some(id) {
            return false;
        }
        inner.current = Some(id.clone());
        let result = inner.backend.as_ref().map(|b| b.set(id));
        if let Some(Err(e)) = result {
            warn!(error = %e, session_id = %id, "failed to persist session id, continuing in memory");
            inner.backend = None;
        }
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.current = None;
        let result = inner.backend.as_ref().map(|b| b.clear());
        if let Some(Err(e)) = result {
            warn!(error = %e, "failed to clear persisted session id, continuing in memory");
            inner.backend = None;
        }
    }

    /// False once the backend has failed (or there never was one).
    pub fn is_persistent(&self) -> bool {
        self.inner.lock().backend.is_some()
    }
}
