//! Instance Registry: at most one in-flight request per `(workspaceId, threadId)`.
//!
//! Grounded on the gateway's emergency-stop map (a `DashMap<String,
//! CancellationToken>` drained on `/stop`) — same shape, scoped to a single
//! key instead of "everything", and released automatically when the
//! in-flight task finishes rather than by an external drain call.

use std::sync::Arc;

use dashmap::DashMap;
use relaygate_core::model::InstanceKey;
use relaygate_core::GatewayError;
use tokio_util::sync::CancellationToken;

pub struct InstanceRegistry {
    instances: DashMap<InstanceKey, CancellationToken>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Reserve `key` for a new in-flight request. Returns
    /// [`GatewayError::Busy`] if a request for that key is already running —
    /// a duplicate `ai.interaction.chat.process` for the same thread is
    /// rejected, not queued.
    pub fn register(self: &Arc<Self>, key: InstanceKey) -> Result<InstanceGuard, GatewayError> {
        let token = CancellationToken::new();
        match self.instances.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GatewayError::Busy {
                instance_key: key.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(InstanceGuard {
                    registry: self.clone(),
                    key,
                    cancel: token,
                })
            }
        }
    }

    /// Signal cancellation for `key` without waiting for the in-flight task
    /// to observe it. Returns `true` if an instance was found.
    pub fn stop(&self, key: &InstanceKey) -> bool {
        if let Some(entry) = self.instances.get(key) {
            entry.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_active(&self, key: &InstanceKey) -> bool {
        self.instances.contains_key(key)
    }

    /// Cancel every in-flight instance. Called during process shutdown.
    pub fn shutdown(&self) {
        for entry in self.instances.iter() {
            entry.value().cancel();
        }
        self.instances.clear();
    }
}

/// Held by the task driving one request. Removes the instance from the
/// registry when dropped, guaranteeing release on every exit path (success,
/// vendor error, panic, or early return) without a manual `finally`.
pub struct InstanceGuard {
    registry: Arc<InstanceRegistry>,
    key: InstanceKey,
    cancel: CancellationToken,
}

impl InstanceGuard {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.registry.instances.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Arc::new(InstanceRegistry::new());
        let key = InstanceKey::new("ws1", "thread1");
        let _guard = registry.register(key.clone()).unwrap();
        let err = registry.register(key.clone()).unwrap_err();
        assert!(matches!(err, GatewayError::Busy { .. }));
    }

    #[test]
    fn dropping_guard_frees_the_key() {
        let registry = Arc::new(InstanceRegistry::new());
        let key = InstanceKey::new("ws1", "thread1");
        {
            let _guard = registry.register(key.clone()).unwrap();
            assert!(registry.is_active(&key));
        }
        assert!(!registry.is_active(&key));
        assert!(registry.register(key).is_ok());
    }

    #[test]
    fn stop_cancels_the_token_without_removing_the_entry() {
        let registry = Arc::new(InstanceRegistry::new());
        let key = InstanceKey::new("ws1", "thread1");
        let guard = registry.register(key.clone()).unwrap();
        assert!(registry.stop(&key));
        assert!(guard.cancellation_token().is_cancelled());
        assert!(registry.is_active(&key));
    }

    #[test]
    fn stop_on_unknown_key_returns_false() {
        let registry = Arc::new(InstanceRegistry::new());
        assert!(!registry.stop(&InstanceKey::new("ws1", "thread1")));
    }
}
