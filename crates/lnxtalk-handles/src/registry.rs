//! Handle context registry
//!
//! One [`HandleContext`] per remote object identity, shared by every proxy
//! mirroring that object. The registry is an injected dependency, not a
//! process global: callers that must share handle state share a registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use lnxtalk_core::TaskQueue;

use crate::context::{HandleContext, HandleReleaser};

/// Identity of a remote object: who serves it and where it lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub bus_name: String,
    pub object_path: String,
}

impl ContextKey {
    pub fn new(bus_name: impl Into<String>, object_path: impl Into<String>) -> Self {
        Self {
            bus_name: bus_name.into(),
            object_path: object_path.into(),
        }
    }
}

struct Entry {
    /// Number of proxies holding this context
    refcount: u32,
    context: Arc<HandleContext>,
}

/// Maps remote object identities to their shared handle contexts
#[derive(Default)]
pub struct HandleRegistry {
    contexts: Mutex<HashMap<ContextKey, Entry>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared context for a remote object, creating it on first
    /// acquisition
    ///
    /// The releaser and queue are only used when the context is created;
    /// later acquirers share the existing one. Every `acquire` must be paired
    /// with a [`release`](Self::release).
    pub fn acquire(
        &self,
        key: ContextKey,
        releaser: Arc<dyn HandleReleaser>,
        queue: TaskQueue,
    ) -> Arc<HandleContext> {
        let mut contexts = self.contexts.lock().expect("handle registry lock poisoned");
        let entry = contexts.entry(key.clone()).or_insert_with(|| {
            debug!(bus_name = %key.bus_name, object_path = %key.object_path, "Creating handle context");
            Entry {
                refcount: 0,
                context: HandleContext::new(releaser, queue),
            }
        });
        entry.refcount += 1;
        entry.context.clone()
    }

    /// Drops one proxy's claim on a context
    ///
    /// The last release removes the context and issues a best-effort batched
    /// release of every handle it still tracks.
    pub fn release(&self, key: &ContextKey) {
        let teardown;
        {
            let mut contexts = self.contexts.lock().expect("handle registry lock poisoned");
            let Some(entry) = contexts.get_mut(key) else {
                return;
            };
            entry.refcount -= 1;
            if entry.refcount > 0 {
                return;
            }
            debug!(
                bus_name = %key.bus_name,
                object_path = %key.object_path,
                "Last proxy released its handle context - tearing down"
            );
            teardown = contexts.remove(key).map(|entry| entry.context);
        }
        if let Some(context) = teardown {
            context.drain_for_teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::RecordingReleaser;
    use crate::context::HandleType;

    fn key() -> ContextKey {
        ContextKey::new("org.lnxtalk.Connection.jabber", "/org/lnxtalk/Connection/jabber/a")
    }

    #[test]
    fn test_same_key_shares_a_context() {
        let registry = HandleRegistry::new();
        let queue = TaskQueue::new();
        let releaser = Arc::new(RecordingReleaser::default());

        let first = registry.acquire(key(), releaser.clone(), queue.clone());
        let second = registry.acquire(key(), releaser.clone(), queue.clone());
        assert!(Arc::ptr_eq(&first, &second));

        let other = registry.acquire(
            ContextKey::new("org.lnxtalk.Connection.irc", "/org/lnxtalk/Connection/irc/b"),
            releaser,
            queue,
        );
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_teardown_only_on_last_release() {
        let registry = HandleRegistry::new();
        let queue = TaskQueue::new();
        let releaser = Arc::new(RecordingReleaser::default());

        let ctx = registry.acquire(key(), releaser.clone(), queue.clone());
        let _ctx2 = registry.acquire(key(), releaser.clone(), queue.clone());

        ctx.ref_handle(HandleType::Contact, 11);
        ctx.ref_handle(HandleType::Contact, 12);
        ctx.unref_handle(HandleType::Contact, 12);

        // One proxy gone, the other still owns the context
        registry.release(&key());
        assert!(releaser.calls.lock().unwrap().is_empty());

        // Last one gone: referenced and pending handles both go out
        registry.release(&key());
        let calls = releaser.calls.lock().unwrap();
        assert!(calls.contains(&(HandleType::Contact, vec![11])));
        assert!(calls.contains(&(HandleType::Contact, vec![12])));
    }

    #[test]
    fn test_release_of_unknown_key_is_ignored() {
        let registry = HandleRegistry::new();
        registry.release(&key());
    }
}
