//! RAII handle references

use std::fmt;
use std::sync::Arc;

use crate::context::{Handle, HandleContext, HandleType};

/// A live reference to a remote handle
///
/// Construction and cloning add a reference in the shared context; dropping
/// removes one. The last drop marks the handle releasable, to go out with
/// the next batched release.
pub struct HandleRef {
    context: Arc<HandleContext>,
    handle_type: HandleType,
    handle: Handle,
}

impl HandleRef {
    pub fn new(context: Arc<HandleContext>, handle_type: HandleType, handle: Handle) -> Self {
        context.ref_handle(handle_type, handle);
        Self {
            context,
            handle_type,
            handle,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn handle_type(&self) -> HandleType {
        self.handle_type
    }
}

impl Clone for HandleRef {
    fn clone(&self) -> Self {
        Self::new(self.context.clone(), self.handle_type, self.handle)
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        self.context.unref_handle(self.handle_type, self.handle);
    }
}

impl PartialEq for HandleRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle_type == other.handle_type && self.handle == other.handle
    }
}

impl Eq for HandleRef {}

impl fmt::Debug for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRef")
            .field("handle_type", &self.handle_type)
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::RecordingReleaser;
    use lnxtalk_core::TaskQueue;

    #[test]
    fn test_release_only_after_last_clone_drops() {
        let queue = TaskQueue::new();
        let releaser = Arc::new(RecordingReleaser::default());
        let context = HandleContext::new(releaser.clone(), queue.clone());

        let first = HandleRef::new(context, HandleType::Contact, 42);
        let second = first.clone();

        drop(first);
        queue.run_pending();
        assert!(releaser.calls.lock().unwrap().is_empty());

        drop(second);
        queue.run_pending();
        assert_eq!(
            *releaser.calls.lock().unwrap(),
            vec![(HandleType::Contact, vec![42])]
        );
    }
}
