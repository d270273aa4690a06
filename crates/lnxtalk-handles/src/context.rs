//! Per-remote-object handle context

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use lnxtalk_core::TaskQueue;

/// A remote object handle
pub type Handle = u64;

/// The namespace a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleType {
    Contact,
    Room,
    List,
    Group,
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleType::Contact => "contact",
            HandleType::Room => "room",
            HandleType::List => "list",
            HandleType::Group => "group",
        };
        f.write_str(name)
    }
}

/// The boundary through which batched releases leave the context
///
/// Implementations are fire-and-forget: they spawn the actual remote call
/// and log its failure themselves, since by the time a release is issued
/// there is no caller left to report to.
pub trait HandleReleaser: Send + Sync {
    fn release_handles(&self, handle_type: HandleType, handles: Vec<Handle>);
}

#[derive(Default)]
struct TypeState {
    /// Local reference counts of live handles
    refcounts: HashMap<Handle, u32>,
    /// Handles whose last reference was dropped, awaiting a batched release
    to_release: BTreeSet<Handle>,
    /// Handle requests currently in flight; releases are held back while
    /// non-zero because a response may resurrect a pending handle
    requests_in_flight: u32,
    release_scheduled: bool,
}

// ============================================================================
// HandleContext
// ============================================================================

/// Shared handle reference counts for one remote object
///
/// A handle is either live (in `refcounts`) or pending release (in
/// `to_release`), never both. Sweeps run from the shared [`TaskQueue`], so
/// an unref never issues a remote call synchronously.
pub struct HandleContext {
    releaser: Arc<dyn HandleReleaser>,
    queue: TaskQueue,
    types: Mutex<HashMap<HandleType, TypeState>>,
}

impl HandleContext {
    pub fn new(releaser: Arc<dyn HandleReleaser>, queue: TaskQueue) -> Arc<Self> {
        Arc::new(Self {
            releaser,
            queue,
            types: Mutex::new(HashMap::new()),
        })
    }

    /// Adds a local reference to a handle
    ///
    /// A handle pending release is resurrected instead of double-counted.
    pub fn ref_handle(self: &Arc<Self>, handle_type: HandleType, handle: Handle) {
        let mut types = self.types.lock().expect("handle context lock poisoned");
        let state = types.entry(handle_type).or_default();
        if state.to_release.remove(&handle) {
            debug!(%handle_type, handle, "Resurrecting handle pending release");
        }
        *state.refcounts.entry(handle).or_insert(0) += 1;
    }

    /// Drops a local reference to a handle
    ///
    /// The last reference moves the handle to the to-release set and
    /// schedules a deferred sweep, unless a request is in flight (the sweep
    /// is then scheduled when the last request lands).
    pub fn unref_handle(self: &Arc<Self>, handle_type: HandleType, handle: Handle) {
        let mut schedule = false;
        {
            let mut types = self.types.lock().expect("handle context lock poisoned");
            let state = types.entry(handle_type).or_default();
            let Some(count) = state.refcounts.get_mut(&handle) else {
                warn!(%handle_type, handle, "Unref of a handle with no local references");
                return;
            };
            *count -= 1;
            if *count == 0 {
                state.refcounts.remove(&handle);
                state.to_release.insert(handle);
                if !state.release_scheduled && state.requests_in_flight == 0 {
                    state.release_scheduled = true;
                    schedule = true;
                }
            }
        }
        if schedule {
            self.schedule_sweep(handle_type);
        }
    }

    /// Records a handle request going out for this type
    ///
    /// Releases for the type are held back until every request has landed.
    pub fn request_started(&self, handle_type: HandleType) {
        let mut types = self.types.lock().expect("handle context lock poisoned");
        types.entry(handle_type).or_default().requests_in_flight += 1;
    }

    /// Records a handle request for this type landing (success or failure)
    pub fn request_landed(self: &Arc<Self>, handle_type: HandleType) {
        let mut schedule = false;
        {
            let mut types = self.types.lock().expect("handle context lock poisoned");
            let state = types.entry(handle_type).or_default();
            if state.requests_in_flight == 0 {
                warn!(%handle_type, "Handle request landed with none recorded in flight");
                return;
            }
            state.requests_in_flight -= 1;
            if state.requests_in_flight == 0
                && !state.to_release.is_empty()
                && !state.release_scheduled
            {
                state.release_scheduled = true;
                schedule = true;
            }
        }
        if schedule {
            self.schedule_sweep(handle_type);
        }
    }

    /// True when no handle of this type is live or pending release
    pub fn is_empty(&self, handle_type: HandleType) -> bool {
        let types = self.types.lock().expect("handle context lock poisoned");
        types
            .get(&handle_type)
            .map(|state| state.refcounts.is_empty() && state.to_release.is_empty())
            .unwrap_or(true)
    }

    fn schedule_sweep(self: &Arc<Self>, handle_type: HandleType) {
        let weak = Arc::downgrade(self);
        self.queue.push(move || {
            if let Some(context) = Weak::upgrade(&weak) {
                context.release_sweep(handle_type);
            }
        });
    }

    /// One deferred pass releasing everything pending for a type
    fn release_sweep(self: &Arc<Self>, handle_type: HandleType) {
        let handles;
        {
            let mut types = self.types.lock().expect("handle context lock poisoned");
            let state = types.entry(handle_type).or_default();
            state.release_scheduled = false;

            // A request started after the sweep was scheduled; its landing
            // will schedule a fresh one
            if state.requests_in_flight > 0 {
                debug!(%handle_type, "Deferring handle release sweep: requests in flight");
                return;
            }
            // Everything pending was resurrected in the meantime
            if state.to_release.is_empty() {
                return;
            }
            handles = std::mem::take(&mut state.to_release).into_iter().collect::<Vec<_>>();
        }

        debug!(%handle_type, count = handles.len(), "Releasing handles");
        self.releaser.release_handles(handle_type, handles);
    }

    /// Final teardown once no proxy references this context any more
    ///
    /// Best-effort: issues one batched release for the handles still
    /// referenced and one for those pending release, per type.
    pub(crate) fn drain_for_teardown(&self) {
        let mut batches: Vec<(HandleType, Vec<Handle>)> = Vec::new();
        {
            let mut types = self.types.lock().expect("handle context lock poisoned");
            for (handle_type, state) in types.iter_mut() {
                let referenced: Vec<Handle> = std::mem::take(&mut state.refcounts)
                    .into_keys()
                    .collect();
                if !referenced.is_empty() {
                    warn!(
                        %handle_type,
                        count = referenced.len(),
                        "Tearing down handle context with handles still referenced"
                    );
                    batches.push((*handle_type, referenced));
                }
                let pending: Vec<Handle> =
                    std::mem::take(&mut state.to_release).into_iter().collect();
                if !pending.is_empty() {
                    batches.push((*handle_type, pending));
                }
            }
        }
        for (handle_type, handles) in batches {
            self.releaser.release_handles(handle_type, handles);
        }
    }
}

impl fmt::Debug for HandleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleContext").finish_non_exhaustive()
    }
}
