//! Readiness engine
//!
//! The [`ReadinessEngine`] tracks, per proxy instance, which features have
//! been requested, which are satisfied, which are permanently missing, and
//! which are mid-introspection, for the current status of the underlying
//! remote object.
//!
//! ## Iteration model
//!
//! All bookkeeping lives behind a single mutex. Public entry points lock,
//! mutate, unlock, and defer the follow-up pass through the shared
//! [`TaskQueue`]; the lock is never held while an introspection procedure or
//! an external callback runs. Each pass of [`iterate`](ReadinessEngine::iterate):
//!
//! 1. propagates failures to pending features whose dependencies are missing,
//! 2. resolves `become_ready` operations (failing fast on the first missing
//!    requested feature),
//! 3. fires `status_ready` once every requested feature has settled,
//! 4. starts every pending feature whose dependencies are satisfied;
//!    independent features introspect concurrently.
//!
//! ## Status changes and staleness
//!
//! Procedures are tagged with the epoch of the status activation that
//! started them. A status change arriving while procedures are in flight is
//! buffered; the in-flight results are discarded as they land, and the new
//! status is applied once the last one does. Completions carrying a stale
//! epoch are ignored outright.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use lnxtalk_core::{Feature, Features, ObjectStatus, RpcError, TaskQueue};

use crate::graph::{FeatureGraph, IntrospectFn};
use crate::pending::PendingReady;

// ============================================================================
// CompletionKind
// ============================================================================

/// How a satisfied feature completed
///
/// `Forced` marks the short-circuit paths: a feature satisfied without its
/// procedure doing any work, either because the feature is not applicable to
/// the current status or because the condition it introspects already held.
/// Tests use this to tell "introspected normally" from "short-circuited".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// The introspection procedure ran and reported success
    Normal,
    /// The feature was satisfied without running its procedure to completion
    Forced,
}

// ============================================================================
// IntrospectToken
// ============================================================================

/// Single-use completion handle passed to an introspection procedure
///
/// Carries the epoch of the status activation that started the procedure;
/// a completion whose epoch no longer matches the in-flight record is
/// silently discarded.
pub struct IntrospectToken {
    engine: Weak<ReadinessEngine>,
    feature: Feature,
    epoch: u64,
}

impl IntrospectToken {
    /// The feature this token belongs to
    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Reports the procedure's outcome
    pub fn complete(self, result: Result<(), RpcError>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.set_introspect_completed(self.feature, self.epoch, result, CompletionKind::Normal);
        }
    }

    /// Marks the feature satisfied because its condition already holds,
    /// without the procedure having done any work
    pub fn complete_forced(self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.set_introspect_completed(self.feature, self.epoch, Ok(()), CompletionKind::Forced);
        }
    }
}

impl std::fmt::Debug for IntrospectToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectToken")
            .field("feature", &self.feature)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Engine state
// ============================================================================

struct PendingOp {
    requested: Features,
    tx: oneshot::Sender<Result<(), RpcError>>,
}

struct EngineState {
    graph: FeatureGraph,
    current_status: ObjectStatus,
    /// Bumped on every applied status change; tags in-flight procedures
    epoch: u64,
    /// None until the remote object's advertised interfaces are known
    interfaces: Option<Vec<String>>,
    /// Union of all features ever requested (monotonic)
    requested: Features,
    /// Features that completed introspection successfully for the current
    /// status, with how they completed
    satisfied: BTreeMap<Feature, CompletionKind>,
    /// Requested features that failed or turned out not applicable
    missing: BTreeMap<Feature, RpcError>,
    /// Requested, not yet settled, not in flight
    pending: Features,
    /// Features whose procedure is running, tagged with their start epoch
    in_flight: BTreeMap<Feature, u64>,
    operations: Vec<PendingOp>,
    /// A status change that arrived while procedures were in flight
    pending_status_change: Option<ObjectStatus>,
    /// Set once, permanently, on fatal invalidation
    invalidation: Option<(String, String)>,
}

type StatusReadyFn = Box<dyn Fn(ObjectStatus) + Send + Sync>;

// ============================================================================
// ReadinessEngine
// ============================================================================

/// The per-proxy readiness state machine
pub struct ReadinessEngine {
    state: Mutex<EngineState>,
    queue: TaskQueue,
    on_status_ready: Mutex<Option<StatusReadyFn>>,
}

impl ReadinessEngine {
    /// Creates an engine for a proxy with the given feature graph
    pub fn new(graph: FeatureGraph, initial_status: ObjectStatus, queue: TaskQueue) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState {
                graph,
                current_status: initial_status,
                epoch: 0,
                interfaces: None,
                requested: Features::new(),
                satisfied: BTreeMap::new(),
                missing: BTreeMap::new(),
                pending: Features::new(),
                in_flight: BTreeMap::new(),
                operations: Vec::new(),
                pending_status_change: None,
                invalidation: None,
            }),
            queue,
            on_status_ready: Mutex::new(None),
        })
    }

    /// Installs the callback fired when every requested feature has settled
    /// for a status (used by the status-transition controller)
    pub fn set_on_status_ready(&self, callback: impl Fn(ObjectStatus) + Send + Sync + 'static) {
        *self
            .on_status_ready
            .lock()
            .expect("engine callback lock poisoned") = Some(Box::new(callback));
    }

    // ========================================================================
    // become_ready
    // ========================================================================

    /// Requests that a set of features become ready
    ///
    /// Core features and the recursive dependency closure of the request are
    /// implicitly included. The returned future resolves once every
    /// requested feature is satisfied for the current status, or fails with
    /// the error of the first requested feature that became permanently
    /// missing. Procedures run at most once per status activation no matter
    /// how many concurrent callers requested them.
    pub fn become_ready(self: &Arc<Self>, features: Features) -> PendingReady {
        let (tx, rx) = oneshot::channel();
        let mut op_requested = features.clone();

        {
            let mut st = self.state.lock().expect("engine state lock poisoned");

            if let Some((name, message)) = &st.invalidation {
                let _ = tx.send(Err(RpcError::new(name.clone(), message.clone())));
                return PendingReady::new(op_requested, rx);
            }

            if let Some(unsupported) = features.iter().find(|f| !st.graph.supports(**f)) {
                warn!(
                    feature = %unsupported,
                    "become_ready called with a feature not in this proxy's graph"
                );
                let _ = tx.send(Err(RpcError::invalid_argument(
                    "Requested features contain an unsupported feature",
                )));
                return PendingReady::new(op_requested, rx);
            }

            op_requested.extend(st.graph.core_features().iter().copied());

            // The dependency closure is requested too, so a status change
            // can re-pend everything without recomputing it
            let mut closure = op_requested.clone();
            for feature in &op_requested {
                closure.extend(st.graph.deps_for(*feature));
            }

            st.requested.extend(closure.iter().copied());
            for feature in closure {
                if !st.satisfied.contains_key(&feature) && !st.missing.contains_key(&feature) {
                    st.pending.insert(feature);
                }
            }

            st.operations.push(PendingOp {
                requested: op_requested.clone(),
                tx,
            });
        }

        self.schedule_iterate();
        PendingReady::new(op_requested, rx)
    }

    // ========================================================================
    // Status handling
    // ========================================================================

    /// Applies a status change, re-evaluating which features apply
    ///
    /// Completed features still applicable to the new status keep their
    /// outcome; everything else is cleared for fresh evaluation. If
    /// procedures for the old status are still in flight the change is
    /// buffered and applied once the last of them lands (their results are
    /// discarded).
    pub fn set_current_status(self: &Arc<Self>, new_status: ObjectStatus) {
        let mut fire_ready = None;
        let mut schedule = false;

        {
            let mut st = self.state.lock().expect("engine state lock poisoned");

            if st.invalidation.is_some() || st.current_status == new_status {
                return;
            }

            if !st.in_flight.is_empty() {
                debug!(
                    status = %new_status,
                    "Status changed while introspection was running - deferring"
                );
                st.pending_status_change = Some(new_status);
                return;
            }

            let old_status = st.current_status;
            st.current_status = new_status;
            st.epoch += 1;

            // Retain policy: an outcome survives the transition only if the
            // feature was genuinely evaluated under the old status AND still
            // applies to the new one. Anything else (including features that
            // were no-op satisfied because the old status did not apply to
            // them) is cleared for fresh evaluation.
            let retain =
                |graph: &FeatureGraph, feature: Feature| {
                    Self::applicable(graph, feature, old_status)
                        && Self::applicable(graph, feature, new_status)
                };
            let drop_satisfied: Vec<Feature> = st
                .satisfied
                .keys()
                .filter(|f| !retain(&st.graph, **f))
                .copied()
                .collect();
            for feature in drop_satisfied {
                st.satisfied.remove(&feature);
            }
            let drop_missing: Vec<Feature> = st
                .missing
                .keys()
                .filter(|f| !retain(&st.graph, **f))
                .copied()
                .collect();
            for feature in drop_missing {
                st.missing.remove(&feature);
            }

            // Everything requested but unsettled becomes pending again
            st.pending = st
                .requested
                .iter()
                .filter(|f| !st.satisfied.contains_key(f) && !st.missing.contains_key(f))
                .copied()
                .collect();

            if st.graph.supported_statuses().contains(&new_status) {
                schedule = true;
            } else {
                fire_ready = Some(new_status);
            }
        }

        if schedule {
            self.schedule_iterate();
        }
        if let Some(status) = fire_ready {
            self.emit_status_ready(status);
        }
    }

    /// Forces the current status without restarting introspection
    ///
    /// Used when the status was unknown at construction and has just been
    /// learned during the first introspection pass; in-flight procedures
    /// keep their epoch and land normally.
    pub fn force_current_status(&self, status: ObjectStatus) {
        let mut st = self.state.lock().expect("engine state lock poisoned");
        debug!(%status, "Forcing current status");
        st.current_status = status;
    }

    /// Records the remote object's advertised interfaces
    ///
    /// Unblocks deferred features that depend on interfaces.
    pub fn set_interfaces(self: &Arc<Self>, interfaces: Vec<String>) {
        {
            let mut st = self.state.lock().expect("engine state lock poisoned");
            debug!(?interfaces, "Got advertised interfaces");
            st.interfaces = Some(interfaces);
        }
        self.schedule_iterate();
    }

    // ========================================================================
    // Completion
    // ========================================================================

    fn set_introspect_completed(
        self: &Arc<Self>,
        feature: Feature,
        epoch: u64,
        result: Result<(), RpcError>,
        kind: CompletionKind,
    ) {
        let mut apply_status = None;

        {
            let mut st = self.state.lock().expect("engine state lock poisoned");

            if st.invalidation.is_some() {
                return;
            }

            match st.in_flight.get(&feature) {
                Some(&tagged) if tagged == epoch => {}
                _ => {
                    debug!(%feature, epoch, "Discarding stale introspection result");
                    return;
                }
            }
            st.in_flight.remove(&feature);

            if let Some(next) = st.pending_status_change {
                debug!(
                    %feature,
                    "Introspection completed while a status change is pending - ignoring result"
                );
                if st.in_flight.is_empty() {
                    st.pending_status_change = None;
                    apply_status = Some(next);
                }
            } else {
                match result {
                    Ok(()) => {
                        debug!(%feature, ?kind, "Feature introspection completed");
                        st.satisfied.insert(feature, kind);
                    }
                    Err(err) => {
                        debug!(%feature, error = %err, "Feature introspection failed");
                        st.missing.insert(feature, err);
                    }
                }
                st.pending.remove(&feature);
            }
        }

        if let Some(status) = apply_status {
            self.set_current_status(status);
        } else {
            self.schedule_iterate();
        }
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    fn iterate(self: &Arc<Self>) {
        let mut resolved: Vec<(oneshot::Sender<Result<(), RpcError>>, Result<(), RpcError>)> =
            Vec::new();
        let mut completions: Vec<(Feature, u64, Result<(), RpcError>, CompletionKind)> = Vec::new();
        let mut launches: Vec<(Feature, IntrospectFn, IntrospectToken)> = Vec::new();
        let mut status_ready = None;

        {
            let mut st = self.state.lock().expect("engine state lock poisoned");

            if st.invalidation.is_some() {
                debug!("Not iterating: the proxy has been invalidated");
                return;
            }
            // While a status change is pending we must not finish
            // operations, claim the status ready, or start new procedures;
            // the settled sets will be re-evaluated for the new status.
            if st.pending_status_change.is_some() {
                debug!("Not iterating: a status change is pending");
                return;
            }

            // Propagate failures to pending reverse-dependencies
            let newly_missing: Vec<Feature> = st
                .pending
                .iter()
                .filter(|f| !st.missing.contains_key(f))
                .filter(|f| {
                    st.graph
                        .deps_for(**f)
                        .iter()
                        .any(|dep| st.missing.contains_key(dep))
                })
                .copied()
                .collect();
            for feature in newly_missing {
                st.missing.insert(
                    feature,
                    RpcError::not_available(
                        "Feature depends on other features that are not available",
                    ),
                );
            }

            // Resolve operations: fail fast on the first missing requested
            // feature, succeed once everything requested is satisfied
            let mut remaining = Vec::new();
            let ops = std::mem::take(&mut st.operations);
            for op in ops {
                if let Some(failed) = op.requested.iter().find(|f| st.missing.contains_key(f)) {
                    let err = st.missing[failed].clone();
                    resolved.push((op.tx, Err(err)));
                } else if op.requested.iter().all(|f| st.satisfied.contains_key(f)) {
                    resolved.push((op.tx, Ok(())));
                } else {
                    remaining.push(op);
                }
            }
            st.operations = remaining;

            let all_settled = st
                .requested
                .iter()
                .all(|f| st.satisfied.contains_key(f) || st.missing.contains_key(f));

            if all_settled {
                status_ready = Some(st.current_status);
            } else {
                let settled: Vec<Feature> = st
                    .pending
                    .iter()
                    .filter(|f| st.satisfied.contains_key(f) || st.missing.contains_key(f))
                    .copied()
                    .collect();
                for feature in settled {
                    st.pending.remove(&feature);
                }

                // Start every pending feature whose dependencies are
                // satisfied; independent features introspect concurrently
                let candidates: Vec<Feature> = st
                    .pending
                    .iter()
                    .filter(|f| !st.in_flight.contains_key(f))
                    .filter(|f| {
                        st.graph
                            .introspectable(**f)
                            .map(|entry| {
                                entry
                                    .depends_on_features
                                    .iter()
                                    .all(|dep| st.satisfied.contains_key(dep))
                            })
                            .unwrap_or(false)
                    })
                    .copied()
                    .collect();

                for feature in candidates {
                    let Some(entry) = st.graph.introspectable(feature) else {
                        continue;
                    };
                    let entry = entry.clone();
                    let epoch = st.epoch;

                    if !entry.applicable_statuses.contains(&st.current_status) {
                        // Nothing to do for this feature in the current
                        // status: no-op satisfy
                        st.in_flight.insert(feature, epoch);
                        completions.push((feature, epoch, Ok(()), CompletionKind::Forced));
                        continue;
                    }

                    if !entry.depends_on_interfaces.is_empty() {
                        match &st.interfaces {
                            // Interface set not known yet: defer
                            None => continue,
                            Some(interfaces) => {
                                if let Some(missing_iface) = entry
                                    .depends_on_interfaces
                                    .iter()
                                    .find(|i| !interfaces.contains(i))
                                {
                                    debug!(
                                        %feature,
                                        interface = %missing_iface,
                                        "Feature depends on an interface the remote object does not advertise"
                                    );
                                    st.in_flight.insert(feature, epoch);
                                    completions.push((
                                        feature,
                                        epoch,
                                        Err(RpcError::not_available(
                                            "Feature depends on interfaces that are not available",
                                        )),
                                        CompletionKind::Normal,
                                    ));
                                    continue;
                                }
                            }
                        }
                    }

                    st.in_flight.insert(feature, epoch);
                    let token = IntrospectToken {
                        engine: Arc::downgrade(self),
                        feature,
                        epoch,
                    };
                    launches.push((feature, entry.introspect.clone(), token));
                }
            }
        }

        for (tx, result) in resolved {
            let _ = tx.send(result);
        }
        if let Some(status) = status_ready {
            self.emit_status_ready(status);
        }
        for (feature, epoch, result, kind) in completions {
            self.set_introspect_completed(feature, epoch, result, kind);
        }
        for (feature, introspect, token) in launches {
            debug!(%feature, "Starting introspection");
            (introspect)(token);
        }
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Permanently invalidates the engine
    ///
    /// Every in-flight and future `become_ready` fails with the given
    /// reason; the settled sets are cleared so accessors report nothing as
    /// ready.
    pub fn invalidate(&self, name: &str, message: &str) {
        let ops;
        {
            let mut st = self.state.lock().expect("engine state lock poisoned");
            if st.invalidation.is_some() {
                return;
            }
            debug!(error = name, message, "Invalidating readiness engine");
            st.invalidation = Some((name.to_string(), message.to_string()));
            st.satisfied.clear();
            st.missing.clear();
            st.pending.clear();
            st.in_flight.clear();
            st.pending_status_change = None;
            ops = std::mem::take(&mut st.operations);
        }
        for op in ops {
            let _ = op.tx.send(Err(RpcError::new(name, message)));
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// True once every given feature is satisfied for the current status
    pub fn is_ready(&self, features: &Features) -> bool {
        let st = self.state.lock().expect("engine state lock poisoned");
        if st.invalidation.is_some() {
            return false;
        }
        features.iter().all(|f| st.satisfied.contains_key(f))
    }

    /// Union of all features ever requested
    pub fn requested_features(&self) -> Features {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.requested.clone()
    }

    /// Features satisfied for the current status
    pub fn actual_features(&self) -> Features {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.satisfied.keys().copied().collect()
    }

    /// Requested features that failed or are not applicable
    pub fn missing_features(&self) -> Features {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.missing.keys().copied().collect()
    }

    /// The recorded error for a missing feature
    pub fn missing_error(&self, feature: Feature) -> Option<RpcError> {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.missing.get(&feature).cloned()
    }

    /// How a satisfied feature completed, if it is satisfied
    pub fn completion_kind(&self, feature: Feature) -> Option<CompletionKind> {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.satisfied.get(&feature).copied()
    }

    /// The engine's view of the object's status
    pub fn current_status(&self) -> ObjectStatus {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.current_status
    }

    /// The advertised interface set, if known
    pub fn interfaces(&self) -> Option<Vec<String>> {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.interfaces.clone()
    }

    /// False once the engine has been invalidated
    pub fn is_valid(&self) -> bool {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.invalidation.is_none()
    }

    /// The invalidation reason, once invalidated
    pub fn invalidation_reason(&self) -> Option<RpcError> {
        let st = self.state.lock().expect("engine state lock poisoned");
        st.invalidation
            .as_ref()
            .map(|(name, message)| RpcError::new(name.clone(), message.clone()))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn applicable(graph: &FeatureGraph, feature: Feature, status: ObjectStatus) -> bool {
        graph
            .introspectable(feature)
            .map(|entry| entry.applicable_statuses.contains(&status))
            .unwrap_or(false)
    }

    fn schedule_iterate(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.queue.push(move || {
            if let Some(engine) = weak.upgrade() {
                engine.iterate();
            }
        });
    }

    fn emit_status_ready(&self, status: ObjectStatus) {
        debug!(%status, "All requested features settled for status");
        let callback = self
            .on_status_ready
            .lock()
            .expect("engine callback lock poisoned");
        if let Some(callback) = callback.as_ref() {
            callback(status);
        }
    }
}
