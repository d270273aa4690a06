//! LNXTalk Readiness - the feature-gated introspection engine
//!
//! Every LNXTalk proxy mirrors a remote object whose cached state is
//! populated asynchronously. This crate provides the machinery all proxy
//! types share:
//!
//! - [`graph`] - a declarative, validated table of features, their
//!   dependencies and their introspection procedures
//! - [`engine`] - the readiness engine: walks the feature graph for the
//!   current object status, runs introspection procedures at most once per
//!   status activation, and resolves `become_ready` futures
//! - [`pending`] - the future returned by `become_ready`
//! - [`controller`] - the status-transition controller bridging raw
//!   status-change notifications into engine calls
//!
//! The engine owns no I/O: introspection procedures are closures supplied by
//! the proxy, and all deferral runs through the shared
//! [`TaskQueue`](lnxtalk_core::TaskQueue), which keeps the whole state
//! machine deterministic under test.

pub mod controller;
pub mod engine;
pub mod graph;
pub mod pending;

pub use controller::{StatusAction, StatusController};
pub use engine::{CompletionKind, IntrospectToken, ReadinessEngine};
pub use graph::{FeatureGraph, FeatureGraphBuilder, GraphError, Introspectable, IntrospectFn};
pub use pending::PendingReady;
