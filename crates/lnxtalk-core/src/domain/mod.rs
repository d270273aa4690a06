//! Domain types for the proxy stack
//!
//! This module contains the core vocabulary shared by every proxy crate:
//! - Feature identifiers and feature sets
//! - Object status and status-change reasons
//! - The RPC error type and well-known error names

pub mod errors;
pub mod feature;
pub mod status;

// Re-export commonly used types
pub use errors::{names, RpcError};
pub use feature::{Feature, Features, ProxyKind};
pub use status::{ObjectStatus, StatusReason};
