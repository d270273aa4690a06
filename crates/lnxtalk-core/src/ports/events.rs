//! Change-notification boundary (driven port, push direction)
//!
//! The transport delivers asynchronous push events to the owning proxy.
//! Proxies expose a `handle_event` entry point; the transport adapter (or a
//! test) feeds events into it, typically from an `mpsc` pump.

use crate::domain::status::{ObjectStatus, StatusReason};
use crate::ports::transport::PropertyMap;

/// An asynchronous push event from the transport
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    /// The remote object's status changed
    StatusChanged {
        /// The new status
        status: ObjectStatus,
        /// Why it changed
        reason: StatusReason,
    },
    /// A batch of remote properties changed
    PropertiesChanged(PropertyMap),
    /// The remote object is gone; the proxy must be invalidated
    Invalidated {
        /// Symbolic error name
        name: String,
        /// Human-readable description
        message: String,
    },
}
