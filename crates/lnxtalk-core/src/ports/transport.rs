//! RPC transport port (driven/secondary port)
//!
//! This module defines the interface proxies use to talk to the remote peer.
//! The production implementation sits on a message bus, but the trait is
//! deliberately bus-agnostic: a call either produces a value or an
//! [`RpcError`], exactly once, and nothing here blocks.
//!
//! ## Design Notes
//!
//! - Property values are modeled as `serde_json::Value`; a property bag is a
//!   name -> value map. Adapters are responsible for converting wire variants.
//! - `get_all` seeds introspection in a single round trip. When the remote
//!   side does not implement it (or answers only partially), proxies fall
//!   back to per-property `get` calls for whatever is missing.
//! - Timeouts are the transport's responsibility; a timed-out call reports an
//!   ordinary [`RpcError`] (conventionally `org.lnxtalk.Error.Timeout`).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::errors::RpcError;

/// A dynamically-typed remote value
pub type Value = serde_json::Value;

/// A property-name to value mapping, as returned by `get_all`
pub type PropertyMap = HashMap<String, Value>;

/// Asynchronous RPC boundary to the remote object a proxy mirrors
///
/// Every method is a single outstanding request completing exactly once.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Invokes a method on the given remote interface
    async fn invoke(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError>;

    /// Reads all properties of the given remote interface in one round trip
    async fn get_all(&self, interface: &str) -> Result<PropertyMap, RpcError>;

    /// Reads a single property (fallback when `get_all` is unsupported or
    /// answered only partially)
    async fn get(&self, interface: &str, property: &str) -> Result<Value, RpcError>;
}
