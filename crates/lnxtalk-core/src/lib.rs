//! LNXTalk Core - Domain types and ports for the proxy library
//!
//! This crate contains the shared vocabulary of the LNXTalk proxy stack:
//! - **Domain types** - `Feature`, `ObjectStatus`, `StatusReason`, `RpcError`
//! - **Port definitions** - Traits for adapters: `RpcTransport`, plus the
//!   `ProxyEvent` change-notification boundary
//! - **Task queue** - Deferred-execution primitive used by the readiness
//!   engine and the handle registry
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure types with no I/O. Ports define trait
//! interfaces that transport adapters implement; the proxy crates consume
//! them as `Arc<dyn Trait + Send + Sync>`.

pub mod config;
pub mod domain;
pub mod ports;
pub mod task_queue;

pub use config::{ConfigError, ProxyConfig};
pub use domain::errors::{names, RpcError};
pub use domain::feature::{Feature, Features, ProxyKind};
pub use domain::status::{ObjectStatus, StatusReason};
pub use ports::events::ProxyEvent;
pub use ports::transport::{PropertyMap, RpcTransport, Value};
pub use task_queue::TaskQueue;
