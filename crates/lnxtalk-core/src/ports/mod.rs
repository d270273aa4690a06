//! Port definitions (hexagonal architecture boundaries)
//!
//! - [`transport`] - the asynchronous RPC boundary a proxy issues calls over
//! - [`events`] - the change-notification boundary the transport pushes
//!   events through

pub mod events;
pub mod transport;

pub use events::ProxyEvent;
pub use transport::{PropertyMap, RpcTransport, Value};
