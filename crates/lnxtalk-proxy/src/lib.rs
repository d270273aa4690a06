//! Proxy facades
//!
//! A proxy mirrors one remote object: it introspects the object's state
//! feature by feature through a readiness engine, caches what it learns,
//! keeps the cache current from push events, and exposes it through cheap
//! synchronous accessors. Callers pick the features they care about with
//! `become_ready` and pay only for those.
//!
//! Two facades are provided: [`Connection`] for objects with a connection
//! lifecycle (status machine, shared handles) and [`Account`] for static
//! configuration objects that live entirely at the `Unknown` status.

mod account;
mod connection;

pub use account::{Account, AccountEvent};
pub use connection::{Connection, ConnectionEvent};

/// Feature tables of the two proxy types
pub mod features {
    pub use crate::account::features as account;
    pub use crate::connection::features as connection;
}

/// Remote interface names spoken by the proxies
pub mod interfaces {
    pub use crate::account::{ACCOUNT_IFACE, AVATAR_IFACE};
    pub use crate::connection::{CONNECTION_IFACE, CONTACTS_IFACE, SIMPLE_PRESENCE_IFACE};
}
