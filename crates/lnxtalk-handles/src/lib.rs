//! Shared handle bookkeeping
//!
//! Remote objects hand out numeric handles that stay valid only while some
//! local holder references them. Several proxies may mirror the same remote
//! object, so the reference counts must be shared: a [`HandleRegistry`] maps
//! each remote object identity to one [`HandleContext`], and every proxy for
//! that object acquires the same context.
//!
//! Releases are deferred and batched. Dropping the last local reference to a
//! handle only marks it releasable; an actual release call is issued later,
//! covering every handle that went releasable in the meantime, and never
//! while a handle request is in flight (a response may resurrect a handle
//! that was about to be released).

mod context;
mod handle_ref;
mod registry;

pub use context::{Handle, HandleContext, HandleReleaser, HandleType};
pub use handle_ref::HandleRef;
pub use registry::{ContextKey, HandleRegistry};
