//! The future returned by `become_ready`
//!
//! A [`PendingReady`] resolves once every feature it requested has been
//! satisfied for the proxy's current status, or fails with the error of the
//! first requested feature that became permanently missing. Dropping the
//! engine resolves it with a Cancelled error.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use lnxtalk_core::{Features, RpcError};

/// A pending readiness operation
#[derive(Debug)]
pub struct PendingReady {
    requested: Features,
    rx: oneshot::Receiver<Result<(), RpcError>>,
}

impl PendingReady {
    pub(crate) fn new(requested: Features, rx: oneshot::Receiver<Result<(), RpcError>>) -> Self {
        Self { requested, rx }
    }

    /// The features this operation waits for (core features included)
    pub fn requested_features(&self) -> &Features {
        &self.requested
    }
}

impl Future for PendingReady {
    type Output = Result<(), RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            // The engine was dropped with this operation still pending
            Err(_) => Err(RpcError::cancelled("Destroyed")),
        })
    }
}
