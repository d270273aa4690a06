//! Status-transition controller
//!
//! Bridges the transport's raw status-change notifications into readiness
//! engine calls, and keeps the publicly visible (status, reason) pair
//! self-consistent: the raw fields update at different times, so the reason
//! accompanying a new status is buffered until the engine reports that every
//! feature applicable to the previous status has settled.
//!
//! The controller is a pure state machine; the owning proxy executes the
//! returned [`StatusAction`] against its engine and event channel.

use tracing::{debug, warn};

use lnxtalk_core::{ObjectStatus, StatusReason};

// ============================================================================
// StatusAction
// ============================================================================

/// What the proxy must do in response to a status-change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusAction {
    /// Duplicate or unusable notification; nothing to do
    Ignore,
    /// Hand the new status to the readiness engine for (re-)introspection
    Introspect(ObjectStatus),
    /// Terminal transition: report the status settled, then fatally
    /// invalidate the proxy
    Invalidate {
        /// The status to report as settled before invalidating
        status: ObjectStatus,
        /// Symbolic error name derived from the disconnect reason
        error_name: &'static str,
        /// Human-readable description
        message: String,
    },
}

// ============================================================================
// StatusController
// ============================================================================

/// Per-proxy status bookkeeping
#[derive(Debug)]
pub struct StatusController {
    /// Latest status reported by the transport (introspection may still be
    /// catching up with it)
    pending_status: ObjectStatus,
    pending_reason: StatusReason,
    /// Last status whose introspection fully settled; this is what public
    /// accessors report
    status: ObjectStatus,
    reason: StatusReason,
}

impl StatusController {
    /// Creates a controller for an object whose status is not yet known
    pub fn new() -> Self {
        Self {
            pending_status: ObjectStatus::Unknown,
            pending_reason: StatusReason::NoneSpecified,
            status: ObjectStatus::Unknown,
            reason: StatusReason::NoneSpecified,
        }
    }

    /// Handles a raw status-change notification
    pub fn status_changed(&mut self, new_status: ObjectStatus, reason: StatusReason) -> StatusAction {
        if self.pending_status == new_status {
            warn!(
                status = %new_status,
                "New status equals the pending one - ignoring redundant status change"
            );
            return StatusAction::Ignore;
        }

        debug!(
            from = %self.pending_status,
            to = %new_status,
            ?reason,
            "Status changed"
        );

        let old_status = self.pending_status;
        self.pending_status = new_status;
        self.pending_reason = reason;

        match new_status {
            ObjectStatus::Connecting | ObjectStatus::Connected => {
                StatusAction::Introspect(new_status)
            }
            ObjectStatus::Disconnected => StatusAction::Invalidate {
                status: ObjectStatus::Disconnected,
                error_name: reason.to_error_name(old_status),
                message: format!("Status changed to Disconnected: {reason:?}"),
            },
            ObjectStatus::Unknown => {
                warn!("Transport reported an unknown status value");
                StatusAction::Ignore
            }
        }
    }

    /// Records a status learned from introspection rather than a signal
    ///
    /// Returns true if it was recorded; a status already learned from a
    /// StatusChanged notification wins.
    pub fn force_status(&mut self, status: ObjectStatus) -> bool {
        if self.pending_status.is_known() {
            return false;
        }
        debug!(%status, "Got status from introspection");
        self.pending_status = status;
        true
    }

    /// Handles the engine's status-ready event
    ///
    /// Returns the now self-consistent (status, reason) pair to publish, or
    /// None if the event is stale or a duplicate.
    pub fn on_status_ready(&mut self, status: ObjectStatus) -> Option<(ObjectStatus, StatusReason)> {
        if status != self.pending_status {
            debug!(
                %status,
                pending = %self.pending_status,
                "Ignoring status-ready for a superseded status"
            );
            return None;
        }
        if self.status == status {
            return None;
        }
        self.status = status;
        self.reason = self.pending_reason;
        Some((self.status, self.reason))
    }

    /// The last fully settled status
    pub fn status(&self) -> ObjectStatus {
        self.status
    }

    /// The reason accompanying the last settled status
    pub fn reason(&self) -> StatusReason {
        self.reason
    }

    /// The latest transport-reported status
    pub fn pending_status(&self) -> ObjectStatus {
        self.pending_status
    }
}

impl Default for StatusController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnxtalk_core::names;

    #[test]
    fn test_duplicate_status_ignored() {
        let mut controller = StatusController::new();
        assert_eq!(
            controller.status_changed(ObjectStatus::Connecting, StatusReason::Requested),
            StatusAction::Introspect(ObjectStatus::Connecting)
        );
        assert_eq!(
            controller.status_changed(ObjectStatus::Connecting, StatusReason::Requested),
            StatusAction::Ignore
        );
    }

    #[test]
    fn test_disconnect_maps_reason_to_error_name() {
        let mut controller = StatusController::new();
        controller.status_changed(ObjectStatus::Connecting, StatusReason::Requested);

        let action =
            controller.status_changed(ObjectStatus::Disconnected, StatusReason::NetworkError);
        match action {
            StatusAction::Invalidate { error_name, .. } => {
                assert_eq!(error_name, names::NETWORK_ERROR);
            }
            other => panic!("expected Invalidate, got {other:?}"),
        }
    }

    #[test]
    fn test_status_ready_publishes_consistent_pair() {
        let mut controller = StatusController::new();
        controller.status_changed(ObjectStatus::Connected, StatusReason::Requested);

        // Nothing published until the engine settles the new status
        assert_eq!(controller.status(), ObjectStatus::Unknown);

        let published = controller.on_status_ready(ObjectStatus::Connected);
        assert_eq!(
            published,
            Some((ObjectStatus::Connected, StatusReason::Requested))
        );
        assert_eq!(controller.status(), ObjectStatus::Connected);

        // A second ready for the same status is a no-op
        assert_eq!(controller.on_status_ready(ObjectStatus::Connected), None);
    }

    #[test]
    fn test_stale_status_ready_ignored() {
        let mut controller = StatusController::new();
        controller.status_changed(ObjectStatus::Connecting, StatusReason::Requested);
        controller.status_changed(ObjectStatus::Connected, StatusReason::NoneSpecified);

        // Ready for the superseded Connecting status must not publish
        assert_eq!(controller.on_status_ready(ObjectStatus::Connecting), None);
        assert_eq!(controller.status(), ObjectStatus::Unknown);
    }

    #[test]
    fn test_force_status_only_when_unknown() {
        let mut controller = StatusController::new();
        assert!(controller.force_status(ObjectStatus::Connected));
        assert_eq!(controller.pending_status(), ObjectStatus::Connected);

        // Already known: introspected value loses
        assert!(!controller.force_status(ObjectStatus::Connecting));
        assert_eq!(controller.pending_status(), ObjectStatus::Connected);
    }
}
