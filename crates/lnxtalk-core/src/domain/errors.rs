//! RPC error type and well-known error names
//!
//! Remote failures carry a symbolic, D-Bus-style error name plus a
//! human-readable message. The readiness engine records these verbatim for
//! failed features and surfaces them to every caller whose readiness request
//! depended on the failed feature.

use thiserror::Error;

/// Well-known symbolic error names
///
/// These mirror the error vocabulary of the remote framework; adapters map
/// raw wire errors into this namespace where possible and pass foreign names
/// through unchanged.
pub mod names {
    /// The operation was cancelled before it completed
    pub const CANCELLED: &str = "org.lnxtalk.Error.Cancelled";
    /// The requested resource or capability is not available
    pub const NOT_AVAILABLE: &str = "org.lnxtalk.Error.NotAvailable";
    /// An argument was malformed or out of range
    pub const INVALID_ARGUMENT: &str = "org.lnxtalk.Error.InvalidArgument";
    /// The connection was closed
    pub const DISCONNECTED: &str = "org.lnxtalk.Error.Disconnected";
    /// The network connection was lost or could not be established
    pub const NETWORK_ERROR: &str = "org.lnxtalk.Error.NetworkError";
    /// The provided credentials were rejected
    pub const AUTHENTICATION_FAILED: &str = "org.lnxtalk.Error.AuthenticationFailed";
    /// Encryption could not be negotiated or failed
    pub const ENCRYPTION_ERROR: &str = "org.lnxtalk.Error.EncryptionError";
    /// The requested identity is already connected elsewhere
    pub const ALREADY_CONNECTED: &str = "org.lnxtalk.Error.AlreadyConnected";
    /// The connection was superseded by a newer one for the same identity
    pub const CONNECTION_REPLACED: &str = "org.lnxtalk.Error.ConnectionReplaced";
    /// The server certificate could not be verified
    pub const CERTIFICATE_ERROR: &str = "org.lnxtalk.Error.CertificateError";
    /// The remote object was removed while proxies still referenced it
    pub const OBJECT_REMOVED: &str = "org.lnxtalk.Error.ObjectRemoved";
    /// The remote peer did not answer in time
    pub const TIMEOUT: &str = "org.lnxtalk.Error.Timeout";
}

/// A remote-call failure: symbolic error name plus human-readable message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct RpcError {
    /// Symbolic, namespaced error name (see [`names`])
    pub name: String,
    /// Human-readable description
    pub message: String,
}

impl RpcError {
    /// Creates an error from a name and message
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`names::CANCELLED`]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(names::CANCELLED, message)
    }

    /// Shorthand for [`names::NOT_AVAILABLE`]
    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(names::NOT_AVAILABLE, message)
    }

    /// Shorthand for [`names::INVALID_ARGUMENT`]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(names::INVALID_ARGUMENT, message)
    }

    /// Shorthand for [`names::TIMEOUT`]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(names::TIMEOUT, message)
    }

    /// Shorthand for [`names::OBJECT_REMOVED`]
    pub fn object_removed(message: impl Into<String>) -> Self {
        Self::new(names::OBJECT_REMOVED, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_name_and_message() {
        let err = RpcError::not_available("feature depends on a missing interface");
        assert_eq!(
            err.to_string(),
            "org.lnxtalk.Error.NotAvailable: feature depends on a missing interface"
        );
    }

    #[test]
    fn test_equality() {
        let a = RpcError::cancelled("Destroyed");
        let b = RpcError::new(names::CANCELLED, "Destroyed");
        assert_eq!(a, b);
    }

    #[test]
    fn test_foreign_names_pass_through() {
        let err = RpcError::new("org.freedesktop.DBus.Error.NoReply", "timed out");
        assert_eq!(err.name, "org.freedesktop.DBus.Error.NoReply");
    }
}
