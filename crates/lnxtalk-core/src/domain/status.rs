//! Object status and status-change reasons
//!
//! The [`ObjectStatus`] of a remote object is the coarse lifecycle state
//! that decides which features are applicable. The [`StatusReason`] explains
//! a status change and maps to a symbolic error name when the change is a
//! terminal disconnection.

use serde::{Deserialize, Serialize};

use crate::domain::errors::names;

// ============================================================================
// ObjectStatus
// ============================================================================

/// Coarse lifecycle state of the remote object a proxy mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectStatus {
    /// The status has not been determined yet (sentinel)
    ///
    /// Proxies start here until the first introspection pass or the first
    /// status-change notification reveals the real status. Objects without a
    /// status machine (accounts) stay here for their whole lifetime.
    Unknown,
    /// The connection is closed
    Disconnected,
    /// The connection is being established
    Connecting,
    /// The connection is established
    Connected,
}

impl ObjectStatus {
    /// Returns true once the real status has been determined
    pub fn is_known(&self) -> bool {
        !matches!(self, ObjectStatus::Unknown)
    }

    /// Decodes a wire status code
    ///
    /// Unrecognized codes map to `Unknown`; the caller is expected to warn.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ObjectStatus::Connected,
            1 => ObjectStatus::Connecting,
            2 => ObjectStatus::Disconnected,
            _ => ObjectStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectStatus::Unknown => "Unknown",
            ObjectStatus::Disconnected => "Disconnected",
            ObjectStatus::Connecting => "Connecting",
            ObjectStatus::Connected => "Connected",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// StatusReason
// ============================================================================

/// The reason accompanying a status-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusReason {
    /// No reason was given
    NoneSpecified,
    /// The change was requested locally (user action)
    Requested,
    /// The network connection was lost or could not be established
    NetworkError,
    /// The provided credentials were rejected
    AuthenticationFailed,
    /// Encryption could not be negotiated or failed
    EncryptionError,
    /// The requested identity is already in use by another connection
    NameInUse,
    /// The server certificate could not be verified
    CertificateError,
}

impl StatusReason {
    /// Decodes a wire reason code
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => StatusReason::Requested,
            2 => StatusReason::NetworkError,
            3 => StatusReason::AuthenticationFailed,
            4 => StatusReason::EncryptionError,
            5 => StatusReason::NameInUse,
            6 => StatusReason::CertificateError,
            _ => StatusReason::NoneSpecified,
        }
    }

    /// Maps a terminal disconnection reason to a symbolic error name
    ///
    /// `old_status` is the status the object was in before disconnecting:
    /// a `NameInUse` while already connected means the connection was taken
    /// over by a newer one, while the same reason during connecting means an
    /// older connection already holds the identity.
    pub fn to_error_name(self, old_status: ObjectStatus) -> &'static str {
        match self {
            StatusReason::NoneSpecified => names::DISCONNECTED,
            StatusReason::Requested => names::CANCELLED,
            StatusReason::NetworkError => names::NETWORK_ERROR,
            StatusReason::AuthenticationFailed => names::AUTHENTICATION_FAILED,
            StatusReason::EncryptionError => names::ENCRYPTION_ERROR,
            StatusReason::NameInUse => {
                if old_status == ObjectStatus::Connected {
                    names::CONNECTION_REPLACED
                } else {
                    names::ALREADY_CONNECTED
                }
            }
            StatusReason::CertificateError => names::CERTIFICATE_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(ObjectStatus::from_code(0), ObjectStatus::Connected);
        assert_eq!(ObjectStatus::from_code(1), ObjectStatus::Connecting);
        assert_eq!(ObjectStatus::from_code(2), ObjectStatus::Disconnected);
        assert_eq!(ObjectStatus::from_code(99), ObjectStatus::Unknown);
    }

    #[test]
    fn test_reason_error_names() {
        assert_eq!(
            StatusReason::NetworkError.to_error_name(ObjectStatus::Connecting),
            names::NETWORK_ERROR
        );
        assert_eq!(
            StatusReason::Requested.to_error_name(ObjectStatus::Connected),
            names::CANCELLED
        );
    }

    #[test]
    fn test_name_in_use_depends_on_old_status() {
        assert_eq!(
            StatusReason::NameInUse.to_error_name(ObjectStatus::Connected),
            names::CONNECTION_REPLACED
        );
        assert_eq!(
            StatusReason::NameInUse.to_error_name(ObjectStatus::Connecting),
            names::ALREADY_CONNECTED
        );
    }

    #[test]
    fn test_unknown_is_not_known() {
        assert!(!ObjectStatus::Unknown.is_known());
        assert!(ObjectStatus::Disconnected.is_known());
    }
}
