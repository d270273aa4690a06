//! Feature identifiers
//!
//! A [`Feature`] names an independently-toggleable capability of a proxy
//! object. Proxies declare a static table of features; callers pass sets of
//! them to `become_ready` and pay only for the introspection round-trips
//! those features require.
//!
//! Feature identity is strongly typed: a feature is scoped to the proxy type
//! it belongs to via [`ProxyKind`], so `Connection` feature 0 and `Account`
//! feature 0 are distinct values and cannot be confused at compile time.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ProxyKind
// ============================================================================

/// The proxy type a feature is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyKind {
    /// An account proxy (mirrors a stored messaging account)
    Account,
    /// A connection proxy (mirrors a live protocol connection)
    Connection,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Account => write!(f, "Account"),
            ProxyKind::Connection => write!(f, "Connection"),
        }
    }
}

// ============================================================================
// Feature
// ============================================================================

/// A named capability of a proxy, gating a group of cached accessors
///
/// Equality, ordering and hashing consider only `(kind, index)`; the display
/// name and the core marker are metadata. Core features are implicitly
/// included in every readiness request.
#[derive(Debug, Clone, Copy)]
pub struct Feature {
    kind: ProxyKind,
    index: u8,
    name: &'static str,
    core: bool,
}

impl Feature {
    /// Creates a non-core feature identifier
    pub const fn new(kind: ProxyKind, index: u8, name: &'static str) -> Self {
        Self {
            kind,
            index,
            name,
            core: false,
        }
    }

    /// Creates a core feature identifier
    ///
    /// Core features are unconditionally requested by every call to
    /// `become_ready` and by proxy construction.
    pub const fn core(kind: ProxyKind, index: u8, name: &'static str) -> Self {
        Self {
            kind,
            index,
            name,
            core: true,
        }
    }

    /// The proxy type this feature belongs to
    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// The per-proxy-type index of this feature
    pub fn index(&self) -> u8 {
        self.index
    }

    /// The display name of this feature
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this feature is implicitly included in every request
    pub fn is_core(&self) -> bool {
        self.core
    }
}

impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.index == other.index
    }
}

impl Eq for Feature {}

impl PartialOrd for Feature {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Feature {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.kind, self.index).cmp(&(other.kind, other.index))
    }
}

impl std::hash::Hash for Feature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.kind, self.index).hash(state);
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A set of features
pub type Features = BTreeSet<Feature>;
