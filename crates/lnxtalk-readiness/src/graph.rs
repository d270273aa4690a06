//! Feature graph
//!
//! Each proxy type owns a static [`FeatureGraph`]: a table mapping every
//! [`Feature`] it supports to an [`Introspectable`] describing when the
//! feature makes sense, what it depends on, and how to introspect it.
//!
//! Graphs are built once per proxy type through [`FeatureGraphBuilder`],
//! which validates the table at registration time: duplicate entries,
//! dependencies on features missing from the table, and dependency cycles
//! are all configuration errors surfaced as [`GraphError`] instead of
//! manifesting later as a stuck readiness request.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use lnxtalk_core::{Feature, Features, ObjectStatus};

use crate::engine::IntrospectToken;

/// An introspection procedure
///
/// Invoked by the engine once the feature's dependencies are satisfied. The
/// procedure issues whatever remote calls it needs (usually by spawning a
/// task) and reports the outcome exactly once through the token.
pub type IntrospectFn = Arc<dyn Fn(IntrospectToken) + Send + Sync>;

// ============================================================================
// Introspectable
// ============================================================================

/// Everything the engine needs to know about one feature
#[derive(Clone)]
pub struct Introspectable {
    /// Statuses of the underlying object for which this feature is
    /// meaningful (may include the `Unknown` sentinel)
    pub applicable_statuses: BTreeSet<ObjectStatus>,
    /// Features that must be satisfied before this one's procedure runs
    pub depends_on_features: Features,
    /// Remote interface names that must be advertised for this feature to be
    /// applicable; checked once the interface set is known
    pub depends_on_interfaces: Vec<String>,
    /// The introspection procedure
    pub introspect: IntrospectFn,
}

impl Introspectable {
    /// Creates an introspectable entry
    pub fn new(
        applicable_statuses: impl IntoIterator<Item = ObjectStatus>,
        depends_on_features: impl IntoIterator<Item = Feature>,
        depends_on_interfaces: impl IntoIterator<Item = String>,
        introspect: IntrospectFn,
    ) -> Self {
        Self {
            applicable_statuses: applicable_statuses.into_iter().collect(),
            depends_on_features: depends_on_features.into_iter().collect(),
            depends_on_interfaces: depends_on_interfaces.into_iter().collect(),
            introspect,
        }
    }
}

impl fmt::Debug for Introspectable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Introspectable")
            .field("applicable_statuses", &self.applicable_statuses)
            .field("depends_on_features", &self.depends_on_features)
            .field("depends_on_interfaces", &self.depends_on_interfaces)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// GraphError
// ============================================================================

/// Errors detected while building a feature graph
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The same feature was registered twice
    #[error("Duplicate feature in graph: {0}")]
    DuplicateFeature(Feature),

    /// A feature depends on a feature missing from the table
    #[error("Feature {feature} depends on unknown feature {dependency}")]
    UnknownDependency {
        /// The feature with the bad dependency
        feature: Feature,
        /// The dependency missing from the table
        dependency: Feature,
    },

    /// The dependency relation contains a cycle
    #[error("Feature dependency cycle involving {0}")]
    DependencyCycle(Feature),
}

// ============================================================================
// FeatureGraphBuilder
// ============================================================================

/// Builder for [`FeatureGraph`]
pub struct FeatureGraphBuilder {
    entries: Vec<(Feature, Introspectable)>,
}

impl FeatureGraphBuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a feature and its introspectable entry
    pub fn add(mut self, feature: Feature, introspectable: Introspectable) -> Self {
        self.entries.push((feature, introspectable));
        self
    }

    /// Validates the table and builds the graph
    pub fn build(self) -> Result<FeatureGraph, GraphError> {
        let mut entries = std::collections::BTreeMap::new();
        for (feature, introspectable) in self.entries {
            if entries.insert(feature, introspectable).is_some() {
                return Err(GraphError::DuplicateFeature(feature));
            }
        }

        // Every dependency must be in the table
        for (feature, introspectable) in &entries {
            for dep in &introspectable.depends_on_features {
                if !entries.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        feature: *feature,
                        dependency: *dep,
                    });
                }
            }
        }

        // Cycle detection: depth-first search with a three-color marking
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks: std::collections::BTreeMap<Feature, Mark> = entries
            .keys()
            .map(|f| (*f, Mark::Unvisited))
            .collect();

        fn visit(
            feature: Feature,
            entries: &std::collections::BTreeMap<Feature, Introspectable>,
            marks: &mut std::collections::BTreeMap<Feature, Mark>,
        ) -> Result<(), GraphError> {
            match marks[&feature] {
                Mark::Done => return Ok(()),
                Mark::InProgress => return Err(GraphError::DependencyCycle(feature)),
                Mark::Unvisited => {}
            }
            marks.insert(feature, Mark::InProgress);
            for dep in &entries[&feature].depends_on_features {
                visit(*dep, entries, marks)?;
            }
            marks.insert(feature, Mark::Done);
            Ok(())
        }

        let features: Vec<Feature> = entries.keys().copied().collect();
        for feature in features {
            visit(feature, &entries, &mut marks)?;
        }

        let core = entries
            .keys()
            .filter(|f| f.is_core())
            .copied()
            .collect();
        let supported_statuses = entries
            .values()
            .flat_map(|i| i.applicable_statuses.iter().copied())
            .collect();

        Ok(FeatureGraph {
            entries,
            core,
            supported_statuses,
        })
    }
}

impl Default for FeatureGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FeatureGraph
// ============================================================================

/// A validated, immutable per-proxy-type feature table
#[derive(Debug)]
pub struct FeatureGraph {
    entries: std::collections::BTreeMap<Feature, Introspectable>,
    core: Features,
    supported_statuses: BTreeSet<ObjectStatus>,
}

impl FeatureGraph {
    /// Starts building a graph
    pub fn builder() -> FeatureGraphBuilder {
        FeatureGraphBuilder::new()
    }

    /// Looks up a feature's entry
    pub fn introspectable(&self, feature: Feature) -> Option<&Introspectable> {
        self.entries.get(&feature)
    }

    /// Whether the feature is in the table
    pub fn supports(&self, feature: Feature) -> bool {
        self.entries.contains_key(&feature)
    }

    /// All features in the table
    pub fn supported_features(&self) -> Features {
        self.entries.keys().copied().collect()
    }

    /// Features marked core (implicitly requested)
    pub fn core_features(&self) -> &Features {
        &self.core
    }

    /// Union of every entry's applicable statuses
    pub fn supported_statuses(&self) -> &BTreeSet<ObjectStatus> {
        &self.supported_statuses
    }

    /// Recursive dependency closure of a feature (the feature itself
    /// excluded)
    pub fn deps_for(&self, feature: Feature) -> Features {
        let mut deps = Features::new();
        self.collect_deps(feature, &mut deps);
        deps
    }

    fn collect_deps(&self, feature: Feature, deps: &mut Features) {
        let Some(entry) = self.entries.get(&feature) else {
            return;
        };
        for dep in &entry.depends_on_features {
            if deps.insert(*dep) {
                self.collect_deps(*dep, deps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnxtalk_core::ProxyKind;

    const A: Feature = Feature::core(ProxyKind::Connection, 0, "A");
    const B: Feature = Feature::new(ProxyKind::Connection, 1, "B");
    const C: Feature = Feature::new(ProxyKind::Connection, 2, "C");

    fn noop() -> IntrospectFn {
        Arc::new(|token: IntrospectToken| token.complete(Ok(())))
    }

    fn entry(deps: impl IntoIterator<Item = Feature>) -> Introspectable {
        Introspectable::new([ObjectStatus::Unknown], deps, [], noop())
    }

    #[test]
    fn test_build_valid_graph() {
        let graph = FeatureGraph::builder()
            .add(A, entry([]))
            .add(B, entry([A]))
            .add(C, entry([B]))
            .build()
            .unwrap();

        assert_eq!(graph.supported_features(), Features::from([A, B, C]));
        assert_eq!(*graph.core_features(), Features::from([A]));
        assert_eq!(graph.deps_for(C), Features::from([A, B]));
    }

    #[test]
    fn test_duplicate_feature_rejected() {
        let err = FeatureGraph::builder()
            .add(A, entry([]))
            .add(A, entry([]))
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateFeature(A));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = FeatureGraph::builder().add(B, entry([A])).build().unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                feature: B,
                dependency: A
            }
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = FeatureGraph::builder().add(A, entry([A])).build().unwrap_err();
        assert_eq!(err, GraphError::DependencyCycle(A));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = FeatureGraph::builder()
            .add(A, entry([C]))
            .add(B, entry([A]))
            .add(C, entry([B]))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle(_)));
    }

    #[test]
    fn test_supported_statuses_union() {
        let graph = FeatureGraph::builder()
            .add(
                A,
                Introspectable::new(
                    [ObjectStatus::Unknown, ObjectStatus::Connected],
                    [],
                    [],
                    noop(),
                ),
            )
            .add(
                B,
                Introspectable::new([ObjectStatus::Connecting], [A], [], noop()),
            )
            .build()
            .unwrap();

        assert!(graph.supported_statuses().contains(&ObjectStatus::Unknown));
        assert!(graph.supported_statuses().contains(&ObjectStatus::Connecting));
        assert!(!graph.supported_statuses().contains(&ObjectStatus::Disconnected));
    }
}
