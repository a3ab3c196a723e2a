//! Connectivity graph: for every endpoint, the distance-ordered candidate
//! connections to endpoints of other fragments.
//!
//! This module defines the [`CandidateFinder`] trait for pluggable
//! discovery strategies and the [`CandidateStrategy`] enum for runtime
//! selection.

use std::collections::HashMap;

use log::debug;
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use crate::geometry::SegmentIndex;
use crate::surface::{DelaunayBuilder, Surface, SurfaceBuilder, VISIBLE_BREAKS, VertexId};
use crate::types::{ConnectConfig, ConnectError, Endpoint, Fragment, Point};

/// Addresses one candidate as `(connection point, offset within its list)`.
///
/// Blocking entries are stored this way rather than as references so they
/// survive any reallocation of the candidate tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateRef {
    /// Index of the owning [`ConnectionPoint`] (its endpoint id).
    pub point: usize,
    /// Offset within that point's candidate list.
    pub offset: usize,
}

/// A proposed connector from one endpoint to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionCandidate {
    /// The endpoint this connector leads to.
    pub target: Endpoint,
    /// 3D length of the connector.
    pub length: f64,
    /// Candidates whose connectors cross this one.
    pub blocks: Vec<CandidateRef>,
}

impl ConnectionCandidate {
    /// The fragment this candidate would consume.
    #[must_use]
    pub const fn fragment(&self) -> usize {
        self.target.fragment()
    }
}

/// One endpoint and the candidates leaving it, ascending by length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPoint {
    /// The endpoint this record belongs to.
    pub endpoint: Endpoint,
    /// Its position in the prepared fragments.
    pub position: Point,
    /// Outgoing candidates.
    pub candidates: Vec<ConnectionCandidate>,
}

/// All connection points of one call, indexed by endpoint id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityGraph {
    points: Vec<ConnectionPoint>,
    fragment_count: usize,
}

impl ConnectivityGraph {
    /// One empty connection point per endpoint of `fragments`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Inconsistent`] for an empty fragment and
    /// [`ConnectError::ResourceExhausted`] if the table cannot be allocated.
    pub fn with_endpoints(fragments: &[Fragment]) -> Result<Self, ConnectError> {
        let mut points = Vec::new();
        points.try_reserve_exact(fragments.len() * 2)?;
        for id in 0..fragments.len() * 2 {
            let endpoint = Endpoint::new(id);
            let position = endpoint.position(fragments).ok_or_else(|| {
                ConnectError::Inconsistent(format!("{endpoint} has no position"))
            })?;
            points.push(ConnectionPoint {
                endpoint,
                position,
                candidates: Vec::new(),
            });
        }
        Ok(Self {
            points,
            fragment_count: fragments.len(),
        })
    }

    /// Every connection point, indexed by endpoint id.
    #[must_use]
    pub fn points(&self) -> &[ConnectionPoint] {
        &self.points
    }

    /// The connection point of `endpoint`.
    #[must_use]
    pub fn point(&self, endpoint: Endpoint) -> Option<&ConnectionPoint> {
        self.points.get(endpoint.id())
    }

    /// Look up a candidate by reference.
    #[must_use]
    pub fn candidate(&self, r: CandidateRef) -> Option<&ConnectionCandidate> {
        self.points.get(r.point)?.candidates.get(r.offset)
    }

    pub(crate) fn candidate_mut(&mut self, r: CandidateRef) -> Option<&mut ConnectionCandidate> {
        self.points.get_mut(r.point)?.candidates.get_mut(r.offset)
    }

    /// Number of fragments the graph was built for.
    #[must_use]
    pub const fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// Number of directed candidates.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.points.iter().map(|p| p.candidates.len()).sum()
    }

    /// Number of directed candidates of zero length.
    #[must_use]
    pub fn zero_length_count(&self) -> usize {
        self.points
            .iter()
            .flat_map(|p| &p.candidates)
            .filter(|c| c.length <= 0.0)
            .count()
    }

    /// Add a candidate from `from` to `target`, measured between their
    /// positions.
    fn push_candidate(&mut self, from: Endpoint, target: Endpoint) -> Result<(), ConnectError> {
        let to = self
            .point(target)
            .map(|p| p.position)
            .ok_or_else(|| ConnectError::Inconsistent(format!("unknown target {target}")))?;
        let point = self
            .points
            .get_mut(from.id())
            .ok_or_else(|| ConnectError::Inconsistent(format!("unknown source {from}")))?;
        point.candidates.try_reserve(1)?;
        point.candidates.push(ConnectionCandidate {
            target,
            length: point.position.distance(to),
            blocks: Vec::new(),
        });
        Ok(())
    }

    /// Sort every candidate list ascending by length (ties by target) and
    /// collapse repeated targets.
    fn finish(&mut self) {
        for point in &mut self.points {
            point.candidates.sort_by(|a, b| {
                a.length
                    .total_cmp(&b.length)
                    .then(a.target.cmp(&b.target))
            });
            point.candidates.dedup_by_key(|c| c.target);
        }
    }

    /// Whether the candidates connect every fragment into one component.
    ///
    /// A traversal of all fragments is impossible otherwise.
    #[must_use]
    pub fn spans_all_fragments(&self) -> bool {
        if self.fragment_count <= 1 {
            return true;
        }
        let mut components = UnionFind::<usize>::new(self.fragment_count);
        let mut remaining = self.fragment_count;
        for point in &self.points {
            for candidate in &point.candidates {
                if components.union(point.endpoint.fragment(), candidate.fragment()) {
                    remaining -= 1;
                }
            }
        }
        remaining == 1
    }
}

/// Selects how candidate connections are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CandidateStrategy {
    /// Walk a triangulated surface built over the fragments and accept
    /// neighbouring endpoints that can see each other.
    ///
    /// Produces a sparse graph, so the search stays small, but a pair of
    /// endpoints that are not surface neighbours is never proposed.
    #[default]
    Triangulated,

    /// Propose every endpoint pair between every two fragments and drop
    /// those whose connector meets a fragment.
    ///
    /// Quadratic in the number of fragments but never misses a
    /// connection.
    Direct,
}

/// Trait for candidate discovery strategies.
///
/// Input: prepared fragments. Output: a finished [`ConnectivityGraph`]
/// with sorted, deduplicated candidate lists and no blocking entries.
pub trait CandidateFinder {
    /// Build the connectivity graph for `fragments`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] on allocation failure or if an index
    /// lookup fails.
    fn find(
        &self,
        fragments: &[Fragment],
        config: &ConnectConfig,
    ) -> Result<ConnectivityGraph, ConnectError>;
}

impl CandidateFinder for CandidateStrategy {
    fn find(
        &self,
        fragments: &[Fragment],
        config: &ConnectConfig,
    ) -> Result<ConnectivityGraph, ConnectError> {
        match *self {
            Self::Triangulated => {
                triangulated_candidates(fragments, config.surface_padding, &DelaunayBuilder)
            }
            Self::Direct => direct_candidates(fragments),
        }
    }
}

impl CandidateStrategy {
    /// Short lowercase name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Triangulated => "triangulated",
            Self::Direct => "direct",
        }
    }
}

/// Discover candidates through a surface from `builder`.
///
/// Endpoints resolving to the same surface vertex get a zero-length
/// candidate. Otherwise a neighbouring vertex is a target when it holds an
/// endpoint of another fragment, the edge to it is not a fragment segment,
/// and the visibility query reports exactly [`VISIBLE_BREAKS`].
///
/// # Errors
///
/// Returns [`ConnectError`] if the surface cannot be built, an endpoint
/// has no surface vertex, or a table cannot be allocated.
pub fn triangulated_candidates<B: SurfaceBuilder>(
    fragments: &[Fragment],
    padding: f64,
    builder: &B,
) -> Result<ConnectivityGraph, ConnectError> {
    let surface = builder.build(fragments, padding)?;
    let mut graph = ConnectivityGraph::with_endpoints(fragments)?;

    let mut vertex_of: Vec<VertexId> = Vec::new();
    vertex_of.try_reserve_exact(graph.points.len())?;
    for point in &graph.points {
        let vertex = surface
            .nearest_vertex(point.position.x, point.position.y)
            .ok_or_else(|| {
                ConnectError::Inconsistent(format!("no surface vertex near {}", point.endpoint))
            })?;
        vertex_of.push(vertex);
    }

    let mut at_vertex: HashMap<VertexId, Vec<Endpoint>> = HashMap::new();
    for (id, &vertex) in vertex_of.iter().enumerate() {
        at_vertex.entry(vertex).or_default().push(Endpoint::new(id));
    }

    for (id, &vertex) in vertex_of.iter().enumerate() {
        let from = Endpoint::new(id);

        if let Some(shared) = at_vertex.get(&vertex) {
            for &other in shared {
                if other.fragment() != from.fragment() {
                    graph.push_candidate(from, other)?;
                }
            }
        }

        for &neighbor in surface.neighbors(vertex) {
            let Some(targets) = at_vertex.get(&neighbor) else {
                continue;
            };
            if surface.is_constrained_edge(vertex, neighbor)
                || surface.visibility_break_count(vertex, neighbor) != VISIBLE_BREAKS
            {
                continue;
            }
            for &target in targets {
                if target.fragment() != from.fragment() {
                    graph.push_candidate(from, target)?;
                }
            }
        }
    }

    graph.finish();
    debug!(
        "triangulated candidates: {} over {} endpoints ({} zero-length)",
        graph.candidate_count(),
        graph.points.len(),
        graph.zero_length_count()
    );
    Ok(graph)
}

/// Propose the four endpoint pairs of every two fragments, keeping those
/// whose connector meets no fragment away from its own ends.
///
/// # Errors
///
/// Returns [`ConnectError`] if a table cannot be allocated.
pub fn direct_candidates(fragments: &[Fragment]) -> Result<ConnectivityGraph, ConnectError> {
    let mut graph = ConnectivityGraph::with_endpoints(fragments)?;
    let index = SegmentIndex::new(fragments);

    for i in 0..fragments.len() {
        for j in i + 1..fragments.len() {
            for from in [Endpoint::start(i), Endpoint::end(i)] {
                for to in [Endpoint::start(j), Endpoint::end(j)] {
                    let (Some(a), Some(b)) = (graph.point(from), graph.point(to)) else {
                        return Err(ConnectError::Inconsistent(format!(
                            "missing connection point for {from} or {to}"
                        )));
                    };
                    if index.obstructs(a.position.coord(), b.position.coord()) {
                        continue;
                    }
                    graph.push_candidate(from, to)?;
                    graph.push_candidate(to, from)?;
                }
            }
        }
    }

    graph.finish();
    debug!(
        "direct candidates: {} over {} endpoints",
        graph.candidate_count(),
        graph.points.len()
    );
    Ok(graph)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn chain() -> Vec<Fragment> {
        vec![
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(2.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(2.0, 0.0), (3.0, 0.0)]),
        ]
    }

    fn targets(graph: &ConnectivityGraph, from: Endpoint) -> Vec<Endpoint> {
        graph
            .point(from)
            .unwrap()
            .candidates
            .iter()
            .map(|c| c.target)
            .collect()
    }

    fn assert_sorted(graph: &ConnectivityGraph) {
        for point in graph.points() {
            for pair in point.candidates.windows(2) {
                assert!(pair[0].length <= pair[1].length);
                assert_ne!(pair[0].target, pair[1].target);
            }
            for c in &point.candidates {
                assert_ne!(c.fragment(), point.endpoint.fragment());
            }
        }
    }

    #[test]
    fn triangulated_links_coincident_endpoints() {
        let graph = CandidateStrategy::Triangulated
            .find(&chain(), &ConnectConfig::default())
            .unwrap();
        assert_eq!(graph.points().len(), 6);
        let first = &graph.point(Endpoint::end(0)).unwrap().candidates[0];
        assert_eq!(first.target, Endpoint::end(1));
        assert!(first.length.abs() < f64::EPSILON);
        assert_eq!(
            graph.point(Endpoint::start(1)).unwrap().candidates[0].target,
            Endpoint::start(2)
        );
        assert_sorted(&graph);
        assert!(graph.spans_all_fragments());
    }

    #[test]
    fn triangulated_finds_visible_neighbours() {
        // Two parallel segments facing each other across a gap.
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (0.0, 1.0)]),
            Fragment::from_xy(&[(1.0, 0.0), (1.0, 1.0)]),
        ];
        let graph = CandidateStrategy::Triangulated
            .find(&fragments, &ConnectConfig::default())
            .unwrap();
        let from_start = targets(&graph, Endpoint::start(0));
        assert_eq!(from_start.first(), Some(&Endpoint::start(1)));
        assert_sorted(&graph);
    }

    #[test]
    fn triangulated_joins_ends_across_hidden_vertices() {
        // The posts sit inside the circle through the two facing ends but
        // behind the corridor walls.
        let fragments = vec![
            Fragment::from_xy(&[(-3.0, 0.0), (0.0, 0.0)]),
            Fragment::from_xy(&[(1.0, 0.0), (4.0, 0.0)]),
            Fragment::from_xy(&[(-1.0, 0.2), (2.0, 0.2)]),
            Fragment::from_xy(&[(-1.0, -0.2), (2.0, -0.2)]),
            Fragment::from_xy(&[(0.5, 0.3), (0.5, 3.0)]),
            Fragment::from_xy(&[(0.5, -0.3), (0.5, -3.0)]),
        ];
        let graph = CandidateStrategy::Triangulated
            .find(&fragments, &ConnectConfig::default())
            .unwrap();
        let from_a = targets(&graph, Endpoint::end(0));
        assert_eq!(from_a.first(), Some(&Endpoint::start(1)));
        assert!(!from_a.contains(&Endpoint::start(4)));
        assert!(!from_a.contains(&Endpoint::start(5)));
        assert_eq!(
            targets(&graph, Endpoint::start(1)).first(),
            Some(&Endpoint::end(0))
        );
        assert_sorted(&graph);
    }

    #[test]
    fn direct_enumerates_four_per_pair() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (0.0, 1.0)]),
            Fragment::from_xy(&[(1.0, 0.0), (1.0, 1.0)]),
        ];
        let graph = direct_candidates(&fragments).unwrap();
        // The two diagonals cross each other but not a fragment.
        assert_eq!(graph.candidate_count(), 8);
        assert_eq!(
            targets(&graph, Endpoint::start(0)),
            vec![Endpoint::start(1), Endpoint::end(1)]
        );
        let diagonal = &graph.point(Endpoint::start(0)).unwrap().candidates[1];
        assert!((diagonal.length - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn direct_discards_connectors_through_fragments() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (0.0, 1.0)]),
            Fragment::from_xy(&[(1.0, -1.0), (1.0, 2.0)]),
            Fragment::from_xy(&[(2.0, 0.0), (2.0, 1.0)]),
        ];
        let graph = direct_candidates(&fragments).unwrap();
        assert!(
            targets(&graph, Endpoint::start(0))
                .iter()
                .all(|t| t.fragment() != 2)
        );
        assert_sorted(&graph);
    }

    #[test]
    fn direct_rejects_connector_along_a_fragment() {
        // The end of A to the far end of B runs back over B itself.
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 1.0), (0.0, 0.0)]),
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
        ];
        let graph = direct_candidates(&fragments).unwrap();
        assert!(!targets(&graph, Endpoint::end(0)).contains(&Endpoint::end(1)));
        assert!(targets(&graph, Endpoint::end(0)).contains(&Endpoint::start(1)));
    }

    #[test]
    fn wall_disconnects_the_graph() {
        // A closed box around one fragment hides it from the other.
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(5.0, 0.0), (6.0, 0.0)]),
            Fragment::from_xy(&[(-1.0, -1.0), (2.0, -1.0), (2.0, 1.0), (-1.0, 1.0), (-1.0, -0.5)]),
        ];
        let graph = direct_candidates(&fragments).unwrap();
        assert!(
            targets(&graph, Endpoint::start(0))
                .iter()
                .all(|t| t.fragment() == 2)
        );
    }

    #[test]
    fn unconnected_graph_does_not_span() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(5.0, 0.0), (6.0, 0.0)]),
        ];
        let graph = ConnectivityGraph::with_endpoints(&fragments).unwrap();
        assert!(!graph.spans_all_fragments());
        assert_eq!(graph.candidate_count(), 0);
    }

    #[test]
    fn empty_fragment_is_inconsistent() {
        let fragments = vec![Fragment::default()];
        assert!(matches!(
            ConnectivityGraph::with_endpoints(&fragments),
            Err(ConnectError::Inconsistent(_))
        ));
    }

    #[test]
    fn strategy_serde_and_default() {
        assert_eq!(CandidateStrategy::default(), CandidateStrategy::Triangulated);
        let json = serde_json::to_string(&CandidateStrategy::Direct).unwrap();
        assert_eq!(json, "\"Direct\"");
        assert_eq!(CandidateStrategy::Direct.name(), "direct");
    }
}
