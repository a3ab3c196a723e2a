//! Triangulated surface used as a visibility oracle.
//!
//! The triangulated candidate strategy only needs four questions answered
//! about a surface: which vertex sits at a position, which vertices share
//! an edge with it, whether that edge is a fragment segment, and how many
//! structural breaks a straight line between two vertices meets. The
//! [`Surface`] trait captures exactly that, so any TIN implementation can
//! stand in. [`DelaunaySurface`] is the built-in one.

use std::collections::{HashMap, HashSet};

use geo::Coord;
use log::debug;
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::geometry::{CONTACT_EPSILON, SegmentIndex, coords_coincide};
use crate::triangulation::{ConstrainedTriangulation, edge_key};
use crate::types::{ConnectError, Fragment};

/// Index of a surface vertex.
pub type VertexId = usize;

/// Break count of a line of sight with nothing in the way: one break at
/// each end.
pub const VISIBLE_BREAKS: usize = 2;

/// Smallest padding fraction used to keep the hull away from the data.
const MIN_PADDING: f64 = 0.01;

/// Read-only queries against a triangulated surface.
pub trait Surface {
    /// The vertex nearest to `(x, y)` in plan.
    fn nearest_vertex(&self, x: f64, y: f64) -> Option<VertexId>;

    /// Vertices sharing a triangle edge with `vertex`, ascending.
    ///
    /// Unknown vertices have no neighbours.
    fn neighbors(&self, vertex: VertexId) -> &[VertexId];

    /// Number of structural breaks met by the straight line from `a` to
    /// `b`, counting its own two ends.
    ///
    /// Unknown vertices report zero breaks.
    fn visibility_break_count(&self, a: VertexId, b: VertexId) -> usize;

    /// Whether `a-b` is a segment of one of the constraining fragments.
    fn is_constrained_edge(&self, a: VertexId, b: VertexId) -> bool;
}

/// Builds a [`Surface`] constrained by fragment segments.
pub trait SurfaceBuilder {
    /// The surface produced.
    type Surface: Surface;

    /// Triangulate every vertex of `constrained` inside a rectangle padded
    /// by `padding` times the larger bounding-box side.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the surface cannot be built.
    fn build(&self, constrained: &[Fragment], padding: f64)
    -> Result<Self::Surface, ConnectError>;
}

/// Builds a [`DelaunaySurface`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DelaunayBuilder;

/// Bitwise key for deduplicating vertex positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CoordKey {
    x_bits: u64,
    y_bits: u64,
}

impl CoordKey {
    fn from_coord(c: Coord<f64>) -> Self {
        // Adding zero folds -0.0 into 0.0.
        Self {
            x_bits: (c.x + 0.0).to_bits(),
            y_bits: (c.y + 0.0).to_bits(),
        }
    }
}

/// Constrained Delaunay triangulation of the fragment vertices plus four
/// hull corners, with every fragment segment forced in as an edge.
///
/// Line-of-sight break counts come from a segment index over the same
/// fragments.
pub struct DelaunaySurface {
    vertices: Vec<Coord<f64>>,
    neighbors: Vec<Vec<VertexId>>,
    locator: RTree<GeomWithData<[f64; 2], VertexId>>,
    constrained: HashSet<(VertexId, VertexId)>,
    constraints: SegmentIndex,
}

impl DelaunaySurface {
    /// Number of vertices, hull corners included.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Plan position of a vertex.
    #[must_use]
    pub fn vertex(&self, id: VertexId) -> Option<Coord<f64>> {
        self.vertices.get(id).copied()
    }
}

impl SurfaceBuilder for DelaunayBuilder {
    type Surface = DelaunaySurface;

    fn build(
        &self,
        constrained: &[Fragment],
        padding: f64,
    ) -> Result<DelaunaySurface, ConnectError> {
        let mut vertices: Vec<Coord<f64>> = Vec::new();
        let mut lookup: HashMap<CoordKey, VertexId> = HashMap::new();
        let mut edges: HashSet<(VertexId, VertexId)> = HashSet::new();

        let mut intern = |c: Coord<f64>, vertices: &mut Vec<Coord<f64>>| {
            *lookup.entry(CoordKey::from_coord(c)).or_insert_with(|| {
                vertices.push(c);
                vertices.len() - 1
            })
        };

        for fragment in constrained {
            let mut previous: Option<VertexId> = None;
            for point in fragment.points() {
                let v = intern(point.coord(), &mut vertices);
                if let Some(u) = previous
                    && u != v
                {
                    edges.insert(edge_key(u, v));
                }
                previous = Some(v);
            }
        }

        let Some(first) = vertices.first().copied() else {
            return Err(ConnectError::Inconsistent(
                "surface has no vertices".to_string(),
            ));
        };
        let (mut min, mut max) = (first, first);
        for c in &vertices {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        let extent = (max.x - min.x).max(max.y - min.y);
        let extent = if extent > 0.0 { extent } else { 1.0 };
        let pad = extent * padding.max(MIN_PADDING);
        for corner in [
            Coord { x: min.x - pad, y: min.y - pad },
            Coord { x: max.x + pad, y: min.y - pad },
            Coord { x: max.x + pad, y: max.y + pad },
            Coord { x: min.x - pad, y: max.y + pad },
        ] {
            intern(corner, &mut vertices);
        }

        let mut mesh = ConstrainedTriangulation::new(&vertices)?;
        let mut segments: Vec<(VertexId, VertexId)> = edges.iter().copied().collect();
        segments.sort_unstable();
        let mut skipped = 0;
        for &(a, b) in &segments {
            if !mesh.insert_constraint(a, b) {
                skipped += 1;
            }
        }
        let flips = mesh.restore_delaunay();
        let neighbors = mesh.neighbors()?;
        let triangle_count = mesh.triangle_count();

        let locator: RTree<GeomWithData<[f64; 2], VertexId>> = RTree::bulk_load(
            vertices
                .iter()
                .enumerate()
                .map(|(id, c)| GeomWithData::new([c.x, c.y], id))
                .collect(),
        );

        debug!(
            "surface: {} vertices, {triangle_count} triangles, {} constrained edges \
             ({skipped} not recovered, {flips} delaunay flips)",
            vertices.len(),
            edges.len()
        );

        Ok(DelaunaySurface {
            vertices,
            neighbors,
            locator,
            constrained: edges,
            constraints: SegmentIndex::new(constrained),
        })
    }
}

impl Surface for DelaunaySurface {
    fn nearest_vertex(&self, x: f64, y: f64) -> Option<VertexId> {
        self.locator.nearest_neighbor(&[x, y]).map(|hit| hit.data)
    }

    fn neighbors(&self, vertex: VertexId) -> &[VertexId] {
        self.neighbors
            .get(vertex)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn visibility_break_count(&self, a: VertexId, b: VertexId) -> usize {
        let (Some(pa), Some(pb)) = (self.vertex(a), self.vertex(b)) else {
            return 0;
        };
        if coords_coincide(pa, pb, CONTACT_EPSILON) {
            return VISIBLE_BREAKS;
        }
        VISIBLE_BREAKS + self.constraints.obstruction_count(pa, pb)
    }

    fn is_constrained_edge(&self, a: VertexId, b: VertexId) -> bool {
        self.constrained.contains(&edge_key(a, b))
    }
}
