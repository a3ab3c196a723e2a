//! Geometry primitives shared by validation, candidate discovery and the
//! intersection resolver.
//!
//! Every intersection predicate works in plan view (XY). Segment sets are
//! bulk-loaded into an R\*-tree so batch detection only runs the exact
//! `geo` predicate on pairs whose bounding boxes overlap.

use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Coord, Intersects, Line};
use rstar::primitives::GeomWithData;
use rstar::{RTree, RTreeObject};

use crate::types::Point;

/// Plan distance under which two computed contact points are the same.
///
/// Touching contacts produced by `geo` are exact input coordinates, so
/// this only has to absorb rounding in proper crossing points.
pub const CONTACT_EPSILON: f64 = 1e-9;

/// Identifies a segment within a polyline set.
///
/// `(polyline, segment)` is the segment from vertex `segment` to vertex
/// `segment + 1` of polyline `polyline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    /// Index of the polyline in the input slice.
    pub polyline: usize,
    /// Index of the segment within that polyline.
    pub segment: usize,
}

impl SegmentId {
    /// Whether `self` and `other` are consecutive segments of one polyline.
    #[must_use]
    pub const fn is_adjacent_to(self, other: Self) -> bool {
        self.polyline == other.polyline
            && (self.segment + 1 == other.segment || other.segment + 1 == self.segment)
    }
}

/// A `geo::Line` tagged with its [`SegmentId`], suitable for R\*-tree
/// insertion.
type IndexedSegment = GeomWithData<Line<f64>, SegmentId>;

/// How two segments meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crossing {
    /// A single shared point. `proper` is set when the point is interior
    /// to both segments.
    Point {
        /// Contact location.
        at: Coord<f64>,
        /// Whether the contact is a proper crossing.
        proper: bool,
    },
    /// Collinear segments sharing the stretch from `start` to `end`.
    Overlap {
        /// One end of the shared stretch.
        start: Coord<f64>,
        /// The other end of the shared stretch.
        end: Coord<f64>,
    },
}

impl Crossing {
    /// A representative location for reporting.
    #[must_use]
    pub const fn location(&self) -> Coord<f64> {
        match *self {
            Self::Point { at, .. } => at,
            Self::Overlap { start, .. } => start,
        }
    }

    /// Whether the contact lies entirely at one of the `allowed` points.
    ///
    /// An overlap is only confined when it has collapsed to a point.
    #[must_use]
    pub fn confined_to(&self, allowed: &[Coord<f64>]) -> bool {
        let near = |c: Coord<f64>| {
            allowed
                .iter()
                .any(|&a| coords_coincide(a, c, CONTACT_EPSILON))
        };
        match *self {
            Self::Point { at, .. } => near(at),
            Self::Overlap { start, end } => coords_coincide(start, end, CONTACT_EPSILON) && near(start),
        }
    }
}

/// Two segments from a batch that touch, cross or overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentIntersection {
    /// The lower of the two segment ids.
    pub first: SegmentId,
    /// The higher of the two segment ids.
    pub second: SegmentId,
    /// Where they meet.
    pub crossing: Crossing,
}

/// Plan-view proximity test.
#[must_use]
pub fn coords_coincide(a: Coord<f64>, b: Coord<f64>, tolerance: f64) -> bool {
    (a.x - b.x).hypot(a.y - b.y) <= tolerance
}

#[allow(clippy::float_cmp)]
fn is_degenerate(line: Line<f64>) -> bool {
    line.start == line.end
}

/// Intersect segment `p1-p2` with segment `q1-q2`.
///
/// Zero-length segments are treated as points.
#[must_use]
pub fn segment_intersection(
    p1: Coord<f64>,
    p2: Coord<f64>,
    q1: Coord<f64>,
    q2: Coord<f64>,
) -> Option<Crossing> {
    let p = Line::new(p1, p2);
    let q = Line::new(q1, q2);
    let touch = |at: Coord<f64>| Crossing::Point { at, proper: false };
    match (is_degenerate(p), is_degenerate(q)) {
        (true, true) => coords_coincide(p1, q1, 0.0).then(|| touch(p1)),
        (true, false) => q.intersects(&p1).then(|| touch(p1)),
        (false, true) => p.intersects(&q1).then(|| touch(q1)),
        (false, false) => line_intersection(p, q).map(|hit| match hit {
            LineIntersection::SinglePoint {
                intersection,
                is_proper,
            } => Crossing::Point {
                at: intersection,
                proper: is_proper,
            },
            LineIntersection::Collinear { intersection } => Crossing::Overlap {
                start: intersection.start,
                end: intersection.end,
            },
        }),
    }
}

/// Total 3D length along a point sequence.
#[must_use]
pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Whether the first and last points coincide in plan within `tolerance`.
///
/// Sequences of fewer than two points are never closed.
#[must_use]
pub fn is_closed(points: &[Point], tolerance: f64) -> bool {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => {
            first.planar_distance(*last) <= tolerance
        }
        _ => false,
    }
}

/// Interpolate the 3D location of a plan contact on a segment.
#[must_use]
pub fn point_on_segment(a: Point, b: Point, at: Coord<f64>) -> Point {
    let run = a.planar_distance(b);
    let t = if run > 0.0 {
        (at.x - a.x).hypot(at.y - a.y) / run
    } else {
        0.0
    };
    Point::new(at.x, at.y, t.clamp(0.0, 1.0).mul_add(b.z - a.z, a.z))
}

/// R\*-tree over every segment of a polyline set.
pub struct SegmentIndex {
    tree: RTree<IndexedSegment>,
}

impl SegmentIndex {
    /// Index every segment of `polylines`.
    pub fn new<P: AsRef<[Point]>>(polylines: &[P]) -> Self {
        let segments: Vec<IndexedSegment> = polylines
            .iter()
            .enumerate()
            .flat_map(|(pi, poly)| {
                poly.as_ref()
                    .windows(2)
                    .enumerate()
                    .map(move |(si, w)| {
                        GeomWithData::new(
                            Line::new(w[0].coord(), w[1].coord()),
                            SegmentId {
                                polyline: pi,
                                segment: si,
                            },
                        )
                    })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(segments),
        }
    }

    /// Number of indexed segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index holds no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Every indexed segment that meets the segment `a-b`.
    #[must_use]
    pub fn contacts(&self, a: Coord<f64>, b: Coord<f64>) -> Vec<(SegmentId, Crossing)> {
        let envelope = Line::new(a, b).envelope();
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|seg| {
                let line = seg.geom();
                segment_intersection(a, b, line.start, line.end).map(|c| (seg.data, c))
            })
            .collect()
    }

    /// Whether any indexed segment meets `a-b` anywhere other than at
    /// `a` or `b` themselves.
    #[must_use]
    pub fn obstructs(&self, a: Coord<f64>, b: Coord<f64>) -> bool {
        self.contacts(a, b)
            .iter()
            .any(|(_, crossing)| !crossing.confined_to(&[a, b]))
    }

    /// Number of distinct places where indexed segments meet `a-b`
    /// away from its ends.
    #[must_use]
    pub fn obstruction_count(&self, a: Coord<f64>, b: Coord<f64>) -> usize {
        let mut seen: Vec<Coord<f64>> = Vec::new();
        for (_, crossing) in self.contacts(a, b) {
            if crossing.confined_to(&[a, b]) {
                continue;
            }
            let at = crossing.location();
            if !seen.iter().any(|&s| coords_coincide(s, at, CONTACT_EPSILON)) {
                seen.push(at);
            }
        }
        seen.len()
    }
}

/// Find every pair of segments, across and within `polylines`, that meet.
///
/// Consecutive segments of one polyline always share a vertex; that
/// contact is not reported, but a collinear fold-back between them is.
/// Results are sorted by `(first, second)`.
#[must_use]
pub fn pairwise_intersections<P: AsRef<[Point]>>(polylines: &[P]) -> Vec<SegmentIntersection> {
    let index = SegmentIndex::new(polylines);
    let mut hits = Vec::new();

    for seg in index.tree.iter() {
        let line = *seg.geom();
        for other in index.tree.locate_in_envelope_intersecting(&line.envelope()) {
            if other.data <= seg.data {
                continue;
            }
            let other_line = other.geom();
            let Some(crossing) =
                segment_intersection(line.start, line.end, other_line.start, other_line.end)
            else {
                continue;
            };
            if seg.data.is_adjacent_to(other.data) && matches!(crossing, Crossing::Point { .. }) {
                continue;
            }
            hits.push(SegmentIntersection {
                first: seg.data,
                second: other.data,
                crossing,
            });
        }
    }

    hits.sort_by(|a, b| (a.first, a.second).cmp(&(b.first, b.second)));
    hits
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    const fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    fn flat(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::planar(x, y)).collect()
    }

    #[test]
    fn proper_crossing() {
        let hit = segment_intersection(c(0.0, 0.0), c(2.0, 2.0), c(0.0, 2.0), c(2.0, 0.0)).unwrap();
        match hit {
            Crossing::Point { at, proper } => {
                assert!(proper);
                assert!((at.x - 1.0).abs() < 1e-12 && (at.y - 1.0).abs() < 1e-12);
            }
            Crossing::Overlap { .. } => panic!("expected a point"),
        }
    }

    #[test]
    fn disjoint_segments() {
        assert!(segment_intersection(c(0.0, 0.0), c(1.0, 0.0), c(0.0, 1.0), c(1.0, 1.0)).is_none());
    }

    #[test]
    fn touching_at_endpoint_is_not_proper() {
        let hit = segment_intersection(c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(1.0, 5.0)).unwrap();
        assert_eq!(
            hit,
            Crossing::Point {
                at: c(1.0, 0.0),
                proper: false
            }
        );
        assert!(hit.confined_to(&[c(1.0, 0.0)]));
    }

    #[test]
    fn collinear_overlap() {
        let hit = segment_intersection(c(0.0, 0.0), c(2.0, 0.0), c(1.0, 0.0), c(3.0, 0.0)).unwrap();
        assert!(matches!(hit, Crossing::Overlap { .. }));
        assert!(!hit.confined_to(&[c(0.0, 0.0), c(2.0, 0.0)]));
    }

    #[test]
    fn degenerate_segment_on_line() {
        let hit = segment_intersection(c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0), c(2.0, 0.0));
        assert!(matches!(hit, Some(Crossing::Point { .. })));
        let miss = segment_intersection(c(1.0, 1.0), c(1.0, 1.0), c(0.0, 0.0), c(2.0, 0.0));
        assert!(miss.is_none());
        let both = segment_intersection(c(1.0, 1.0), c(1.0, 1.0), c(1.0, 1.0), c(1.0, 1.0));
        assert!(both.is_some());
    }

    #[test]
    fn length_is_3d() {
        let pts = vec![Point::new(0.0, 0.0, 0.0), Point::new(3.0, 4.0, 12.0)];
        assert!((polyline_length(&pts) - 13.0).abs() < 1e-12);
        assert!(polyline_length(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn closed_test() {
        assert!(is_closed(
            &flat(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            1e-5
        ));
        assert!(is_closed(
            &flat(&[(0.0, 0.0), (1.0, 0.0), (0.000_001, 0.0)]),
            1e-5
        ));
        assert!(!is_closed(&flat(&[(0.0, 0.0), (1.0, 0.0)]), 1e-5));
        assert!(!is_closed(&flat(&[(0.0, 0.0)]), 1e-5));
    }

    #[test]
    fn interpolates_elevation() {
        let p = point_on_segment(
            Point::new(0.0, 0.0, 10.0),
            Point::new(4.0, 0.0, 20.0),
            c(1.0, 0.0),
        );
        assert!((p.z - 12.5).abs() < 1e-12);
    }

    #[test]
    fn pairwise_finds_cross_between_polylines() {
        let a = flat(&[(0.0, 0.0), (2.0, 2.0)]);
        let b = flat(&[(0.0, 2.0), (2.0, 0.0)]);
        let hits = pairwise_intersections(&[a, b]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].first, SegmentId { polyline: 0, segment: 0 });
        assert_eq!(hits[0].second, SegmentId { polyline: 1, segment: 0 });
    }

    #[test]
    fn pairwise_skips_shared_vertices_of_consecutive_segments() {
        let zigzag = flat(&[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0), (3.0, 1.0)]);
        assert!(pairwise_intersections(&[zigzag]).is_empty());
    }

    #[test]
    fn pairwise_finds_self_crossing() {
        // A figure that loops back over its first segment.
        let knot = flat(&[(0.0, 0.0), (4.0, 0.0), (4.0, 2.0), (2.0, 2.0), (2.0, -2.0)]);
        let hits = pairwise_intersections(&[knot]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].first, SegmentId { polyline: 0, segment: 0 });
        assert_eq!(hits[0].second, SegmentId { polyline: 0, segment: 3 });
    }

    #[test]
    fn pairwise_reports_fold_back_of_consecutive_segments() {
        let spike = flat(&[(0.0, 0.0), (2.0, 0.0), (1.0, 0.0)]);
        let hits = pairwise_intersections(&[spike]);
        assert_eq!(hits.len(), 1);
        assert!(matches!(hits[0].crossing, Crossing::Overlap { .. }));
    }

    #[test]
    fn index_obstruction() {
        let wall = flat(&[(1.0, -1.0), (1.0, 1.0)]);
        let index = SegmentIndex::new(&[wall]);
        assert_eq!(index.len(), 1);
        assert!(index.obstructs(c(0.0, 0.0), c(2.0, 0.0)));
        assert!(!index.obstructs(c(0.0, 0.0), c(0.5, 0.0)));
        // Ending on the wall's endpoint is not an obstruction.
        assert!(!index.obstructs(c(0.0, 0.0), c(1.0, 1.0)));
    }

    #[test]
    fn obstruction_count_merges_shared_vertices() {
        // The query passes through the vertex joining two segments.
        let chevron = flat(&[(0.0, -1.0), (1.0, 0.0), (0.0, 1.0)]);
        let index = SegmentIndex::new(&[chevron]);
        assert_eq!(index.obstruction_count(c(-1.0, 0.0), c(3.0, 0.0)), 1);
    }
}
