//! Input validation: endpoint snapping, duplicate stripping and defect
//! classification.
//!
//! Validation never modifies the caller's fragments. It builds a working
//! copy ([`prepare`]) and classifies that copy; the connection stages
//! rebuild the same working copy so both see identical geometry.

use std::collections::BTreeMap;
use std::fmt;

use geo::Coord;
use log::debug;
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};
use serde::{Deserialize, Serialize};

use crate::geometry::{
    CONTACT_EPSILON, Crossing, SegmentIntersection, coords_coincide, is_closed,
    pairwise_intersections, point_on_segment,
};
use crate::types::{ConnectConfig, ConnectError, Endpoint, Fragment, Point};

/// The five categories of structural defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DefectKind {
    /// No extent after duplicate points are removed.
    ZeroLength,
    /// Start and end coincide.
    Closed,
    /// A fragment meets itself.
    Knot,
    /// Two fragments meet away from a shared endpoint.
    Intersecting,
    /// More than two endpoints share one position.
    TooManyCoincidentEndpoints,
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ZeroLength => "zero length",
            Self::Closed => "closed",
            Self::Knot => "knot",
            Self::Intersecting => "intersecting",
            Self::TooManyCoincidentEndpoints => "too many coincident endpoints",
        };
        f.write_str(name)
    }
}

/// A structural defect found in the input.
///
/// Defects are data: [`validate`](crate::validate) collects all of them
/// and the caller decides what to do.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// The fragment has no extent once duplicate points are removed.
    #[error("fragment {fragment} has zero length at {location}")]
    ZeroLength {
        /// Offending fragment.
        fragment: usize,
        /// Its first point, or the origin for an empty fragment.
        location: Point,
    },

    /// The fragment's start and end coincide.
    #[error("fragment {fragment} is closed at {location}")]
    Closed {
        /// Offending fragment.
        fragment: usize,
        /// The start point.
        location: Point,
    },

    /// The fragment crosses or overlaps itself.
    #[error("fragment {fragment} meets itself between segments {segment} and {other_segment} at {location}")]
    Knot {
        /// Offending fragment.
        fragment: usize,
        /// Lower segment index.
        segment: usize,
        /// Higher segment index.
        other_segment: usize,
        /// Contact location.
        location: Point,
    },

    /// Two different fragments cross, touch or overlap away from a shared
    /// endpoint.
    #[error(
        "fragment {fragment} segment {segment} meets fragment {other_fragment} segment {other_segment} at {location}"
    )]
    Intersecting {
        /// Lower fragment index.
        fragment: usize,
        /// Segment of `fragment`.
        segment: usize,
        /// Higher fragment index.
        other_fragment: usize,
        /// Segment of `other_fragment`.
        other_segment: usize,
        /// Contact location.
        location: Point,
    },

    /// More than two endpoints share one position.
    #[error("{} endpoints coincide at {location}", .endpoints.len())]
    TooManyCoincidentEndpoints {
        /// Every endpoint at the position, ascending by id.
        endpoints: Vec<Endpoint>,
        /// The shared position.
        location: Point,
    },
}

impl ValidationError {
    /// The defect category.
    #[must_use]
    pub const fn kind(&self) -> DefectKind {
        match self {
            Self::ZeroLength { .. } => DefectKind::ZeroLength,
            Self::Closed { .. } => DefectKind::Closed,
            Self::Knot { .. } => DefectKind::Knot,
            Self::Intersecting { .. } => DefectKind::Intersecting,
            Self::TooManyCoincidentEndpoints { .. } => DefectKind::TooManyCoincidentEndpoints,
        }
    }

    /// Where the defect is.
    #[must_use]
    pub const fn location(&self) -> Point {
        match self {
            Self::ZeroLength { location, .. }
            | Self::Closed { location, .. }
            | Self::Knot { location, .. }
            | Self::Intersecting { location, .. }
            | Self::TooManyCoincidentEndpoints { location, .. } => *location,
        }
    }

    /// Every fragment involved, ascending.
    #[must_use]
    pub fn fragments(&self) -> Vec<usize> {
        match self {
            Self::ZeroLength { fragment, .. }
            | Self::Closed { fragment, .. }
            | Self::Knot { fragment, .. } => vec![*fragment],
            Self::Intersecting {
                fragment,
                other_fragment,
                ..
            } => vec![*fragment, *other_fragment],
            Self::TooManyCoincidentEndpoints { endpoints, .. } => {
                let mut fragments: Vec<usize> = endpoints.iter().map(|e| e.fragment()).collect();
                fragments.sort_unstable();
                fragments.dedup();
                fragments
            }
        }
    }
}

/// Working copy of the input: endpoints of different fragments within
/// `tolerance` snapped together, then consecutive plan duplicates removed.
///
/// # Errors
///
/// Returns [`ConnectError::ResourceExhausted`] if the copy cannot be
/// allocated.
pub fn prepare(fragments: &[Fragment], tolerance: f64) -> Result<Vec<Fragment>, ConnectError> {
    let mut lines: Vec<Vec<Point>> = Vec::new();
    lines.try_reserve_exact(fragments.len())?;
    for fragment in fragments {
        let mut points = Vec::new();
        points.try_reserve_exact(fragment.len())?;
        points.extend_from_slice(fragment.points());
        lines.push(points);
    }

    snap_endpoints(&mut lines, tolerance);
    for points in &mut lines {
        points.dedup_by(|later, earlier| later.same_position(*earlier));
    }

    Ok(lines.into_iter().map(Fragment::new).collect())
}

type IndexedEndpoint = GeomWithData<[f64; 2], Endpoint>;

fn endpoint_position(lines: &[Vec<Point>], e: Endpoint) -> Option<Point> {
    let points = lines.get(e.fragment())?;
    if e.is_start() {
        points.first().copied()
    } else {
        points.last().copied()
    }
}

/// Where each endpoint should move: onto the lowest-id endpoint of
/// another fragment within `tolerance`.
///
/// Snap targets are never themselves moved, so chains do not drift. An
/// endpoint whose only neighbours within `tolerance` were already snapped
/// elsewhere stays put, even if it is within `tolerance` of where they
/// were; snapping is not transitive.
fn snap_targets(lines: &[Vec<Point>], tolerance: f64) -> Vec<Option<Point>> {
    let endpoint_count = lines.len() * 2;
    let entries: Vec<IndexedEndpoint> = (0..endpoint_count)
        .filter_map(|id| {
            let e = Endpoint::new(id);
            endpoint_position(lines, e).map(|p| GeomWithData::new([p.x, p.y], e))
        })
        .collect();
    let tree = RTree::bulk_load(entries);

    let mut target: Vec<Option<Point>> = vec![None; endpoint_count];
    for id in 0..endpoint_count {
        let e = Endpoint::new(id);
        if target[id].is_some() {
            continue;
        }
        let Some(p) = endpoint_position(lines, e) else {
            continue;
        };
        let envelope = AABB::from_corners(
            [p.x - tolerance, p.y - tolerance],
            [p.x + tolerance, p.y + tolerance],
        );
        for hit in tree.locate_in_envelope(&envelope) {
            let other = hit.data;
            if other.id() <= id
                || other.fragment() == e.fragment()
                || target[other.id()].is_some()
            {
                continue;
            }
            let [x, y] = *hit.geom();
            if (x - p.x).hypot(y - p.y) <= tolerance {
                target[other.id()] = Some(p);
            }
        }
    }
    target
}

fn snap_endpoints(lines: &mut [Vec<Point>], tolerance: f64) {
    let targets = snap_targets(lines, tolerance);
    for (id, snapped) in targets.into_iter().enumerate() {
        let Some(to) = snapped else {
            continue;
        };
        let e = Endpoint::new(id);
        let Some(points) = lines.get_mut(e.fragment()) else {
            continue;
        };
        let slot = if e.is_start() {
            points.first_mut()
        } else {
            points.last_mut()
        };
        if let Some(point) = slot {
            point.x = to.x;
            point.y = to.y;
        }
    }
}

/// Grow the defect list, surfacing allocation failure.
fn record(errors: &mut Vec<ValidationError>, defect: ValidationError) -> Result<(), ConnectError> {
    errors.try_reserve(1)?;
    errors.push(defect);
    Ok(())
}

/// Validate fragments that have already been through [`prepare`].
///
/// A lone closed fragment is not a defect: it connects trivially.
///
/// # Errors
///
/// Returns [`ConnectError::ResourceExhausted`] if the defect list cannot
/// grow.
pub fn classify(prepared: &[Fragment], tolerance: f64) -> Result<Vec<ValidationError>, ConnectError> {
    let mut errors = Vec::new();

    for (fragment, f) in prepared.iter().enumerate() {
        if f.len() < 2 {
            record(
                &mut errors,
                ValidationError::ZeroLength {
                    fragment,
                    location: f.first().copied().unwrap_or_default(),
                },
            )?;
        }
    }

    for (fragment, f) in prepared.iter().enumerate() {
        if let Some(&start) = f.first()
            && is_closed(f.points(), tolerance)
        {
            record(
                &mut errors,
                ValidationError::Closed {
                    fragment,
                    location: start,
                },
            )?;
        }
    }

    classify_intersections(prepared, tolerance, &mut errors)?;
    classify_coincident_endpoints(prepared, &mut errors)?;

    if prepared.len() == 1 && matches!(errors.as_slice(), [ValidationError::Closed { .. }]) {
        errors.clear();
    }

    debug!(
        "validated {} fragments: {} defect(s)",
        prepared.len(),
        errors.len()
    );
    Ok(errors)
}

/// Plan positions of `a`'s endpoints that coincide with one of `b`'s.
fn shared_endpoints(a: &Fragment, b: &Fragment) -> Vec<Coord<f64>> {
    let ends = |f: &Fragment| -> Vec<Coord<f64>> {
        [f.first(), f.last()]
            .into_iter()
            .flatten()
            .map(|p| p.coord())
            .collect()
    };
    let theirs = ends(b);
    ends(a)
        .into_iter()
        .filter(|&c| {
            theirs
                .iter()
                .any(|&t| coords_coincide(c, t, CONTACT_EPSILON))
        })
        .collect()
}

/// Whether a self-contact is just the closing vertex of a closed fragment.
fn is_closing_vertex(f: &Fragment, hit: &SegmentIntersection, tolerance: f64) -> bool {
    let last_segment = f.len().saturating_sub(2);
    let Some(start) = f.first() else {
        return false;
    };
    hit.first.segment == 0
        && hit.second.segment == last_segment
        && is_closed(f.points(), tolerance)
        && matches!(hit.crossing, Crossing::Point { at, .. }
            if coords_coincide(at, start.coord(), tolerance + CONTACT_EPSILON))
}

fn classify_intersections(
    prepared: &[Fragment],
    tolerance: f64,
    errors: &mut Vec<ValidationError>,
) -> Result<(), ConnectError> {
    // Accepted contact locations per fragment pair, for de-duplication.
    let mut seen: BTreeMap<(usize, usize), Vec<Coord<f64>>> = BTreeMap::new();

    for hit in pairwise_intersections(prepared) {
        let (fa, fb) = (hit.first.polyline, hit.second.polyline);
        let (Some(a), Some(b)) = (prepared.get(fa), prepared.get(fb)) else {
            return Err(ConnectError::Inconsistent(format!(
                "intersection references missing fragment {fa} or {fb}"
            )));
        };

        if fa == fb {
            if is_closing_vertex(a, &hit, tolerance) {
                continue;
            }
        } else if hit.crossing.confined_to(&shared_endpoints(a, b)) {
            continue;
        }

        let at = hit.crossing.location();
        let accepted = seen.entry((fa, fb)).or_default();
        if accepted
            .iter()
            .any(|&c| coords_coincide(c, at, CONTACT_EPSILON))
        {
            continue;
        }
        accepted.push(at);

        let segment_ends = a
            .points()
            .get(hit.first.segment..=hit.first.segment + 1)
            .and_then(|w| w.first().zip(w.last()));
        let Some((&p, &q)) = segment_ends else {
            return Err(ConnectError::Inconsistent(format!(
                "fragment {fa} has no segment {}",
                hit.first.segment
            )));
        };
        let location = point_on_segment(p, q, at);

        let defect = if fa == fb {
            ValidationError::Knot {
                fragment: fa,
                segment: hit.first.segment,
                other_segment: hit.second.segment,
                location,
            }
        } else {
            ValidationError::Intersecting {
                fragment: fa,
                segment: hit.first.segment,
                other_fragment: fb,
                other_segment: hit.second.segment,
                location,
            }
        };
        record(errors, defect)?;
    }
    Ok(())
}

fn classify_coincident_endpoints(
    prepared: &[Fragment],
    errors: &mut Vec<ValidationError>,
) -> Result<(), ConnectError> {
    let mut ends: Vec<(Point, Endpoint)> = Vec::new();
    ends.try_reserve_exact(prepared.len() * 2)?;
    for (fragment, f) in prepared.iter().enumerate() {
        if let (Some(&first), Some(&last)) = (f.first(), f.last()) {
            ends.push((first, Endpoint::start(fragment)));
            ends.push((last, Endpoint::end(fragment)));
        }
    }
    ends.sort_by(|(p, e), (q, d)| {
        p.x.total_cmp(&q.x)
            .then(p.y.total_cmp(&q.y))
            .then(e.cmp(d))
    });

    for run in ends.chunk_by(|(p, _), (q, _)| p.same_position(*q)) {
        if run.len() > 2 {
            let location = run.first().map(|(p, _)| *p).unwrap_or_default();
            record(
                errors,
                ValidationError::TooManyCoincidentEndpoints {
                    endpoints: run.iter().map(|(_, e)| *e).collect(),
                    location,
                },
            )?;
        }
    }
    Ok(())
}

/// Snap, strip and classify `fragments` under `config`.
///
/// # Errors
///
/// Returns [`ConnectError::EmptyInput`] for an empty slice,
/// [`ConnectError::InvalidConfig`] for a bad configuration and
/// [`ConnectError::ResourceExhausted`] on allocation failure.
pub fn validate_fragments(
    fragments: &[Fragment],
    config: &ConnectConfig,
) -> Result<Vec<ValidationError>, ConnectError> {
    config.check()?;
    if fragments.is_empty() {
        return Err(ConnectError::EmptyInput);
    }
    let prepared = prepare(fragments, config.snap_tolerance)?;
    classify(&prepared, config.snap_tolerance)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn run(fragments: &[Fragment]) -> Vec<ValidationError> {
        validate_fragments(fragments, &ConnectConfig::default()).unwrap()
    }

    #[test]
    fn clean_chain_has_no_defects() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(2.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(2.0, 0.0), (3.0, 0.0)]),
        ];
        assert!(run(&fragments).is_empty());
    }

    #[test]
    fn zero_length_is_reported() {
        let errors = run(&[Fragment::from_xy(&[(0.0, 0.0), (0.0, 0.0)])]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), DefectKind::ZeroLength);
        assert_eq!(errors[0].fragments(), vec![0]);
    }

    #[test]
    fn empty_fragment_is_zero_length() {
        let errors = run(&[
            Fragment::default(),
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
        ]);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            ValidationError::ZeroLength {
                fragment: 0,
                location: Point::default()
            }
        );
    }

    #[test]
    fn crossing_fragments_intersect_once() {
        let errors = run(&[
            Fragment::from_xy(&[(0.0, 0.0), (2.0, 2.0)]),
            Fragment::from_xy(&[(0.0, 2.0), (2.0, 0.0)]),
        ]);
        assert_eq!(errors.len(), 1);
        let ValidationError::Intersecting {
            fragment,
            other_fragment,
            location,
            ..
        } = errors[0]
        else {
            panic!("expected an intersection, got {:?}", errors[0]);
        };
        assert_eq!((fragment, other_fragment), (0, 1));
        assert!((location.x - 1.0).abs() < 1e-9);
        assert!((location.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn crossing_at_a_vertex_is_reported_once() {
        // B passes through A's interior vertex, touching two A segments.
        let errors = run(&[
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)]),
            Fragment::from_xy(&[(1.0, 2.0), (1.0, 0.5)]),
        ]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), DefectKind::Intersecting);
    }

    #[test]
    fn t_junction_is_intersecting() {
        // B ends on A's interior, which is not a shared endpoint.
        let errors = run(&[
            Fragment::from_xy(&[(0.0, 0.0), (2.0, 0.0)]),
            Fragment::from_xy(&[(1.0, 0.0), (1.0, 1.0)]),
        ]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), DefectKind::Intersecting);
    }

    #[test]
    fn intersection_location_carries_interpolated_elevation() {
        let errors = run(&[
            Fragment::new(vec![Point::new(0.0, 0.0, 0.0), Point::new(2.0, 2.0, 4.0)]),
            Fragment::from_xy(&[(0.0, 2.0), (2.0, 0.0)]),
        ]);
        assert!((errors[0].location().z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn self_crossing_is_a_knot() {
        let errors = run(&[Fragment::from_xy(&[
            (0.0, 0.0),
            (4.0, 0.0),
            (4.0, 2.0),
            (2.0, 2.0),
            (2.0, -2.0),
        ])]);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            ValidationError::Knot {
                fragment: 0,
                segment: 0,
                other_segment: 3,
                location: Point::planar(2.0, 0.0),
            }
        );
    }

    #[test]
    fn closed_single_fragment_is_exempt() {
        let square = Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]);
        assert!(run(std::slice::from_ref(&square)).is_empty());

        let other = Fragment::from_xy(&[(5.0, 5.0), (6.0, 5.0)]);
        let errors = run(&[square, other]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), DefectKind::Closed);
    }

    #[test]
    fn closed_fragment_closing_vertex_is_not_a_knot() {
        let triangle = Fragment::from_xy(&[(0.0, 0.0), (2.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        let far = Fragment::from_xy(&[(5.0, 5.0), (6.0, 5.0)]);
        let kinds: Vec<DefectKind> = run(&[triangle, far]).iter().map(ValidationError::kind).collect();
        assert_eq!(kinds, vec![DefectKind::Closed]);
    }

    #[test]
    fn near_endpoints_are_snapped() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(1.000_001, 0.0), (2.0, 0.0)]),
        ];
        let prepared = prepare(&fragments, 1e-5).unwrap();
        assert_eq!(prepared[1].first(), Some(&Point::planar(1.0, 0.0)));
        // The caller's copy is untouched.
        assert_eq!(fragments[1].first(), Some(&Point::planar(1.000_001, 0.0)));
        assert!(run(&fragments).is_empty());
    }

    #[test]
    fn snapping_does_not_chain() {
        // The middle end snaps onto the first; the third is only within
        // tolerance of the middle one's old position.
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (0.0, -1.0)]),
            Fragment::from_xy(&[(8e-6, 0.0), (1.0, 1.0)]),
            Fragment::from_xy(&[(1.6e-5, 0.0), (1.0, -1.0)]),
        ];
        let prepared = prepare(&fragments, 1e-5).unwrap();
        assert_eq!(prepared[1].first(), Some(&Point::planar(0.0, 0.0)));
        assert_eq!(prepared[2].first(), Some(&Point::planar(1.6e-5, 0.0)));
    }

    #[test]
    fn snapping_keeps_elevation() {
        let fragments = vec![
            Fragment::new(vec![Point::new(0.0, 0.0, 1.0), Point::new(1.0, 0.0, 1.0)]),
            Fragment::new(vec![Point::new(1.000_001, 0.0, 7.0), Point::new(2.0, 0.0, 7.0)]),
        ];
        let prepared = prepare(&fragments, 1e-5).unwrap();
        assert_eq!(prepared[1].first(), Some(&Point::new(1.0, 0.0, 7.0)));
    }

    #[test]
    fn consecutive_duplicates_are_removed() {
        let fragments = vec![Fragment::from_xy(&[
            (0.0, 0.0),
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
        ])];
        let prepared = prepare(&fragments, 1e-5).unwrap();
        assert_eq!(prepared[0].len(), 3);
    }

    #[test]
    fn three_coincident_endpoints() {
        let errors = run(&[
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(0.0, 0.0), (0.0, 1.0)]),
            Fragment::from_xy(&[(0.0, 0.0), (-1.0, 0.0)]),
        ]);
        assert_eq!(errors.len(), 1);
        let ValidationError::TooManyCoincidentEndpoints { endpoints, location } = &errors[0] else {
            panic!("expected coincident endpoints, got {:?}", errors[0]);
        };
        assert_eq!(
            endpoints,
            &vec![Endpoint::start(0), Endpoint::start(1), Endpoint::start(2)]
        );
        assert_eq!(*location, Point::planar(0.0, 0.0));
        assert_eq!(errors[0].fragments(), vec![0, 1, 2]);
    }

    #[test]
    fn defects_are_collected_in_category_order() {
        let errors = run(&[
            Fragment::from_xy(&[(0.0, 0.0), (2.0, 2.0)]),
            Fragment::from_xy(&[(0.0, 2.0), (2.0, 0.0)]),
            Fragment::from_xy(&[(9.0, 9.0)]),
            Fragment::from_xy(&[(5.0, 0.0), (6.0, 0.0), (5.0, 0.0)]),
        ]);
        let kinds: Vec<DefectKind> = errors.iter().map(ValidationError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                DefectKind::ZeroLength,
                DefectKind::Closed,
                DefectKind::Intersecting,
                DefectKind::Knot,
            ]
        );
    }

    #[test]
    fn validation_is_repeatable() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (2.0, 2.0), (4.0, 0.0)]),
            Fragment::from_xy(&[(0.0, 2.0), (4.0, 2.0)]),
            Fragment::from_xy(&[(1.0, 0.0), (1.0, 3.0)]),
        ];
        assert_eq!(run(&fragments), run(&fragments));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(
            validate_fragments(&[], &ConnectConfig::default()),
            Err(ConnectError::EmptyInput)
        );
    }

    #[test]
    fn display_names_the_fragment() {
        let defect = ValidationError::ZeroLength {
            fragment: 4,
            location: Point::planar(1.0, 2.0),
        };
        assert!(defect.to_string().starts_with("fragment 4 has zero length"));
        assert_eq!(DefectKind::Knot.to_string(), "knot");
    }
}
