//! Intersection resolver: which candidate connectors cross each other.
//!
//! Each undirected connector is tested once as a two-point polyline; a
//! crossing is then recorded on every directed candidate of both
//! connectors, so whichever direction the search takes, the partner is
//! blocked.

use std::collections::HashMap;

use geo::Coord;
use log::debug;

use crate::geometry::{CONTACT_EPSILON, Crossing, coords_coincide, pairwise_intersections};
use crate::graph::{CandidateRef, ConnectivityGraph};
use crate::types::{ConnectError, Endpoint, Point};

/// Whether two connectors meet anywhere other than at an end they share.
///
/// Collinear overlap of positive length always counts.
fn connectors_cross(a: [Point; 2], b: [Point; 2], crossing: &Crossing) -> bool {
    let shared: Vec<Coord<f64>> = a
        .iter()
        .map(|p| p.coord())
        .filter(|&c| {
            b.iter()
                .any(|q| coords_coincide(c, q.coord(), CONTACT_EPSILON))
        })
        .collect();
    !crossing.confined_to(&shared)
}

/// Every pair `(i, j)`, `i < j`, of connectors in `connectors` that cross.
#[must_use]
pub fn crossing_pairs(connectors: &[[Point; 2]]) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = pairwise_intersections(connectors)
        .into_iter()
        .filter(|hit| hit.first.polyline != hit.second.polyline)
        .filter_map(|hit| {
            let (i, j) = (hit.first.polyline, hit.second.polyline);
            let (&a, &b) = (connectors.get(i)?, connectors.get(j)?);
            connectors_cross(a, b, &hit.crossing).then_some((i, j))
        })
        .collect();
    pairs.dedup();
    pairs
}

/// Number of crossing pairs among `connectors`.
///
/// A valid connected string has none.
#[must_use]
pub fn count_crossings(connectors: &[[Point; 2]]) -> usize {
    crossing_pairs(connectors).len()
}

const fn unordered(a: Endpoint, b: Endpoint) -> (Endpoint, Endpoint) {
    if a.id() < b.id() { (a, b) } else { (b, a) }
}

/// Record blocking entries on every candidate of `graph`.
///
/// Returns the number of crossing connector pairs.
///
/// # Errors
///
/// Returns [`ConnectError::ResourceExhausted`] if a blocking list cannot
/// grow, or [`ConnectError::Inconsistent`] if a candidate reference does
/// not resolve.
pub fn resolve_blocking(graph: &mut ConnectivityGraph) -> Result<usize, ConnectError> {
    let mut ends: Vec<[Point; 2]> = Vec::new();
    let mut refs: Vec<Vec<CandidateRef>> = Vec::new();
    let mut by_pair: HashMap<(Endpoint, Endpoint), usize> = HashMap::new();

    for (index, point) in graph.points().iter().enumerate() {
        for (offset, candidate) in point.candidates.iter().enumerate() {
            let target = graph.point(candidate.target).ok_or_else(|| {
                ConnectError::Inconsistent(format!("unknown target {}", candidate.target))
            })?;
            let key = unordered(point.endpoint, candidate.target);
            let connector = match by_pair.get(&key) {
                Some(&existing) => existing,
                None => {
                    ends.try_reserve(1)?;
                    refs.try_reserve(1)?;
                    ends.push([point.position, target.position]);
                    refs.push(Vec::new());
                    by_pair.insert(key, ends.len() - 1);
                    ends.len() - 1
                }
            };
            refs[connector].push(CandidateRef {
                point: index,
                offset,
            });
        }
    }

    let pairs = crossing_pairs(&ends);
    for &(i, j) in &pairs {
        for &a in &refs[i] {
            for &b in &refs[j] {
                link(graph, a, b)?;
                link(graph, b, a)?;
            }
        }
    }

    debug!(
        "blocking: {} connectors, {} crossing pairs",
        ends.len(),
        pairs.len()
    );
    Ok(pairs.len())
}

fn link(graph: &mut ConnectivityGraph, from: CandidateRef, partner: CandidateRef) -> Result<(), ConnectError> {
    let candidate = graph.candidate_mut(from).ok_or_else(|| {
        ConnectError::Inconsistent(format!(
            "blocking entry references missing candidate {}:{}",
            from.point, from.offset
        ))
    })?;
    candidate.blocks.try_reserve(1)?;
    candidate.blocks.push(partner);
    Ok(())
}
