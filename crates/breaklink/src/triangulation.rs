//! Constrained Delaunay triangulation on top of `delaunator`.
//!
//! `delaunator` triangulates the vertex set. Every constraint segment the
//! result lacks is then recovered by flipping the edges it crosses, and a
//! final Lawson pass flips unconstrained edges that fail the in-circle
//! test. Constrained edges are never flipped, so a vertex hidden behind a
//! constraint cannot evict an edge on the other side.

use std::collections::{HashMap, HashSet, VecDeque};

use geo::Coord;
use log::debug;

use crate::types::ConnectError;

/// Undirected edge, smaller vertex first.
pub type Edge = (usize, usize);

/// Flips allowed per edge before the Lawson pass stops.
const FLIPS_PER_EDGE: usize = 64;

/// Relative in-circle margin below which points count as co-circular.
const IN_CIRCLE_EPSILON: f64 = 1e-12;

/// Normalize `a-b` into an [`Edge`].
#[must_use]
pub const fn edge_key(a: usize, b: usize) -> Edge {
    if a < b { (a, b) } else { (b, a) }
}

/// Twice the signed area of `a b c`; positive when `c` is left of `a -> b`.
fn orient(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x).mul_add(c.y - a.y, -((b.y - a.y) * (c.x - a.x)))
}

/// Whether the open segments `a-b` and `c-d` cross at a single point.
fn crosses(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>, d: Coord<f64>) -> bool {
    orient(a, b, c) * orient(a, b, d) < 0.0 && orient(c, d, a) * orient(c, d, b) < 0.0
}

/// Whether `d` lies strictly inside the circumcircle of the
/// counter-clockwise triangle `a b c`.
#[allow(clippy::many_single_char_names)]
fn in_circle(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>, d: Coord<f64>) -> bool {
    let (adx, ady) = (a.x - d.x, a.y - d.y);
    let (bdx, bdy) = (b.x - d.x, b.y - d.y);
    let (cdx, cdy) = (c.x - d.x, c.y - d.y);
    let ad = adx.mul_add(adx, ady * ady);
    let bd = bdx.mul_add(bdx, bdy * bdy);
    let cd = cdx.mul_add(cdx, cdy * cdy);
    let det = adx * bdy.mul_add(cd, -(bd * cdy)) - ady * bdx.mul_add(cd, -(bd * cdx))
        + ad * bdx.mul_add(cdy, -(bdy * cdx));
    let scale = (ad + bd + cd) * (ad + bd + cd);
    det > IN_CIRCLE_EPSILON * scale
}

/// Result of walking from one vertex toward another.
enum Walk {
    /// Edges crossed by the open segment, in walking order.
    Crossed(Vec<(usize, usize)>),
    /// A vertex lies inside the segment.
    Through(usize),
    /// The segment crosses an edge that is already constrained.
    Blocked,
}

/// Counter-clockwise triangles indexed by directed edge.
pub struct ConstrainedTriangulation<'a> {
    vertices: &'a [Coord<f64>],
    triangles: Vec<[usize; 3]>,
    owner: HashMap<(usize, usize), usize>,
    spoke: Vec<Option<usize>>,
    constrained: HashSet<Edge>,
}

impl<'a> ConstrainedTriangulation<'a> {
    /// Delaunay triangulation of `vertices` with no constraints yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Inconsistent`] if `delaunator` produces no
    /// triangles or references an unknown vertex, and
    /// [`ConnectError::ResourceExhausted`] if the triangle table cannot be
    /// allocated.
    pub fn new(vertices: &'a [Coord<f64>]) -> Result<Self, ConnectError> {
        let points: Vec<delaunator::Point> = vertices
            .iter()
            .map(|c| delaunator::Point { x: c.x, y: c.y })
            .collect();
        let result = delaunator::triangulate(&points);
        if result.triangles.is_empty() {
            return Err(ConnectError::Inconsistent(format!(
                "triangulation of {} vertices produced no triangles",
                vertices.len()
            )));
        }

        let mut triangles = Vec::new();
        triangles.try_reserve_exact(result.triangles.len() / 3)?;
        let mut owner = HashMap::with_capacity(result.triangles.len());
        let mut spoke = vec![None; vertices.len()];

        for tri in result.triangles.chunks_exact(3) {
            let (a, mut b, mut c) = (tri[0], tri[1], tri[2]);
            let (Some(&pa), Some(&pb), Some(&pc)) =
                (vertices.get(a), vertices.get(b), vertices.get(c))
            else {
                return Err(ConnectError::Inconsistent(format!(
                    "triangle references vertex {a}, {b} or {c} of {}",
                    vertices.len()
                )));
            };
            if orient(pa, pb, pc) < 0.0 {
                std::mem::swap(&mut b, &mut c);
            }
            let id = triangles.len();
            triangles.push([a, b, c]);
            for (from, to) in [(a, b), (b, c), (c, a)] {
                owner.insert((from, to), id);
                spoke[from] = Some(to);
            }
        }

        Ok(Self {
            vertices,
            triangles,
            owner,
            spoke,
            constrained: HashSet::new(),
        })
    }

    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether `a-b` is an edge in either direction.
    #[must_use]
    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.owner.contains_key(&(a, b)) || self.owner.contains_key(&(b, a))
    }

    /// Whether `a-b` was recovered as a constraint.
    #[must_use]
    pub fn is_constrained(&self, a: usize, b: usize) -> bool {
        self.constrained.contains(&edge_key(a, b))
    }

    fn at(&self, v: usize) -> Option<Coord<f64>> {
        self.vertices.get(v).copied()
    }

    /// Third vertex of the triangle holding directed edge `a -> b`.
    fn apex(&self, a: usize, b: usize) -> Option<usize> {
        let tri = self.triangles.get(*self.owner.get(&(a, b))?)?;
        tri.iter().copied().find(|&v| v != a && v != b)
    }

    /// Replace edge `a-b` by the diagonal joining its two apexes.
    ///
    /// The caller guarantees the surrounding quad is strictly convex.
    fn flip(&mut self, a: usize, b: usize) -> Option<(usize, usize)> {
        let left = *self.owner.get(&(a, b))?;
        let right = *self.owner.get(&(b, a))?;
        let c = self.apex(a, b)?;
        let d = self.apex(b, a)?;

        self.owner.remove(&(a, b));
        self.owner.remove(&(b, a));
        *self.triangles.get_mut(left)? = [a, d, c];
        *self.triangles.get_mut(right)? = [d, b, c];
        for (edge, id) in [
            ((a, d), left),
            ((d, c), left),
            ((c, a), left),
            ((d, b), right),
            ((b, c), right),
            ((c, d), right),
        ] {
            self.owner.insert(edge, id);
        }

        if self.spoke.get(a) == Some(&Some(b)) {
            self.spoke[a] = Some(d);
        }
        if self.spoke.get(b) == Some(&Some(a)) {
            self.spoke[b] = Some(c);
        }
        Some((c, d))
    }

    /// Walk the triangles from `u` toward `v`, collecting crossed edges as
    /// `(right, left)` pairs relative to `u -> v`.
    #[allow(clippy::float_cmp)]
    fn walk(&self, u: usize, v: usize) -> Option<Walk> {
        let pu = self.at(u)?;
        let pv = self.at(v)?;
        let direction = Coord {
            x: pv.x - pu.x,
            y: pv.y - pu.y,
        };

        let start = (*self.spoke.get(u)?)?;
        let mut b = start;
        let mut first = None;
        for _ in 0..self.triangles.len() {
            let c = self.apex(u, b)?;
            let pb = self.at(b)?;
            let side = orient(pu, pv, pb);
            if side == 0.0 && (pb.x - pu.x).mul_add(direction.x, (pb.y - pu.y) * direction.y) > 0.0
            {
                return Some(Walk::Through(b));
            }
            if side < 0.0 && orient(pu, pv, self.at(c)?) > 0.0 {
                first = Some((b, c));
                break;
            }
            b = c;
            if b == start {
                break;
            }
        }

        let (mut right, mut left) = first?;
        let mut crossed = Vec::new();
        for _ in 0..self.triangles.len() {
            if self.constrained.contains(&edge_key(right, left)) {
                return Some(Walk::Blocked);
            }
            crossed.push((right, left));
            let w = self.apex(left, right)?;
            if w == v {
                return Some(Walk::Crossed(crossed));
            }
            let side = orient(pu, pv, self.at(w)?);
            if side == 0.0 {
                return Some(Walk::Through(w));
            }
            if side > 0.0 {
                left = w;
            } else {
                right = w;
            }
        }
        None
    }

    /// Flip the `crossed` edges away until `u-v` appears.
    fn recover(&mut self, u: usize, v: usize, crossed: Vec<(usize, usize)>) -> bool {
        let (Some(pu), Some(pv)) = (self.at(u), self.at(v)) else {
            return false;
        };
        let mut queue: VecDeque<(usize, usize)> = crossed.into();
        let mut stalled = 0;
        while let Some((a, b)) = queue.pop_front() {
            let (Some(c), Some(d)) = (self.apex(a, b), self.apex(b, a)) else {
                return false;
            };
            let (Some(pa), Some(pb), Some(pc), Some(pd)) =
                (self.at(a), self.at(b), self.at(c), self.at(d))
            else {
                return false;
            };
            if !crosses(pa, pb, pc, pd) {
                // Not yet convex; another flip will open it up.
                queue.push_back((a, b));
                stalled += 1;
                if stalled > queue.len() {
                    return false;
                }
                continue;
            }
            stalled = 0;
            if self.flip(a, b).is_none() {
                return false;
            }
            if crosses(pc, pd, pu, pv) {
                queue.push_back((c, d));
            }
        }
        self.has_edge(u, v)
    }

    /// Make `u-v` an edge that later flips keep.
    ///
    /// A vertex lying inside the segment splits it and both halves are
    /// constrained. Returns `false` when some part crosses an earlier
    /// constraint or could not be recovered; the triangulation stays valid
    /// either way.
    pub fn insert_constraint(&mut self, u: usize, v: usize) -> bool {
        let mut pending = vec![(u, v)];
        let mut recovered = true;
        while let Some((from, to)) = pending.pop() {
            if from == to {
                continue;
            }
            if self.has_edge(from, to) {
                self.constrained.insert(edge_key(from, to));
                continue;
            }
            match self.walk(from, to) {
                Some(Walk::Through(w)) => {
                    pending.push((w, to));
                    pending.push((from, w));
                }
                Some(Walk::Crossed(crossed)) if self.recover(from, to, crossed.clone()) => {
                    self.constrained.insert(edge_key(from, to));
                }
                _ => recovered = false,
            }
        }
        recovered
    }

    /// Lawson pass: flip unconstrained edges whose far apex lies inside the
    /// circumcircle until none is left. Returns the number of flips.
    pub fn restore_delaunay(&mut self) -> usize {
        let mut stack: Vec<Edge> = self.owner.keys().map(|&(a, b)| edge_key(a, b)).collect();
        stack.sort_unstable();
        stack.dedup();
        let limit = stack.len().saturating_mul(FLIPS_PER_EDGE);

        let mut flips = 0;
        while let Some((a, b)) = stack.pop() {
            if self.constrained.contains(&(a, b)) {
                continue;
            }
            let (Some(c), Some(d)) = (self.apex(a, b), self.apex(b, a)) else {
                continue;
            };
            let (Some(pa), Some(pb), Some(pc), Some(pd)) =
                (self.at(a), self.at(b), self.at(c), self.at(d))
            else {
                continue;
            };
            if !in_circle(pa, pb, pc, pd) || !crosses(pa, pb, pc, pd) {
                continue;
            }
            if self.flip(a, b).is_none() {
                continue;
            }
            flips += 1;
            if flips >= limit {
                debug!("lawson pass stopped after {flips} flips");
                break;
            }
            stack.extend([
                edge_key(a, d),
                edge_key(d, b),
                edge_key(b, c),
                edge_key(c, a),
            ]);
        }
        flips
    }

    /// Adjacency lists, ascending and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::ResourceExhausted`] if the table cannot be
    /// allocated.
    pub fn neighbors(&self) -> Result<Vec<Vec<usize>>, ConnectError> {
        let mut neighbors: Vec<Vec<usize>> = Vec::new();
        neighbors.try_reserve_exact(self.vertices.len())?;
        neighbors.resize_with(self.vertices.len(), Vec::new);
        for &(a, b) in self.owner.keys() {
            if let Some(list) = neighbors.get_mut(a) {
                list.push(b);
            }
            if let Some(list) = neighbors.get_mut(b) {
                list.push(a);
            }
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        Ok(neighbors)
    }
}
