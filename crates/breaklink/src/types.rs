//! Shared types for the breaklink connection engine.

use std::collections::TryReserveError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::CandidateStrategy;

/// A 3D point in survey coordinates.
///
/// Plan-view predicates (snapping, intersection, coincidence) use only
/// `x` and `y`; lengths use all three axes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
    /// Elevation. Defaults to `0.0` when omitted from serialized input.
    #[serde(default)]
    pub z: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Create a point at elevation zero.
    #[must_use]
    pub const fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Squared 3D Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx.mul_add(dx, dy.mul_add(dy, dz * dz))
    }

    /// 3D Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Distance in plan view, ignoring elevation.
    #[must_use]
    pub fn planar_distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Exact plan-view equality.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn same_position(self, other: Self) -> bool {
        self.x == other.x && self.y == other.y
    }

    /// Plan-view coordinate for `geo` and `rstar` queries.
    #[must_use]
    pub const fn coord(self) -> geo::Coord<f64> {
        geo::Coord {
            x: self.x,
            y: self.y,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One input open polyline to be connected to others.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fragment(Vec<Point>);

impl Fragment {
    /// Create a new fragment from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Create a flat fragment from plan coordinates.
    #[must_use]
    pub fn from_xy(coords: &[(f64, f64)]) -> Self {
        Self(coords.iter().map(|&(x, y)| Point::planar(x, y)).collect())
    }

    /// Returns `true` if the fragment has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the fragment.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the fragment and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Total 3D length along the fragment.
    #[must_use]
    pub fn length(&self) -> f64 {
        crate::geometry::polyline_length(&self.0)
    }

    /// The point at the given end of this fragment.
    #[must_use]
    pub fn endpoint(&self, start: bool) -> Option<Point> {
        let point = if start { self.first() } else { self.last() };
        point.copied()
    }
}

impl From<Vec<Point>> for Fragment {
    fn from(points: Vec<Point>) -> Self {
        Self(points)
    }
}

impl AsRef<[Point]> for Fragment {
    fn as_ref(&self) -> &[Point] {
        &self.0
    }
}

/// One of the two ends of a fragment.
///
/// Endpoint `2 * f` is the start of fragment `f` and `2 * f + 1` its end,
/// so `N` fragments have exactly `2N` endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(usize);

impl Endpoint {
    /// Endpoint with the given raw id.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// The start endpoint of `fragment`.
    #[must_use]
    pub const fn start(fragment: usize) -> Self {
        Self(fragment * 2)
    }

    /// The end endpoint of `fragment`.
    #[must_use]
    pub const fn end(fragment: usize) -> Self {
        Self(fragment * 2 + 1)
    }

    /// Raw endpoint id in `[0, 2N)`.
    #[must_use]
    pub const fn id(self) -> usize {
        self.0
    }

    /// Index of the fragment this endpoint belongs to.
    #[must_use]
    pub const fn fragment(self) -> usize {
        self.0 / 2
    }

    /// Whether this is the first point of its fragment.
    #[must_use]
    pub const fn is_start(self) -> bool {
        self.0 % 2 == 0
    }

    /// The other end of the same fragment.
    #[must_use]
    pub const fn opposite(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Position of this endpoint within `fragments`.
    #[must_use]
    pub fn position(self, fragments: &[Fragment]) -> Option<Point> {
        fragments
            .get(self.fragment())
            .and_then(|f| f.endpoint(self.is_start()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_start() { "start" } else { "end" };
        write!(f, "fragment {} {side}", self.fragment())
    }
}

/// Configuration for validation and connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Plan distance under which endpoints of different fragments are
    /// snapped together, and under which a fragment's ends count as closed.
    pub snap_tolerance: f64,

    /// How candidate connections between endpoints are discovered.
    pub strategy: CandidateStrategy,

    /// Fraction of the fragments' bounding box added on every side of the
    /// auxiliary surface (triangulated strategy only).
    pub surface_padding: f64,
}

impl ConnectConfig {
    /// Default endpoint snap tolerance.
    pub const DEFAULT_SNAP_TOLERANCE: f64 = 1e-5;
    /// Default surface padding (10% beyond the bounding box).
    pub const DEFAULT_SURFACE_PADDING: f64 = 0.1;
    /// Default candidate discovery strategy.
    pub const DEFAULT_STRATEGY: CandidateStrategy = CandidateStrategy::Triangulated;

    /// Check that every tolerance is finite and non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidConfig`] naming the offending field.
    pub fn check(&self) -> Result<(), ConnectError> {
        if !self.snap_tolerance.is_finite() || self.snap_tolerance < 0.0 {
            return Err(ConnectError::InvalidConfig(format!(
                "snap_tolerance must be finite and >= 0, got {}",
                self.snap_tolerance
            )));
        }
        if !self.surface_padding.is_finite() || self.surface_padding < 0.0 {
            return Err(ConnectError::InvalidConfig(format!(
                "surface_padding must be finite and >= 0, got {}",
                self.surface_padding
            )));
        }
        Ok(())
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            snap_tolerance: Self::DEFAULT_SNAP_TOLERANCE,
            strategy: Self::DEFAULT_STRATEGY,
            surface_padding: Self::DEFAULT_SURFACE_PADDING,
        }
    }
}

/// Errors that abort a validation or connection call.
///
/// An exhausted search is not an error; it is reported as
/// [`ConnectOutcome::NoSolution`](crate::ConnectOutcome::NoSolution).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ConnectError {
    /// No fragments were supplied.
    #[error("no fragments to connect")]
    EmptyInput,

    /// `connect` was handed outstanding validation defects.
    #[error("{count} validation defect(s) must be resolved before connecting")]
    ValidationFailed {
        /// Number of defects passed in.
        count: usize,
    },

    /// Configuration is invalid.
    #[error("invalid connection configuration: {0}")]
    InvalidConfig(String),

    /// A working table could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An index lookup or structural invariant failed.
    #[error("internal inconsistency: {0}")]
    Inconsistent(String),
}

impl From<TryReserveError> for ConnectError {
    fn from(err: TryReserveError) -> Self {
        Self::ResourceExhausted(err.to_string())
    }
}
