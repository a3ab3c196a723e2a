//! Connected string assembly: turn the winning search path into the
//! public ordered result.

use serde::{Deserialize, Serialize};

use crate::geometry::SegmentIndex;
use crate::graph::ConnectivityGraph;
use crate::search::SearchPath;
use crate::types::{ConnectError, Fragment, Point};

/// One fragment in the connected order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedStringEntry {
    /// Index of the fragment in the caller's input.
    pub fragment: usize,
    /// Whether the fragment is traversed end to start.
    pub reversed: bool,
}

/// Every fragment exactly once, in traversal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedString {
    /// Ordered entries.
    pub entries: Vec<ConnectedStringEntry>,
    /// Fragment lengths plus connector lengths.
    pub total_length: f64,
    /// Whether a connector from the last endpoint back to the first would
    /// cross nothing already selected.
    pub can_close: bool,
}

/// Result of a connection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectOutcome {
    /// The fragments were joined.
    Connected(ConnectedString),
    /// No non-crossing traversal of every fragment exists among the
    /// discovered candidates.
    NoSolution,
}

impl ConnectOutcome {
    /// The connected string, if one was found.
    #[must_use]
    pub const fn connected(&self) -> Option<&ConnectedString> {
        match self {
            Self::Connected(string) => Some(string),
            Self::NoSolution => None,
        }
    }
}

impl ConnectedString {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fragment indices in traversal order.
    pub fn fragments(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|e| e.fragment)
    }

    /// Points of `entry` in traversal direction.
    fn oriented<'f>(
        entry: ConnectedStringEntry,
        fragments: &'f [Fragment],
    ) -> Result<Box<dyn Iterator<Item = Point> + 'f>, ConnectError> {
        let points = fragments
            .get(entry.fragment)
            .ok_or_else(|| {
                ConnectError::Inconsistent(format!("entry references missing fragment {}", entry.fragment))
            })?
            .points();
        Ok(if entry.reversed {
            Box::new(points.iter().rev().copied())
        } else {
            Box::new(points.iter().copied())
        })
    }

    fn entry_ends(entry: ConnectedStringEntry, fragments: &[Fragment]) -> Result<[Point; 2], ConnectError> {
        let fragment = fragments.get(entry.fragment).ok_or_else(|| {
            ConnectError::Inconsistent(format!("entry references missing fragment {}", entry.fragment))
        })?;
        match (fragment.first(), fragment.last()) {
            (Some(&first), Some(&last)) if entry.reversed => Ok([last, first]),
            (Some(&first), Some(&last)) => Ok([first, last]),
            _ => Err(ConnectError::Inconsistent(format!(
                "fragment {} is empty",
                entry.fragment
            ))),
        }
    }

    /// Connector segments between consecutive entries, in order.
    ///
    /// `fragments` must be the slice passed to `connect`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Inconsistent`] if an entry does not match
    /// `fragments`.
    pub fn connectors(&self, fragments: &[Fragment]) -> Result<Vec<[Point; 2]>, ConnectError> {
        let mut connectors = Vec::new();
        connectors.try_reserve_exact(self.entries.len().saturating_sub(1))?;
        for pair in self.entries.windows(2) {
            let [_, exit] = Self::entry_ends(pair[0], fragments)?;
            let [enter, _] = Self::entry_ends(pair[1], fragments)?;
            connectors.push([exit, enter]);
        }
        Ok(connectors)
    }

    /// The connector that would close the string, when it can be closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Inconsistent`] if an entry does not match
    /// `fragments`.
    pub fn closing_connector(&self, fragments: &[Fragment]) -> Result<Option<[Point; 2]>, ConnectError> {
        if !self.can_close {
            return Ok(None);
        }
        let (Some(&first), Some(&last)) = (self.entries.first(), self.entries.last()) else {
            return Ok(None);
        };
        let [start, _] = Self::entry_ends(first, fragments)?;
        let [_, end] = Self::entry_ends(last, fragments)?;
        Ok(Some([end, start]))
    }

    /// Join every fragment into one polyline, optionally closed.
    ///
    /// A zero-length junction does not repeat its point. `close` is
    /// ignored when the string cannot be closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if an entry does not match `fragments` or
    /// the output cannot be allocated.
    pub fn to_fragment(&self, fragments: &[Fragment], close: bool) -> Result<Fragment, ConnectError> {
        let total: usize = self
            .entries
            .iter()
            .filter_map(|e| fragments.get(e.fragment))
            .map(Fragment::len)
            .sum();
        let mut points: Vec<Point> = Vec::new();
        points.try_reserve_exact(total + 1)?;

        for &entry in &self.entries {
            for point in Self::oriented(entry, fragments)? {
                if points.last().is_some_and(|last| *last == point) {
                    continue;
                }
                points.push(point);
            }
        }

        if close
            && self.can_close
            && let Some(&first) = points.first()
            && points.last().is_some_and(|last| *last != first)
        {
            points.push(first);
        }
        Ok(Fragment::new(points))
    }
}

/// Turn a search path into a connected string over `fragments`.
///
/// # Errors
///
/// Returns [`ConnectError::Inconsistent`] if the path references a
/// missing candidate or fragment.
pub fn assemble(
    path: &SearchPath,
    graph: &ConnectivityGraph,
    fragments: &[Fragment],
) -> Result<ConnectedString, ConnectError> {
    let mut entries = Vec::new();
    entries.try_reserve_exact(path.steps.len() + 1)?;
    entries.push(ConnectedStringEntry {
        fragment: path.seed.fragment(),
        reversed: !path.seed.is_start(),
    });
    for step in &path.steps {
        let candidate = graph.candidate(*step).ok_or_else(|| {
            ConnectError::Inconsistent(format!("path references missing candidate {}:{}", step.point, step.offset))
        })?;
        entries.push(ConnectedStringEntry {
            fragment: candidate.fragment(),
            reversed: !candidate.target.is_start(),
        });
    }

    let mut fragment_length = 0.0;
    for entry in &entries {
        let fragment = fragments.get(entry.fragment).ok_or_else(|| {
            ConnectError::Inconsistent(format!("path references missing fragment {}", entry.fragment))
        })?;
        fragment_length += fragment.length();
    }

    Ok(ConnectedString {
        entries,
        total_length: fragment_length + path.connector_length,
        can_close: path.can_close,
    })
}

/// The trivial string of a lone fragment.
///
/// A closed fragment can always be closed; an open one only when the
/// segment from its end back to its start meets it nowhere else.
#[must_use]
pub fn single(fragment: &Fragment, closed: bool) -> ConnectedString {
    let can_close = closed
        || match (fragment.first(), fragment.last()) {
            (Some(first), Some(last)) if fragment.len() >= 2 => {
                !SegmentIndex::new(std::slice::from_ref(fragment)).obstructs(last.coord(), first.coord())
            }
            _ => false,
        };
    ConnectedString {
        entries: vec![ConnectedStringEntry {
            fragment: 0,
            reversed: false,
        }],
        total_length: fragment.length(),
        can_close,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn string(entries: &[(usize, bool)], can_close: bool) -> ConnectedString {
        ConnectedString {
            entries: entries
                .iter()
                .map(|&(fragment, reversed)| ConnectedStringEntry { fragment, reversed })
                .collect(),
            total_length: 0.0,
            can_close,
        }
    }

    fn chain() -> Vec<Fragment> {
        vec![
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(2.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(2.0, 0.0), (3.0, 0.0)]),
        ]
    }

    #[test]
    fn connectors_follow_orientation() {
        let s = string(&[(0, false), (1, true), (2, false)], false);
        let connectors = s.connectors(&chain()).unwrap();
        assert_eq!(connectors.len(), 2);
        assert_eq!(connectors[0], [Point::planar(1.0, 0.0), Point::planar(1.0, 0.0)]);
        assert_eq!(connectors[1], [Point::planar(2.0, 0.0), Point::planar(2.0, 0.0)]);
        assert_eq!(s.closing_connector(&chain()).unwrap(), None);
    }

    #[test]
    fn joined_polyline_skips_repeated_junctions() {
        let s = string(&[(0, false), (1, true), (2, false)], false);
        let joined = s.to_fragment(&chain(), true).unwrap();
        assert_eq!(
            joined,
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)])
        );
    }

    #[test]
    fn closing_appends_the_first_point() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (0.0, 1.0)]),
            Fragment::from_xy(&[(1.0, 1.0), (1.0, 0.0)]),
        ];
        let s = string(&[(0, false), (1, false)], true);
        let joined = s.to_fragment(&fragments, true).unwrap();
        assert_eq!(joined.len(), 5);
        assert_eq!(joined.first(), joined.last());
        assert_eq!(
            s.closing_connector(&fragments).unwrap(),
            Some([Point::planar(1.0, 0.0), Point::planar(0.0, 0.0)])
        );
        assert_eq!(s.to_fragment(&fragments, false).unwrap().len(), 4);
    }

    #[test]
    fn bad_entry_is_inconsistent() {
        let s = string(&[(0, false), (9, false)], false);
        assert!(matches!(
            s.connectors(&chain()),
            Err(ConnectError::Inconsistent(_))
        ));
    }

    #[test]
    fn single_open_fragment_closability() {
        let u = Fragment::from_xy(&[(0.0, 0.0), (0.0, -1.0), (1.0, -1.0), (1.0, 0.0)]);
        assert!(single(&u, false).can_close);

        let straight = Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]);
        assert!(!single(&straight, false).can_close);

        let square = Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        let s = single(&square, true);
        assert!(s.can_close);
        assert_eq!(s.entries, vec![ConnectedStringEntry { fragment: 0, reversed: false }]);
        assert!((s.total_length - (2.0 + 2.0_f64.sqrt())).abs() < 1e-12);
    }

    #[test]
    fn outcome_accessor() {
        assert!(ConnectOutcome::NoSolution.connected().is_none());
        let s = string(&[(0, false)], false);
        assert_eq!(ConnectOutcome::Connected(s.clone()).connected(), Some(&s));
    }
}
