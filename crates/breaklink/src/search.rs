//! Backtracking search for the shortest non-crossing traversal of every
//! fragment.
//!
//! The search is iterative: each level of the path is a [`Frame`] on an
//! explicit stack, so depth equals the fragment count without touching
//! the native stack. All mutable state (blocked counters, used marks,
//! frames) lives in one [`SearchContext`] that is reset between seeds.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::graph::{CandidateRef, ConnectionCandidate, ConnectivityGraph};
use crate::types::{ConnectError, Endpoint};

/// The winning traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPath {
    /// Endpoint the path starts from.
    pub seed: Endpoint,
    /// Chosen candidates in path order.
    pub steps: Vec<CandidateRef>,
    /// Sum of the chosen connector lengths.
    pub connector_length: f64,
    /// Whether an unblocked candidate leads from the last endpoint back
    /// to the seed.
    pub can_close: bool,
}

/// How a search ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchOutcome {
    /// At least one complete traversal exists; this is the shortest.
    Found(SearchPath),
    /// Every seed and branch was exhausted.
    Exhausted,
}

/// Work counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchStats {
    /// Seeds tried.
    pub seeds: u64,
    /// Candidates appended to a path.
    pub extensions: u64,
    /// Candidates undone.
    pub backtracks: u64,
    /// Complete traversals reached.
    pub solutions: u64,
    /// Levels abandoned because they could not beat the best length.
    pub pruned: u64,
}

/// One level of the path.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Connection point the path leaves from at this level.
    point: usize,
    /// First candidate offset not yet tried.
    next: usize,
    /// Offset currently appended, if any.
    chosen: Option<usize>,
    /// Connector length accumulated before this level.
    reached: f64,
}

/// Search state over one connectivity graph.
pub struct SearchContext<'g> {
    graph: &'g ConnectivityGraph,
    blocked: Vec<Vec<u32>>,
    used: Vec<bool>,
    used_count: usize,
    frames: Vec<Frame>,
    best: Option<SearchPath>,
    stats: SearchStats,
}

impl<'g> SearchContext<'g> {
    /// Allocate counters for every candidate of `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::ResourceExhausted`] if a table cannot be
    /// allocated.
    pub fn new(graph: &'g ConnectivityGraph) -> Result<Self, ConnectError> {
        let mut blocked = Vec::new();
        blocked.try_reserve_exact(graph.points().len())?;
        for point in graph.points() {
            let mut counters = Vec::new();
            counters.try_reserve_exact(point.candidates.len())?;
            counters.resize(point.candidates.len(), 0);
            blocked.push(counters);
        }

        let mut used = Vec::new();
        used.try_reserve_exact(graph.fragment_count())?;
        used.resize(graph.fragment_count(), false);

        let mut frames = Vec::new();
        frames.try_reserve_exact(graph.fragment_count())?;

        Ok(Self {
            graph,
            blocked,
            used,
            used_count: 0,
            frames,
            best: None,
            stats: SearchStats::default(),
        })
    }

    /// Clear blocked counters, used marks and the frame stack.
    pub fn reset(&mut self) {
        for counters in &mut self.blocked {
            counters.fill(0);
        }
        self.used.fill(false);
        self.used_count = 0;
        self.frames.clear();
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Best traversal found so far.
    #[must_use]
    pub const fn best(&self) -> Option<&SearchPath> {
        self.best.as_ref()
    }

    /// Try every endpoint as the seed and return the shortest traversal.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Inconsistent`] if the graph references a
    /// missing point, candidate or fragment.
    pub fn run(mut self) -> Result<(SearchOutcome, SearchStats), ConnectError> {
        if !self.graph.spans_all_fragments() {
            debug!("search: candidate graph does not span all fragments");
            return Ok((SearchOutcome::Exhausted, self.stats));
        }

        for id in 0..self.graph.points().len() {
            self.search_from(Endpoint::new(id))?;
        }

        debug!(
            "search: {} seeds, {} extensions, {} backtracks, {} solutions, {} pruned",
            self.stats.seeds,
            self.stats.extensions,
            self.stats.backtracks,
            self.stats.solutions,
            self.stats.pruned
        );
        let outcome = self
            .best
            .take()
            .map_or(SearchOutcome::Exhausted, SearchOutcome::Found);
        Ok((outcome, self.stats))
    }

    /// Explore every traversal starting at `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Inconsistent`] on a failed lookup.
    pub fn search_from(&mut self, seed: Endpoint) -> Result<(), ConnectError> {
        self.reset();
        self.stats.seeds += 1;
        self.mark(seed.fragment(), true)?;

        if self.used_count == self.graph.fragment_count() {
            return self.record(seed, 0.0);
        }

        self.frames.push(Frame {
            point: seed.opposite().id(),
            next: 0,
            chosen: None,
            reached: 0.0,
        });

        while let Some(depth) = self.frames.len().checked_sub(1) {
            let frame = self.frames[depth];
            if let Some(offset) = frame.chosen {
                self.retract(CandidateRef {
                    point: frame.point,
                    offset,
                })?;
                self.frames[depth].chosen = None;
            }

            let Some(offset) = self.next_alternative(&frame)? else {
                self.frames.pop();
                continue;
            };

            let step = CandidateRef {
                point: frame.point,
                offset,
            };
            let candidate = self.lookup(step)?;
            let reached = frame.reached + candidate.length;
            self.frames[depth].next = offset + 1;
            self.frames[depth].chosen = Some(offset);
            self.extend(step)?;

            if self.used_count == self.graph.fragment_count() {
                self.record(seed, reached)?;
            } else {
                self.frames.push(Frame {
                    point: candidate.target.opposite().id(),
                    next: 0,
                    chosen: None,
                    reached,
                });
            }
        }
        trace!(
            "seed {seed}: best so far {:?}",
            self.best.as_ref().map(|b| b.connector_length)
        );
        Ok(())
    }

    fn lookup(&self, r: CandidateRef) -> Result<&'g ConnectionCandidate, ConnectError> {
        self.graph.candidate(r).ok_or_else(|| {
            ConnectError::Inconsistent(format!("missing candidate {}:{}", r.point, r.offset))
        })
    }

    fn mark(&mut self, fragment: usize, used: bool) -> Result<(), ConnectError> {
        let slot = self.used.get_mut(fragment).ok_or_else(|| {
            ConnectError::Inconsistent(format!("candidate leads to unknown fragment {fragment}"))
        })?;
        *slot = used;
        if used {
            self.used_count += 1;
        } else {
            self.used_count -= 1;
        }
        Ok(())
    }

    /// Nearest untried candidate of `frame` that is unblocked and leads
    /// to an unused fragment.
    ///
    /// Candidates are ascending by length, so once one would reach the
    /// best length every later one would too and the level is abandoned.
    fn next_alternative(&mut self, frame: &Frame) -> Result<Option<usize>, ConnectError> {
        let graph = self.graph;
        let (Some(point), Some(blocked)) =
            (graph.points().get(frame.point), self.blocked.get(frame.point))
        else {
            return Err(ConnectError::Inconsistent(format!(
                "missing connection point {}",
                frame.point
            )));
        };

        for (offset, candidate) in point.candidates.iter().enumerate().skip(frame.next) {
            if let Some(best) = &self.best
                && frame.reached + candidate.length >= best.connector_length
            {
                self.stats.pruned += 1;
                return Ok(None);
            }
            let used = self.used.get(candidate.fragment()).copied().unwrap_or(true);
            if used || blocked.get(offset).copied().unwrap_or(0) > 0 {
                continue;
            }
            return Ok(Some(offset));
        }
        Ok(None)
    }

    fn extend(&mut self, step: CandidateRef) -> Result<(), ConnectError> {
        let candidate = self.lookup(step)?;
        self.mark(candidate.fragment(), true)?;
        for partner in &candidate.blocks {
            *self.counter(*partner)? += 1;
        }
        self.stats.extensions += 1;
        Ok(())
    }

    fn retract(&mut self, step: CandidateRef) -> Result<(), ConnectError> {
        let candidate = self.lookup(step)?;
        self.mark(candidate.fragment(), false)?;
        for partner in &candidate.blocks {
            let counter = self.counter(*partner)?;
            *counter = counter.checked_sub(1).ok_or_else(|| {
                ConnectError::Inconsistent(format!(
                    "blocked counter of {}:{} underflowed",
                    partner.point, partner.offset
                ))
            })?;
        }
        self.stats.backtracks += 1;
        Ok(())
    }

    fn counter(&mut self, r: CandidateRef) -> Result<&mut u32, ConnectError> {
        self.blocked
            .get_mut(r.point)
            .and_then(|counters| counters.get_mut(r.offset))
            .ok_or_else(|| {
                ConnectError::Inconsistent(format!("missing blocked counter {}:{}", r.point, r.offset))
            })
    }

    /// Keep the current path if it is strictly shorter than the best.
    fn record(&mut self, seed: Endpoint, reached: f64) -> Result<(), ConnectError> {
        self.stats.solutions += 1;
        if self
            .best
            .as_ref()
            .is_some_and(|best| reached >= best.connector_length)
        {
            return Ok(());
        }

        let mut steps = Vec::new();
        steps.try_reserve_exact(self.frames.len())?;
        steps.extend(self.frames.iter().filter_map(|f| {
            f.chosen.map(|offset| CandidateRef {
                point: f.point,
                offset,
            })
        }));

        let exit = match steps.last() {
            Some(&last) => self.lookup(last)?.target.opposite(),
            None => seed.opposite(),
        };
        let can_close = self.closable(exit, seed);
        trace!("seed {seed}: new best {reached} over {} steps", steps.len());

        self.best = Some(SearchPath {
            seed,
            steps,
            connector_length: reached,
            can_close,
        });
        Ok(())
    }

    /// Whether an unblocked candidate leads from `exit` back to `seed`.
    fn closable(&self, exit: Endpoint, seed: Endpoint) -> bool {
        if exit.fragment() == seed.fragment() {
            return false;
        }
        let (Some(point), Some(blocked)) =
            (self.graph.point(exit), self.blocked.get(exit.id()))
        else {
            return false;
        };
        point
            .candidates
            .iter()
            .zip(blocked)
            .any(|(candidate, &count)| candidate.target == seed && count == 0)
    }
}

/// Search `graph` for the shortest traversal.
///
/// # Errors
///
/// Returns [`ConnectError`] on allocation failure or a failed lookup.
pub fn search(graph: &ConnectivityGraph) -> Result<(SearchOutcome, SearchStats), ConnectError> {
    SearchContext::new(graph)?.run()
}
