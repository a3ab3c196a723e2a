//! breaklink: reconnect broken breakline fragments into one line string
//! (sans-IO).
//!
//! Given disjoint open polylines, finds which endpoints to join, in what
//! order and orientation, so the fragments form one continuous path whose
//! connectors cross neither each other nor any fragment. Among all such
//! paths the shortest is returned, together with whether it could also be
//! closed into a loop.
//!
//! validate -> candidate discovery -> crossing resolution -> search ->
//! assembly.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! fragments and returns structured data. Progress is reported through
//! the `log` facade; installing a logger is up to the caller.

pub mod assemble;
pub mod blocking;
pub mod diagnostics;
pub mod geometry;
pub mod graph;
pub mod search;
pub mod surface;
pub mod triangulation;
pub mod types;
pub mod validate;

use log::debug;
use serde::{Deserialize, Serialize};
use web_time::Instant;

pub use assemble::{ConnectOutcome, ConnectedString, ConnectedStringEntry};
pub use diagnostics::{ConnectDiagnostics, ConnectSummary, StageDiagnostics, StageMetrics};
pub use graph::{CandidateFinder, CandidateStrategy, ConnectivityGraph};
pub use surface::{DelaunayBuilder, Surface, SurfaceBuilder};
pub use types::{ConnectConfig, ConnectError, Endpoint, Fragment, Point};
pub use validate::{DefectKind, ValidationError};

use crate::search::SearchOutcome;

/// Everything one [`process`] call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectReport {
    /// Validation defects; connection is skipped unless this is empty.
    pub defects: Vec<ValidationError>,
    /// Connection result, when connection ran.
    pub outcome: Option<ConnectOutcome>,
    /// Per-stage timing and counts.
    pub diagnostics: ConnectDiagnostics,
}

/// Validate `fragments` with the default configuration.
///
/// Every defect is collected; the list order is deterministic.
///
/// # Errors
///
/// Returns [`ConnectError::EmptyInput`] for an empty slice and
/// [`ConnectError::ResourceExhausted`] on allocation failure.
pub fn validate(fragments: &[Fragment]) -> Result<Vec<ValidationError>, ConnectError> {
    validate_with(fragments, &ConnectConfig::default())
}

/// Validate `fragments` with an explicit configuration.
///
/// # Errors
///
/// As [`validate`], plus [`ConnectError::InvalidConfig`].
pub fn validate_with(
    fragments: &[Fragment],
    config: &ConnectConfig,
) -> Result<Vec<ValidationError>, ConnectError> {
    validate::validate_fragments(fragments, config)
}

/// Connect `fragments` with the default configuration.
///
/// `validation_errors` is the result of [`validate`]; it must be empty.
///
/// # Errors
///
/// Returns [`ConnectError::ValidationFailed`] if defects are outstanding,
/// [`ConnectError::EmptyInput`] for an empty slice, and
/// [`ConnectError::ResourceExhausted`] or [`ConnectError::Inconsistent`]
/// if a stage aborts. Finding no traversal is not an error.
pub fn connect(
    fragments: &[Fragment],
    validation_errors: &[ValidationError],
) -> Result<ConnectOutcome, ConnectError> {
    connect_with(fragments, validation_errors, &ConnectConfig::default())
}

/// Connect `fragments` with an explicit configuration.
///
/// # Errors
///
/// As [`connect`], plus [`ConnectError::InvalidConfig`].
pub fn connect_with(
    fragments: &[Fragment],
    validation_errors: &[ValidationError],
    config: &ConnectConfig,
) -> Result<ConnectOutcome, ConnectError> {
    if !validation_errors.is_empty() {
        return Err(ConnectError::ValidationFailed {
            count: validation_errors.len(),
        });
    }
    config.check()?;
    if fragments.is_empty() {
        return Err(ConnectError::EmptyInput);
    }
    let prepared = validate::prepare(fragments, config.snap_tolerance)?;
    Ok(connect_prepared(&prepared, config)?.0)
}

/// Validate and, if clean, connect `fragments`, recording diagnostics for
/// every stage that ran.
///
/// # Errors
///
/// Returns [`ConnectError`] for an empty slice, a bad configuration, or
/// an aborted stage. Defects and an exhausted search are reported in the
/// [`ConnectReport`], not as errors.
pub fn process(fragments: &[Fragment], config: &ConnectConfig) -> Result<ConnectReport, ConnectError> {
    let started = Instant::now();
    config.check()?;
    if fragments.is_empty() {
        return Err(ConnectError::EmptyInput);
    }

    let stage = Instant::now();
    let prepared = validate::prepare(fragments, config.snap_tolerance)?;
    let defects = validate::classify(&prepared, config.snap_tolerance)?;
    let validation = StageDiagnostics {
        duration: stage.elapsed(),
        metrics: StageMetrics::Validation {
            fragment_count: fragments.len(),
            point_count: fragments.iter().map(Fragment::len).sum(),
            prepared_point_count: prepared.iter().map(Fragment::len).sum(),
            defect_count: defects.len(),
        },
    };

    let (outcome, stages) = if defects.is_empty() {
        let (outcome, stages) = connect_prepared(&prepared, config)?;
        (Some(outcome), stages)
    } else {
        debug!("process: {} defect(s), connection skipped", defects.len());
        (None, Stages::default())
    };

    let connected = outcome.as_ref().and_then(ConnectOutcome::connected);
    let summary = ConnectSummary {
        fragment_count: fragments.len(),
        defect_count: defects.len(),
        connected: connected.is_some(),
        total_length: connected.map(|s| s.total_length),
        can_close: connected.is_some_and(|s| s.can_close),
    };

    Ok(ConnectReport {
        defects,
        outcome,
        diagnostics: ConnectDiagnostics {
            validation,
            candidates: stages.candidates,
            blocking: stages.blocking,
            search: stages.search,
            total_duration: started.elapsed(),
            summary,
        },
    })
}

/// Diagnostics of the stages after validation.
#[derive(Default)]
struct Stages {
    candidates: Option<StageDiagnostics>,
    blocking: Option<StageDiagnostics>,
    search: Option<StageDiagnostics>,
}

/// Run candidate discovery, crossing resolution, search and assembly on
/// already prepared fragments.
fn connect_prepared(
    prepared: &[Fragment],
    config: &ConnectConfig,
) -> Result<(ConnectOutcome, Stages), ConnectError> {
    if let [only] = prepared {
        let closed = geometry::is_closed(only.points(), config.snap_tolerance);
        debug!("connect: single fragment, closed={closed}");
        return Ok((
            ConnectOutcome::Connected(assemble::single(only, closed)),
            Stages::default(),
        ));
    }

    let stage = Instant::now();
    let mut graph = config.strategy.find(prepared, config)?;
    let candidates = StageDiagnostics {
        duration: stage.elapsed(),
        metrics: StageMetrics::Candidates {
            strategy: config.strategy.name().to_string(),
            endpoint_count: graph.points().len(),
            candidate_count: graph.candidate_count(),
            zero_length_count: graph.zero_length_count(),
        },
    };

    let stage = Instant::now();
    let blocking_pairs = blocking::resolve_blocking(&mut graph)?;
    let blocking = StageDiagnostics {
        duration: stage.elapsed(),
        metrics: StageMetrics::Blocking { blocking_pairs },
    };

    let stage = Instant::now();
    let (found, stats) = search::search(&graph)?;
    let outcome = match found {
        SearchOutcome::Found(path) => {
            ConnectOutcome::Connected(assemble::assemble(&path, &graph, prepared)?)
        }
        SearchOutcome::Exhausted => ConnectOutcome::NoSolution,
    };
    let search = StageDiagnostics {
        duration: stage.elapsed(),
        metrics: StageMetrics::Search {
            stats,
            found: matches!(outcome, ConnectOutcome::Connected(_)),
        },
    };

    if let ConnectOutcome::Connected(ref string) = outcome {
        debug!(
            "connect: {} fragments joined, length {}, can_close={}",
            string.len(),
            string.total_length,
            string.can_close
        );
    } else {
        debug!("connect: no non-crossing traversal of {} fragments", prepared.len());
    }

    Ok((
        outcome,
        Stages {
            candidates: Some(candidates),
            blocking: Some(blocking),
            search: Some(search),
        },
    ))
}
