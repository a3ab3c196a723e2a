//! Connection diagnostics: timing, counts and search statistics for each
//! stage.
//!
//! Every call to [`process`](crate::process) collects diagnostics
//! alongside the result. Timestamps come from the `web-time` crate, which
//! uses `performance.now()` on WASM and `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::search::SearchStats;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single connection run.
///
/// Stages after validation are `None` when they did not run (defects
/// were found, or a lone fragment bypassed the search).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectDiagnostics {
    /// Snapping, stripping and defect classification.
    pub validation: StageDiagnostics,
    /// Candidate discovery.
    pub candidates: Option<StageDiagnostics>,
    /// Connector crossing resolution.
    pub blocking: Option<StageDiagnostics>,
    /// Backtracking search.
    pub search: Option<StageDiagnostics>,
    /// Wall-clock duration of the whole call (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary across all stages.
    pub summary: ConnectSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Validation metrics.
    Validation {
        /// Input fragments.
        fragment_count: usize,
        /// Input points across all fragments.
        point_count: usize,
        /// Points left after duplicate stripping.
        prepared_point_count: usize,
        /// Defects found.
        defect_count: usize,
    },
    /// Candidate discovery metrics.
    Candidates {
        /// Strategy name.
        strategy: String,
        /// Connection points (two per fragment).
        endpoint_count: usize,
        /// Directed candidates.
        candidate_count: usize,
        /// Directed candidates of zero length.
        zero_length_count: usize,
    },
    /// Crossing resolution metrics.
    Blocking {
        /// Crossing connector pairs.
        blocking_pairs: usize,
    },
    /// Search metrics.
    Search {
        /// Work counters.
        stats: SearchStats,
        /// Whether a traversal was found.
        found: bool,
    },
}

/// Summary across all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectSummary {
    /// Input fragments.
    pub fragment_count: usize,
    /// Defects found.
    pub defect_count: usize,
    /// Whether the fragments were connected.
    pub connected: bool,
    /// Total length of the connected string.
    pub total_length: Option<f64>,
    /// Whether the connected string can be closed.
    pub can_close: bool,
}

impl ConnectDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Connection Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Fragments: {}  |  Defects: {}",
            self.summary.fragment_count, self.summary.defect_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages = vec![("Validation", &self.validation)];
        if let Some(ref c) = self.candidates {
            stages.push(("Candidates", c));
        }
        if let Some(ref b) = self.blocking {
            stages.push(("Blocking", b));
        }
        if let Some(ref s) = self.search {
            stages.push(("Search", s));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(match self.summary.total_length {
            Some(length) if self.summary.connected => format!(
                "Connected: length {length:.6}  |  can close: {}",
                self.summary.can_close
            ),
            _ => "Not connected".to_string(),
        });

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Validation {
            fragment_count,
            point_count,
            prepared_point_count,
            defect_count,
        } => format!(
            "fragments={fragment_count} points={point_count}->{prepared_point_count} defects={defect_count}"
        ),
        StageMetrics::Candidates {
            strategy,
            endpoint_count,
            candidate_count,
            zero_length_count,
        } => format!(
            "{strategy}: endpoints={endpoint_count} candidates={candidate_count} zero-length={zero_length_count}"
        ),
        StageMetrics::Blocking { blocking_pairs } => format!("crossing pairs={blocking_pairs}"),
        StageMetrics::Search { stats, found } => format!(
            "seeds={} extensions={} backtracks={} solutions={} pruned={} found={found}",
            stats.seeds, stats.extensions, stats.backtracks, stats.solutions, stats.pruned,
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> ConnectDiagnostics {
        ConnectDiagnostics {
            validation: StageDiagnostics {
                duration: Duration::from_millis(4),
                metrics: StageMetrics::Validation {
                    fragment_count: 3,
                    point_count: 7,
                    prepared_point_count: 6,
                    defect_count: 0,
                },
            },
            candidates: Some(StageDiagnostics {
                duration: Duration::from_millis(3),
                metrics: StageMetrics::Candidates {
                    strategy: "triangulated".to_string(),
                    endpoint_count: 6,
                    candidate_count: 10,
                    zero_length_count: 4,
                },
            }),
            blocking: Some(StageDiagnostics {
                duration: Duration::from_millis(1),
                metrics: StageMetrics::Blocking { blocking_pairs: 2 },
            }),
            search: Some(StageDiagnostics {
                duration: Duration::from_millis(2),
                metrics: StageMetrics::Search {
                    stats: SearchStats {
                        seeds: 6,
                        extensions: 12,
                        backtracks: 12,
                        solutions: 1,
                        pruned: 5,
                    },
                    found: true,
                },
            }),
            total_duration: Duration::from_millis(10),
            summary: ConnectSummary {
                fragment_count: 3,
                defect_count: 0,
                connected: true,
                total_length: Some(3.0),
                can_close: false,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage_that_ran() {
        let report = sample().report();
        for stage in ["Validation", "Candidates", "Blocking", "Search"] {
            assert!(report.contains(stage), "missing {stage} in\n{report}");
        }
        assert!(report.contains("Connected: length 3.000000"));

        let mut skipped = sample();
        skipped.candidates = None;
        skipped.blocking = None;
        skipped.search = None;
        skipped.summary.connected = false;
        let report = skipped.report();
        assert!(!report.contains("Blocking"));
        assert!(report.contains("Not connected"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.01).abs() < 1e-12);
        let back: ConnectDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(10));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<ConnectDiagnostics>(json).is_err());
    }
}
