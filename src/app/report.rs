use ratchet_core::SegmentOutcome;
use ratchet_core::control::HistoryRecord;
use ratchet_core::error::{DatabaseError as _, Error, RatchetResult};
use ratchet_core::upgrade::{PatchSegment, SegmentKind};

use chrono::{DateTime, Utc};
use display_json::{DebugAsJson, DisplayAsJsonPretty};
use serde::Serialize;

/// Attach a partial upgrade report to an error in case a run failed after
/// some segments were already completed.
pub trait AttachReport<T> {
    /// Return the partial report as context for the error.
    fn with_report(self, segments: &[SegmentResult]) -> RatchetResult<T>;
}

impl<T> AttachReport<T> for RatchetResult<T> {
    fn with_report(self, segments: &[SegmentResult]) -> RatchetResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(Error::Partial {
                source: Box::new(e),
                report: Box::new(Report::new(segments.to_vec())),
            }),
        }
    }
}

/// A collection of segment results, in the order the segments ran or would
/// run.
#[derive(Clone, Serialize, DebugAsJson, DisplayAsJsonPretty, Default)]
pub struct Report {
    segments: Vec<SegmentResult>,
}

impl Report {
    pub(super) fn new(segments: Vec<SegmentResult>) -> Self {
        Self { segments }
    }

    /// Return the vector of results.
    pub fn results(&self) -> Vec<SegmentResult> {
        self.segments.clone()
    }

    /// Return an iterator of the segment results.
    pub fn iter_results(&self) -> impl Iterator<Item = &SegmentResult> {
        self.segments.iter()
    }

    /// The number of segments in the report.
    pub fn count(&self) -> usize {
        self.segments.len()
    }

    /// The version the last segment ends at, if there is one.
    pub fn version(&self) -> Option<&str> {
        self.segments.last().map(|s| s.target.as_str())
    }
}

/// A formatted segment result.
#[derive(Clone, Serialize, DebugAsJson, DisplayAsJsonPretty)]
pub struct SegmentResult {
    dryrun: bool,
    kind: SegmentKind,
    source: Option<String>,
    target: String,
    open: bool,
    state: SegmentState,
    statements: i64,
    resumed_from: i64,
    executed: usize,
    suppressed: usize,
    skipped: usize,
    started_at: Option<DateTime<Utc>>,
    duration_ms: RunDuration,
}

impl SegmentResult {
    pub(crate) fn from_outcome(
        segment: &PatchSegment,
        outcome: &SegmentOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (Utc::now() - started_at).num_milliseconds();
        Self {
            dryrun: false,
            kind: segment.kind(),
            source: segment.source().map(str::to_string),
            target: segment.target().to_string(),
            open: segment.is_open(),
            state: SegmentState::Applied,
            statements: outcome.statements,
            resumed_from: outcome.resumed,
            executed: outcome.executed,
            suppressed: outcome.suppressed,
            skipped: outcome.skipped,
            started_at: Some(started_at),
            duration_ms: RunDuration::Duration(duration_ms),
        }
    }

    /// A segment of a dry run; `statements` counts the persistent commands
    /// of its body.
    pub(crate) fn planned(segment: &PatchSegment, statements: i64, resumed_from: i64) -> Self {
        Self {
            dryrun: true,
            kind: segment.kind(),
            source: segment.source().map(str::to_string),
            target: segment.target().to_string(),
            open: segment.is_open(),
            state: SegmentState::Planned,
            statements,
            resumed_from,
            executed: 0,
            suppressed: 0,
            skipped: 0,
            started_at: None,
            duration_ms: RunDuration::NotRun,
        }
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_applied(&self) -> bool {
        self.state == SegmentState::Applied
    }

    /// Position of the last persistent command of the segment.
    pub fn statements(&self) -> i64 {
        self.statements
    }

    /// Statements already committed by an earlier run.
    pub fn resumed_from(&self) -> i64 {
        self.resumed_from
    }

    pub fn executed(&self) -> usize {
        self.executed
    }

    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum SegmentState {
    Applied,
    Planned,
}

#[derive(Debug, Clone, Copy, Serialize)]
enum RunDuration {
    Duration(i64),
    NotRun,
}

/// The rows of the log table.
#[derive(Clone, Serialize, DebugAsJson, DisplayAsJsonPretty, Default)]
pub struct HistoryReport {
    version: Option<String>,
    records: Vec<HistoryRecord>,
}

impl HistoryReport {
    pub(super) fn new(version: Option<String>, records: Vec<HistoryRecord>) -> Self {
        Self { version, records }
    }

    /// The current version of the database.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// Completed transitions that were not undone by a downgrade.
    pub fn completed(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records
            .iter()
            .filter(|r| r.is_complete_transition_to(&r.target))
    }

    /// The report as compact JSON, one document for the whole history.
    pub fn to_json(&self) -> RatchetResult<String> {
        serde_json::to_string(self).ratchet_result()
    }
}
