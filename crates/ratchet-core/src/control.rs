//! Durable bookkeeping of upgrade progress in the target database.
//!
//! The version table holds a single row: the completed version, the version
//! a segment is currently moving to, and how many of that segment's
//! statements are committed. The log table is append-only.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::Executor;
use crate::error::RatchetResult;
use crate::upgrade::PatchSegment;

/// `kind` of a log row for a completed or downgraded transition.
pub const TRANSITION: &str = "B";
/// `kind` of a log row for one statement.
pub const STATEMENT: &str = "S";
/// `result` of a completed transition.
pub const COMPLETE: &str = "COMPLETE";
/// `result` of a transition undone by a downgrade.
pub const DOWNGRADED: &str = "DOWNGRADED";

/// Names of the two control tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTables {
    version_table: String,
    log_table: String,
}

impl ControlTables {
    pub fn new<V: Into<String>, L: Into<String>>(version_table: V, log_table: L) -> Self {
        Self {
            version_table: version_table.into(),
            log_table: log_table.into(),
        }
    }

    pub fn version_table(&self) -> &str {
        &self.version_table
    }

    pub fn log_table(&self) -> &str {
        &self.log_table
    }
}

impl Default for ControlTables {
    fn default() -> Self {
        Self::new("dbversion", "dbversionlog")
    }
}

/// The row of the version table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "sqlx_derive", derive(sqlx::FromRow))]
pub struct ControlState {
    /// The last completed version, `None` before the first segment.
    pub version: Option<String>,
    /// The target of a segment that started but did not complete.
    pub target: Option<String>,
    /// Position of the last committed statement of that segment.
    pub statements: i64,
}

impl ControlState {
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The target of the partially applied segment, if any.
    pub fn in_flight(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

/// A row of the log table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "sqlx_derive", derive(sqlx::FromRow))]
pub struct HistoryRecord {
    /// [`TRANSITION`] or [`STATEMENT`].
    pub kind: String,
    pub source: Option<String>,
    pub target: String,
    pub statement: i64,
    pub stamp: DateTime<Utc>,
    pub command: Option<String>,
    pub result: Option<String>,
}

impl HistoryRecord {
    /// The record of a completed segment.
    pub fn complete(segment: &PatchSegment, statements: i64) -> Self {
        Self {
            kind: TRANSITION.to_string(),
            source: segment.source().map(str::to_string),
            target: segment.target().to_string(),
            statement: statements,
            stamp: Utc::now(),
            command: None,
            result: Some(COMPLETE.to_string()),
        }
    }

    /// The record of one statement of a segment and how it ended.
    pub fn statement<R: Into<String>>(
        segment: &PatchSegment,
        position: i64,
        command: &str,
        result: R,
    ) -> Self {
        Self {
            kind: STATEMENT.to_string(),
            source: segment.source().map(str::to_string),
            target: segment.target().to_string(),
            statement: position,
            stamp: Utc::now(),
            command: Some(command.trim().to_string()),
            result: Some(result.into()),
        }
    }

    pub fn is_complete_transition_to(&self, version: &str) -> bool {
        self.kind == TRANSITION && self.target == version && self.result.as_deref() == Some(COMPLETE)
    }
}

/// Cached access to the control state through the default connection.
#[derive(Debug, Clone, Default)]
pub struct ControlStore {
    tables: ControlTables,
    state: Option<ControlState>,
    exists: Option<bool>,
}

impl ControlStore {
    pub fn new(tables: ControlTables) -> Self {
        Self {
            tables,
            state: None,
            exists: None,
        }
    }

    pub fn tables(&self) -> &ControlTables {
        &self.tables
    }

    /// Whether the control tables exist yet.
    pub async fn exists<E: Executor>(&mut self, executor: &mut E) -> RatchetResult<bool> {
        if let Some(exists) = self.exists {
            return Ok(exists);
        }
        let exists = executor.control_tables_exist(&self.tables).await?;
        self.exists = Some(exists);
        Ok(exists)
    }

    /// Create the control tables unless they exist.
    pub async fn ensure_tables<E: Executor>(&mut self, executor: &mut E) -> RatchetResult<()> {
        if self.exists(executor).await? {
            return Ok(());
        }
        log::info!(
            target: "ratchet",
            "creating control tables {} and {}",
            self.tables.version_table(),
            self.tables.log_table()
        );
        executor.create_control_tables(&self.tables).await?;
        self.exists = Some(true);
        Ok(())
    }

    /// The current control state; an unmanaged database has no version.
    pub async fn state<E: Executor>(&mut self, executor: &mut E) -> RatchetResult<ControlState> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }
        let state = if self.exists(executor).await? {
            executor
                .read_control_state(&self.tables)
                .await?
                .unwrap_or_default()
        } else {
            ControlState::default()
        };
        self.state = Some(state.clone());
        Ok(state)
    }

    /// Record that `statements` statements of the segment to `target` are
    /// committed.
    pub async fn record_progress<E: Executor>(
        &mut self,
        executor: &mut E,
        target: &str,
        statements: i64,
    ) -> RatchetResult<ControlState> {
        let mut state = self.state(executor).await?;
        state.target = Some(target.to_string());
        state.statements = statements;
        self.write(executor, state).await
    }

    /// Record that `version` is reached and nothing is in flight.
    pub async fn record_version<E: Executor>(
        &mut self,
        executor: &mut E,
        version: &str,
    ) -> RatchetResult<ControlState> {
        let state = ControlState {
            version: Some(version.to_string()),
            target: None,
            statements: 0,
        };
        self.write(executor, state).await
    }

    async fn write<E: Executor>(
        &mut self,
        executor: &mut E,
        state: ControlState,
    ) -> RatchetResult<ControlState> {
        executor.write_control_state(&self.tables, &state).await?;
        log::trace!(target: "ratchet", "control state {state:?}");
        self.state = Some(state.clone());
        Ok(state)
    }

    pub async fn log<E: Executor>(
        &mut self,
        executor: &mut E,
        record: &HistoryRecord,
    ) -> RatchetResult<()> {
        executor.append_history(&self.tables, record).await
    }

    pub async fn history<E: Executor>(
        &mut self,
        executor: &mut E,
    ) -> RatchetResult<Vec<HistoryRecord>> {
        if !self.exists(executor).await? {
            return Ok(Vec::new());
        }
        executor.read_history(&self.tables).await
    }

    /// Whether a transition to `version` completed and was not downgraded.
    pub async fn history_contains<E: Executor>(
        &mut self,
        executor: &mut E,
        version: &str,
    ) -> RatchetResult<bool> {
        let history = self.history(executor).await?;
        Ok(history.iter().any(|r| r.is_complete_transition_to(version)))
    }

    pub async fn downgrade_history<E: Executor>(
        &mut self,
        executor: &mut E,
        versions: &[String],
    ) -> RatchetResult<()> {
        if versions.is_empty() {
            return Ok(());
        }
        log::debug!(target: "ratchet", "marking {versions:?} as downgraded");
        executor.mark_downgraded(&self.tables, versions).await
    }

    /// Forget the cached state so the next read goes to the database.
    pub fn invalidate(&mut self) {
        self.state = None;
        self.exists = None;
    }
}
