//! An in-memory [`Executor`] for testing upgrade files and listeners without
//! a database.
//!
//! Statements are recorded instead of run. Statements containing a fragment
//! registered with [`MemoryExecutor::fail_on`] fail with the given code, and
//! queries answer with values registered with [`MemoryExecutor::answer`].
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::Executor;
use crate::control::{ControlState, ControlTables, DOWNGRADED, HistoryRecord};
use crate::error::{RatchetResult, SqlError};

#[derive(Debug, Clone)]
struct Failure {
    fragment: String,
    code: String,
    once: bool,
}

/// Everything a [`MemoryExecutor`] has seen.
#[derive(Debug, Default)]
pub struct MemoryState {
    /// Statements of the open transaction.
    pub pending: Vec<String>,
    /// Committed statements in order, trimmed.
    pub committed: Vec<String>,
    /// Number of commits that had at least one statement.
    pub commits: usize,
    /// Every `set_user` call.
    pub users: Vec<Option<String>>,
    pub tables_exist: bool,
    pub control: Option<ControlState>,
    pub history: Vec<HistoryRecord>,
    failures: Vec<Failure>,
    answers: HashMap<String, Option<String>>,
}

/// An [`Executor`] that keeps its state behind a shared handle, so a test
/// can hold a clone and look at what the engine did.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every statement containing `fragment` with `code`.
    pub fn fail_on(&self, fragment: &str, code: &str) -> &Self {
        self.lock().failures.push(Failure {
            fragment: fragment.to_string(),
            code: code.to_string(),
            once: false,
        });
        self
    }

    /// Fail the next statement containing `fragment` with `code`.
    pub fn fail_once(&self, fragment: &str, code: &str) -> &Self {
        self.lock().failures.push(Failure {
            fragment: fragment.to_string(),
            code: code.to_string(),
            once: true,
        });
        self
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Answer the query `select` with one row holding `value`.
    pub fn answer(&self, select: &str, value: Option<&str>) -> &Self {
        self.lock()
            .answers
            .insert(select.trim().to_string(), value.map(str::to_string));
        self
    }

    pub fn committed(&self) -> Vec<String> {
        self.lock().committed.clone()
    }

    pub fn control(&self) -> Option<ControlState> {
        self.lock().control.clone()
    }

    /// Put the database in the given control state, creating the control
    /// tables.
    pub fn set_control(&self, state: ControlState) {
        let mut guard = self.lock();
        guard.tables_exist = true;
        guard.control = Some(state);
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.lock().history.clone()
    }

    /// Look at the whole state.
    pub fn inspect<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        f(&self.lock())
    }

    fn check(&self, sql: &str) -> Result<(), SqlError> {
        let mut guard = self.lock();
        let Some(i) = guard.failures.iter().position(|f| sql.contains(&f.fragment)) else {
            return Ok(());
        };
        let failure = if guard.failures[i].once {
            guard.failures.remove(i)
        } else {
            guard.failures[i].clone()
        };
        Err(SqlError::new(
            Some(failure.code),
            format!("statement failed on `{}`", failure.fragment),
        ))
    }
}

impl Executor for MemoryExecutor {
    async fn execute(&mut self, sql: &str) -> Result<(), SqlError> {
        self.check(sql)?;
        self.lock().pending.push(sql.trim().to_string());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlError> {
        let mut guard = self.lock();
        if guard.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut guard.pending);
        guard.committed.extend(pending);
        guard.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlError> {
        self.lock().pending.clear();
        Ok(())
    }

    async fn set_user(&mut self, user: Option<&str>) -> Result<(), SqlError> {
        self.lock().users.push(user.map(str::to_string));
        Ok(())
    }

    async fn query_value(&mut self, sql: &str) -> Result<Option<Option<String>>, SqlError> {
        self.check(sql)?;
        Ok(self.lock().answers.get(sql.trim()).cloned())
    }

    async fn control_tables_exist(&mut self, _: &ControlTables) -> RatchetResult<bool> {
        Ok(self.lock().tables_exist)
    }

    async fn create_control_tables(&mut self, _: &ControlTables) -> RatchetResult<()> {
        self.lock().tables_exist = true;
        Ok(())
    }

    async fn read_control_state(&mut self, _: &ControlTables) -> RatchetResult<Option<ControlState>> {
        Ok(self.lock().control.clone())
    }

    async fn write_control_state(
        &mut self,
        _: &ControlTables,
        state: &ControlState,
    ) -> RatchetResult<()> {
        self.lock().control = Some(state.clone());
        Ok(())
    }

    async fn append_history(&mut self, _: &ControlTables, record: &HistoryRecord) -> RatchetResult<()> {
        self.lock().history.push(record.clone());
        Ok(())
    }

    async fn read_history(&mut self, _: &ControlTables) -> RatchetResult<Vec<HistoryRecord>> {
        Ok(self.lock().history.clone())
    }

    async fn mark_downgraded(&mut self, _: &ControlTables, versions: &[String]) -> RatchetResult<()> {
        let mut guard = self.lock();
        for record in guard.history.iter_mut() {
            if versions.iter().any(|v| record.is_complete_transition_to(v)) {
                record.result = Some(DOWNGRADED.to_string());
            }
        }
        Ok(())
    }
}
