//! Provides [Executor], which represents one database connection.
use crate::control::{ControlState, ControlTables, HistoryRecord};
use crate::error::{RatchetResult, SqlError};

use futures_core::future::Future;

/// `Executor` is the interface to one database connection.
///
/// Statements run in an explicit transaction that the executor opens on the
/// first statement after a [`commit`] or [`rollback`]. The engine never sends
/// two statements concurrently.
///
/// [`commit`]: Executor::commit
/// [`rollback`]: Executor::rollback
pub trait Executor
where
    Self: Send + Sync + 'static,
{
    /// Send one statement within the open transaction.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<(), SqlError>> + Send;

    /// Send a list of statements as one unit within the open transaction.
    fn execute_batch(
        &mut self,
        statements: &[String],
    ) -> impl Future<Output = Result<(), SqlError>> + Send {
        async move {
            for statement in statements {
                self.execute(statement).await?;
            }
            Ok(())
        }
    }

    /// Commit the open transaction, if any.
    fn commit(&mut self) -> impl Future<Output = Result<(), SqlError>> + Send;

    /// Roll back the open transaction, if any.
    fn rollback(&mut self) -> impl Future<Output = Result<(), SqlError>> + Send;

    /// Switch the session user; `None` returns to the user that logged in.
    fn set_user(&mut self, user: Option<&str>) -> impl Future<Output = Result<(), SqlError>> + Send;

    /// The first column of the first row of `sql`: `None` for no row,
    /// `Some(None)` for SQL `NULL`.
    fn query_value(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<Option<Option<String>>, SqlError>> + Send;

    /// Whether both control tables exist.
    fn control_tables_exist(
        &mut self,
        tables: &ControlTables,
    ) -> impl Future<Output = RatchetResult<bool>> + Send;

    /// `CREATE IF NOT EXISTS` the control tables.
    fn create_control_tables(
        &mut self,
        tables: &ControlTables,
    ) -> impl Future<Output = RatchetResult<()>> + Send;

    /// The row of the version table, if there is one.
    fn read_control_state(
        &mut self,
        tables: &ControlTables,
    ) -> impl Future<Output = RatchetResult<Option<ControlState>>> + Send;

    /// Replace the row of the version table and commit.
    fn write_control_state(
        &mut self,
        tables: &ControlTables,
        state: &ControlState,
    ) -> impl Future<Output = RatchetResult<()>> + Send;

    /// Append a row to the log table and commit.
    fn append_history(
        &mut self,
        tables: &ControlTables,
        record: &HistoryRecord,
    ) -> impl Future<Output = RatchetResult<()>> + Send;

    /// All rows of the log table in insertion order.
    fn read_history(
        &mut self,
        tables: &ControlTables,
    ) -> impl Future<Output = RatchetResult<Vec<HistoryRecord>>> + Send;

    /// Mark completed transitions to any of `versions` as downgraded and
    /// commit.
    fn mark_downgraded(
        &mut self,
        tables: &ControlTables,
        versions: &[String],
    ) -> impl Future<Output = RatchetResult<()>> + Send;
}
