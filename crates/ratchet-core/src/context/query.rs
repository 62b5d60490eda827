use crate::control::ControlTables;

/// Library of "administrative" queries for the control tables of one
/// database backend.
///
/// Queries that take values expect placeholders in the order documented on
/// each method.
pub trait QueryRepository {
    /// A query returning one row with the number of control tables that
    /// exist (0, 1 or 2).
    fn control_tables_exist_query(tables: &ControlTables) -> Query;

    /// Create the single-row version table if it does not exist.
    fn create_version_table_query(tables: &ControlTables) -> Query;

    /// Create the append-only log table if it does not exist.
    fn create_log_table_query(tables: &ControlTables) -> Query;

    /// Select `version, target, statements` from the version table.
    fn select_control_state_query(tables: &ControlTables) -> Query;

    /// Remove the row of the version table.
    fn delete_control_state_query(tables: &ControlTables) -> Query;

    /// Insert the row of the version table: `version, target, statements`.
    fn insert_control_state_query(tables: &ControlTables) -> Query;

    /// Insert a log row: `kind, source, target, statement, stamp, command,
    /// result`.
    fn insert_history_query(tables: &ControlTables) -> Query;

    /// Select all log rows in insertion order.
    fn select_history_query(tables: &ControlTables) -> Query;

    /// Mark completed transitions to one version as downgraded: `target`.
    fn mark_downgraded_query(tables: &ControlTables) -> Query;

    /// Change the session user, or go back to the login user with `None`.
    ///
    /// Backends without such a statement return `None`.
    fn set_user_query(user: Option<&str>) -> Option<Query>;
}

/// A SQL query.
#[derive(Debug, Clone)]
pub struct Query(String);

impl Query {
    pub fn new<T: Into<String>>(sql: T) -> Self {
        Self(sql.into())
    }

    /// Return the serialization of the SQL making the query.
    pub fn sql(&self) -> &str {
        &self.0
    }
}
