use sqlx::Sqlite;

use super::pool::SqlxExecutor;
use ratchet_core::context::{Query, QueryRepository};
use ratchet_core::control::{COMPLETE, ControlTables, DOWNGRADED, TRANSITION};

/// Specialization of [SqlxExecutor] to [SqlitePool].
///
/// [SqlitePool]: sqlx::SqlitePool
pub type SqlxSqliteExecutor = SqlxExecutor<Sqlite, SqlxSqliteQueryRepo>;

/// The control table queries for sqlite.
#[derive(Debug, Clone)]
pub struct SqlxSqliteQueryRepo;

impl QueryRepository for SqlxSqliteQueryRepo {
    fn control_tables_exist_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
SELECT
  count(*)
FROM
  sqlite_master
WHERE
  type = 'table'
  AND name IN ('{}', '{}');
",
            tables.version_table(),
            tables.log_table()
        );

        Query::new(sql)
    }

    fn create_version_table_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
CREATE TABLE IF NOT EXISTS {}(
  version text,
  target text,
  statements integer NOT NULL DEFAULT 0
);
",
            tables.version_table()
        );

        Query::new(sql)
    }

    fn create_log_table_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
CREATE TABLE IF NOT EXISTS {}(
  id integer PRIMARY KEY AUTOINCREMENT,
  kind text NOT NULL,
  source text,
  target text NOT NULL,
  statement integer NOT NULL,
  stamp datetime NOT NULL DEFAULT CURRENT_TIMESTAMP,
  command text,
  result text
);
",
            tables.log_table()
        );

        Query::new(sql)
    }

    fn select_control_state_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "SELECT version, target, statements FROM {};",
            tables.version_table()
        );

        Query::new(sql)
    }

    fn delete_control_state_query(tables: &ControlTables) -> Query {
        let sql = format!("DELETE FROM {};", tables.version_table());

        Query::new(sql)
    }

    fn insert_control_state_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "INSERT INTO {}(version, target, statements) VALUES (?1, ?2, ?3);",
            tables.version_table()
        );

        Query::new(sql)
    }

    fn insert_history_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
INSERT INTO {}(kind, source, target, statement, stamp, command, result)
  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);
",
            tables.log_table()
        );

        Query::new(sql)
    }

    fn select_history_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
SELECT
  kind,
  source,
  target,
  statement,
  stamp,
  command,
  result
FROM
  {}
ORDER BY
  id;
",
            tables.log_table()
        );

        Query::new(sql)
    }

    fn mark_downgraded_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
UPDATE {}
SET
  result = '{DOWNGRADED}'
WHERE
  kind = '{TRANSITION}'
  AND target = ?1
  AND result = '{COMPLETE}';
",
            tables.log_table()
        );

        Query::new(sql)
    }

    /// SQLite has no users.
    fn set_user_query(_: Option<&str>) -> Option<Query> {
        None
    }
}
