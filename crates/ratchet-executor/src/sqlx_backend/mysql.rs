use sqlx::MySql;

use super::pool::SqlxExecutor;
use ratchet_core::context::{Query, QueryRepository};
use ratchet_core::control::{COMPLETE, ControlTables, DOWNGRADED, TRANSITION};

/// Specialization of the generic executor for `sqlx::Pool` to
/// `sqlx::MySqlPool`.
pub type SqlxMySqlExecutor = SqlxExecutor<MySql, SqlxMySqlQueryRepo>;

/// The control table queries for mysql.
#[derive(Debug, Clone)]
pub struct SqlxMySqlQueryRepo;

impl QueryRepository for SqlxMySqlQueryRepo {
    fn control_tables_exist_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
SELECT
  count(*)
FROM
  information_schema.tables
WHERE
  table_schema = database()
  AND table_name IN ('{}', '{}');
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
  version varchar(255),
  target varchar(255),
  statements bigint NOT NULL DEFAULT 0
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
  id bigint AUTO_INCREMENT PRIMARY KEY,
  kind varchar(1) NOT NULL,
  source varchar(255),
  target varchar(255) NOT NULL,
  statement bigint NOT NULL,
  stamp timestamp(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
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
            "INSERT INTO {}(version, target, statements) VALUES (?, ?, ?);",
            tables.version_table()
        );

        Query::new(sql)
    }

    fn insert_history_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
INSERT INTO {}(kind, source, target, statement, stamp, command, result)
  VALUES (?, ?, ?, ?, ?, ?, ?);
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
  AND target = ?
  AND result = '{COMPLETE}';
",
            tables.log_table()
        );

        Query::new(sql)
    }

    /// MySQL has no statement to change the user of a session.
    fn set_user_query(_: Option<&str>) -> Option<Query> {
        None
    }
}
