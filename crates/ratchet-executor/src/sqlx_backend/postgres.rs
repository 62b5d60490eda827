use sqlx::Postgres;

use super::pool::SqlxExecutor;
use ratchet_core::context::{Query, QueryRepository};
use ratchet_core::control::{COMPLETE, ControlTables, DOWNGRADED, TRANSITION};

/// Specialization of the generic executor for `sqlx::Pool` to `sqlx::PgPool`.
pub type SqlxPgExecutor = SqlxExecutor<Postgres, SqlxPgQueryRepo>;

/// The control table queries for postgres.
#[derive(Debug, Clone)]
pub struct SqlxPgQueryRepo;

impl QueryRepository for SqlxPgQueryRepo {
    fn control_tables_exist_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
SELECT
  count(*)
FROM
  information_schema.tables
WHERE
  table_schema = current_schema()
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
  version text,
  target text,
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
  id bigint GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
  kind text NOT NULL,
  source text,
  target text NOT NULL,
  statement bigint NOT NULL,
  stamp timestamptz NOT NULL DEFAULT now(),
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
            "INSERT INTO {}(version, target, statements) VALUES ($1, $2, $3);",
            tables.version_table()
        );

        Query::new(sql)
    }

    fn insert_history_query(tables: &ControlTables) -> Query {
        let sql = format!(
            "
INSERT INTO {}(kind, source, target, statement, stamp, command, result)
  VALUES ($1, $2, $3, $4, $5, $6, $7);
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
  AND target = $1
  AND result = '{COMPLETE}';
",
            tables.log_table()
        );

        Query::new(sql)
    }

    fn set_user_query(user: Option<&str>) -> Option<Query> {
        let sql = match user {
            Some(user) => format!("SET ROLE \"{}\";", user.replace('"', "\"\"")),
            None => "RESET ROLE;".to_string(),
        };

        Some(Query::new(sql))
    }
}
