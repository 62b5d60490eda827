//! [`Executor`] for the generic [`sqlx::Pool`][sqlx-pool], a pool of `sqlx`
//! database connections.
//!
//! The pool is kept at exactly one connection that never expires, so session
//! settings such as the current role survive between statements, and so an
//! in-memory SQLite database lives as long as the executor.
//!
//! [`Executor`]: ratchet_core::context::Executor
//! [sqlx-pool]: https://docs.rs/sqlx/0.8.6/sqlx/struct.Pool.html
use ratchet_core::context::{Executor as UpgradeExecutor, QueryRepository};
use ratchet_core::control::{ControlState, ControlTables, HistoryRecord};
use ratchet_core::error::{DatabaseError as _, RatchetResult, SqlError};

use chrono::{DateTime, Utc};
use sqlx::pool::PoolOptions;
use sqlx::{
    ColumnIndex, Connection, Database, Decode, Encode, Executor, FromRow, IntoArguments, Pool, Row,
    Transaction, Type,
};
use std::marker::PhantomData;

/// The generic `sqlx::Pool` as an upgrade executor backend.
pub struct SqlxExecutor<Db, Q>
where
    Db: Database,
    Q: QueryRepository,
{
    pool: Pool<Db>,
    tx: Option<Transaction<'static, Db>>,
    _q: PhantomData<Q>,
}

impl<Db, Q> SqlxExecutor<Db, Q>
where
    Db: Database,
    Q: QueryRepository,
{
    /// The pool options every constructor starts from.
    pub fn pool_options() -> PoolOptions<Db> {
        PoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    }

    /// Connect to the database at `db_url`.
    pub async fn new(db_url: &str) -> RatchetResult<Self> {
        let pool = Self::pool_options().connect(db_url).await.ratchet_result()?;

        Ok(Self::from_pool(pool))
    }

    /// Connect to the database named by the `DATABASE_URL` environment
    /// variable.
    pub async fn from_env() -> RatchetResult<Self> {
        let db_url = std::env::var("DATABASE_URL").ratchet_result()?;
        Self::new(&db_url).await
    }

    /// Create the pool from the given options.
    ///
    /// Statements of a run must share one session, so `pool_opts` should
    /// allow only one connection.
    pub async fn new_with(
        pool_opts: PoolOptions<Db>,
        conn_opts: <Db::Connection as Connection>::Options,
    ) -> RatchetResult<Self> {
        let pool = pool_opts.connect_with(conn_opts).await.ratchet_result()?;

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: Pool<Db>) -> Self {
        Self {
            pool,
            tx: None,
            _q: PhantomData,
        }
    }

    /// Obtain a reference to the underlying `Pool`.
    pub fn pool(&self) -> &Pool<Db> {
        &self.pool
    }

    /// The connection of the open transaction, beginning one if there is
    /// none.
    async fn connection(&mut self) -> Result<&mut Db::Connection, sqlx::Error> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => {
                log::trace!(target: "ratchet", "beginning transaction");
                self.pool.begin().await?
            }
        };
        Ok(&mut **self.tx.insert(tx))
    }

    async fn end(&mut self, commit: bool) -> Result<(), sqlx::Error> {
        match self.tx.take() {
            Some(tx) if commit => tx.commit().await,
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }
}

/// The code and message of a `sqlx` error.
fn sql_error(e: sqlx::Error) -> SqlError {
    match &e {
        sqlx::Error::Database(db) => {
            SqlError::new(db.code().map(|code| code.into_owned()), db.message())
        }
        _ => SqlError::new(None, e.to_string()),
    }
}

/// The first column of `row` as text, whatever its type.
fn first_column<Db>(row: &Db::Row) -> Result<Option<String>, sqlx::Error>
where
    Db: Database,
    usize: ColumnIndex<Db::Row>,
    String: Type<Db> + for<'r> Decode<'r, Db>,
    i64: Type<Db> + for<'r> Decode<'r, Db>,
    i32: Type<Db> + for<'r> Decode<'r, Db>,
    f64: Type<Db> + for<'r> Decode<'r, Db>,
{
    if let Ok(value) = row.try_get::<Option<String>, _>(0) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(0) {
        return Ok(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(0) {
        return Ok(value.map(|v| v.to_string()));
    }
    let value = row.try_get::<Option<f64>, _>(0)?;
    Ok(value.map(|v| v.to_string()))
}

/// `SqlxExecutor` can be an [`Executor`] fairly straightforwardly when enough
/// bounds involving `Db: sqlx::Database` are added to make it compile.
///
/// [`Executor`]: ratchet_core::context::Executor
impl<Db, Q> UpgradeExecutor for SqlxExecutor<Db, Q>
where
    Self: Send + Sync + 'static,
    Q: QueryRepository,
    Db: Database,
    for<'c> &'c mut <Db as Database>::Connection: Executor<'c, Database = Db>,
    for<'q> <Db as Database>::Arguments<'q>: IntoArguments<'q, Db>,
    for<'r> ControlState: FromRow<'r, <Db as Database>::Row>,
    for<'r> HistoryRecord: FromRow<'r, <Db as Database>::Row>,
    usize: ColumnIndex<<Db as Database>::Row>,
    String: Type<Db> + for<'a> Encode<'a, Db> + for<'r> Decode<'r, Db>,
    i64: Type<Db> + for<'a> Encode<'a, Db> + for<'r> Decode<'r, Db>,
    i32: Type<Db> + for<'r> Decode<'r, Db>,
    f64: Type<Db> + for<'r> Decode<'r, Db>,
    DateTime<Utc>: Type<Db> + for<'a> Encode<'a, Db>,
{
    async fn execute(&mut self, sql: &str) -> Result<(), SqlError> {
        let conn = self.connection().await.map_err(sql_error)?;
        sqlx::raw_sql(sql).execute(&mut *conn).await.map_err(sql_error)?;

        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlError> {
        self.end(true).await.map_err(sql_error)
    }

    async fn rollback(&mut self) -> Result<(), SqlError> {
        self.end(false).await.map_err(sql_error)
    }

    async fn set_user(&mut self, user: Option<&str>) -> Result<(), SqlError> {
        let Some(query) = Q::set_user_query(user) else {
            return Err(SqlError::new(
                None,
                "this database cannot switch the session user",
            ));
        };
        let conn = self.connection().await.map_err(sql_error)?;
        sqlx::raw_sql(query.sql())
            .execute(&mut *conn)
            .await
            .map_err(sql_error)?;
        self.end(true).await.map_err(sql_error)
    }

    async fn query_value(&mut self, sql: &str) -> Result<Option<Option<String>>, SqlError> {
        let conn = self.connection().await.map_err(sql_error)?;
        let row = sqlx::raw_sql(sql)
            .fetch_optional(&mut *conn)
            .await
            .map_err(sql_error)?;
        match row {
            Some(row) => first_column::<Db>(&row).map(Some).map_err(sql_error),
            None => Ok(None),
        }
    }

    async fn control_tables_exist(&mut self, tables: &ControlTables) -> RatchetResult<bool> {
        let query = Q::control_tables_exist_query(tables);
        let conn = self.connection().await.ratchet_result()?;
        let row = sqlx::raw_sql(query.sql())
            .fetch_one(&mut *conn)
            .await
            .ratchet_result()?;
        let count = row.try_get::<i64, _>(0).ratchet_result()?;
        self.end(true).await.void_ratchet_result()?;

        Ok(count == 2)
    }

    async fn create_control_tables(&mut self, tables: &ControlTables) -> RatchetResult<()> {
        let version_table = Q::create_version_table_query(tables);
        let log_table = Q::create_log_table_query(tables);
        let conn = self.connection().await.ratchet_result()?;
        sqlx::raw_sql(version_table.sql())
            .execute(&mut *conn)
            .await
            .void_ratchet_result()?;
        sqlx::raw_sql(log_table.sql())
            .execute(&mut *conn)
            .await
            .void_ratchet_result()?;

        self.end(true).await.void_ratchet_result()
    }

    async fn read_control_state(
        &mut self,
        tables: &ControlTables,
    ) -> RatchetResult<Option<ControlState>> {
        let query = Q::select_control_state_query(tables);
        let conn = self.connection().await.ratchet_result()?;
        let state = sqlx::query_as::<Db, ControlState>(query.sql())
            .fetch_optional(&mut *conn)
            .await
            .ratchet_result()?;
        self.end(true).await.void_ratchet_result()?;

        Ok(state)
    }

    /// This expects [`insert_control_state_query`] to have placeholders for
    /// `version`, `target` and `statements` in that order.
    ///
    /// [`insert_control_state_query`]: QueryRepository::insert_control_state_query
    async fn write_control_state(
        &mut self,
        tables: &ControlTables,
        state: &ControlState,
    ) -> RatchetResult<()> {
        let delete = Q::delete_control_state_query(tables);
        let insert = Q::insert_control_state_query(tables);
        let conn = self.connection().await.ratchet_result()?;
        sqlx::raw_sql(delete.sql())
            .execute(&mut *conn)
            .await
            .void_ratchet_result()?;
        sqlx::query::<Db>(insert.sql())
            .bind(state.version.clone())
            .bind(state.target.clone())
            .bind(state.statements)
            .execute(&mut *conn)
            .await
            .void_ratchet_result()?;

        self.end(true).await.void_ratchet_result()
    }

    /// Like [`write_control_state`] this expects placeholders lining up with
    /// the order of the [`HistoryRecord`] fields.
    ///
    /// [`write_control_state`]: Self::write_control_state
    async fn append_history(
        &mut self,
        tables: &ControlTables,
        record: &HistoryRecord,
    ) -> RatchetResult<()> {
        let query = Q::insert_history_query(tables);
        let conn = self.connection().await.ratchet_result()?;
        sqlx::query::<Db>(query.sql())
            .bind(record.kind.clone())
            .bind(record.source.clone())
            .bind(record.target.clone())
            .bind(record.statement)
            .bind(record.stamp)
            .bind(record.command.clone())
            .bind(record.result.clone())
            .execute(&mut *conn)
            .await
            .void_ratchet_result()?;

        self.end(true).await.void_ratchet_result()
    }

    async fn read_history(&mut self, tables: &ControlTables) -> RatchetResult<Vec<HistoryRecord>> {
        let query = Q::select_history_query(tables);
        let conn = self.connection().await.ratchet_result()?;
        let history = sqlx::query_as::<Db, HistoryRecord>(query.sql())
            .fetch_all(&mut *conn)
            .await
            .ratchet_result()?;
        self.end(true).await.void_ratchet_result()?;

        Ok(history)
    }

    async fn mark_downgraded(
        &mut self,
        tables: &ControlTables,
        versions: &[String],
    ) -> RatchetResult<()> {
        let query = Q::mark_downgraded_query(tables);
        let conn = self.connection().await.ratchet_result()?;
        for version in versions {
            sqlx::query::<Db>(query.sql())
                .bind(version.clone())
                .execute(&mut *conn)
                .await
                .void_ratchet_result()?;
        }

        self.end(true).await.void_ratchet_result()
    }
}
