//! Database client types that implement [`Executor`].
//!
//! [`Executor`]: ratchet_core::context::Executor
#[cfg(feature = "sqlx")]
#[cfg_attr(
    docsrs,
    doc(cfg(any(
        feature = "sqlx_mysql",
        feature = "sqlx_postgres",
        feature = "sqlx_sqlite"
    )))
)]
pub mod sqlx_backend;

#[cfg(feature = "sqlx_mysql")]
pub use sqlx_backend::mysql::SqlxMySqlExecutor;
#[cfg(feature = "sqlx_postgres")]
pub use sqlx_backend::postgres::SqlxPgExecutor;
#[cfg(feature = "sqlx_sqlite")]
pub use sqlx_backend::sqlite::SqlxSqliteExecutor;
#[cfg(feature = "sqlx")]
pub use sqlx_backend::pool::SqlxExecutor;
