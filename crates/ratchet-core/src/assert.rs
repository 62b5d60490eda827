//! `ASSERT EXISTS` and `ASSERT EMPTY` pseudo-statements.
//!
//! ```sql
//! ASSERT EXISTS MESSAGE "the users table must be filled" SELECT 1 FROM users
//! GO
//! ```
use futures_core::future::BoxFuture;
use regex::Regex;
use std::sync::LazyLock;

use crate::context::{ExecutionContext, Executor};
use crate::error::{Error, RatchetResult};
use crate::listener::CommandListener;
use crate::source::Command;

static ASSERT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*ASSERT\s+(EXISTS|EMPTY)\s+MESSAGE\s+"([^"]*)"\s+(SELECT\s.*?)\s*$"#)
        .expect("static regex")
});

/// Fails the upgrade with a message when a query returns rows (`EMPTY`) or
/// none (`EXISTS`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertListener;

impl<E: Executor> CommandListener<E> for AssertListener {
    fn try_handle<'a>(
        &'a self,
        command: &'a Command,
        _context: &'a ExecutionContext,
        executor: &'a mut E,
    ) -> BoxFuture<'a, RatchetResult<bool>> {
        Box::pin(async move {
            if command.is_transient() {
                return Ok(false);
            }
            let Some(captures) = ASSERT.captures(command.text()) else {
                return Ok(false);
            };
            let exists = captures[1].eq_ignore_ascii_case("EXISTS");
            let message = captures[2].to_string();
            let select = captures[3].to_string();

            let row = executor.query_value(&select).await.map_err(Error::Database)?;
            if row.is_some() != exists {
                return Err(Error::Assertion {
                    message,
                    location: command.location().clone(),
                });
            }
            Ok(true)
        })
    }
}
