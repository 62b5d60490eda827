use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

use crate::source::Location;

/// Alias for a result whose error type is [`Error`].
pub type RatchetResult<T> = Result<T, Error>;
type BoxDynError = Box<dyn StdError + Send + Sync + 'static>;

/// All the ways reading a patch file, planning an upgrade, or running one can
/// end in failure.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The patch file or an included file is malformed.
    #[error("{message} ({location})")]
    Source { message: String, location: Location },
    /// A statement was not closed by a delimiter before a directive or the end
    /// of the input.
    #[error("statement not terminated by a delimiter ({0})")]
    Unterminated(Location),
    /// No directive or command listener accepts the transient command.
    #[error("unknown command `{command}` ({location})")]
    UnknownCommand { command: String, location: Location },
    /// There is no path in the patch graph to the requested target.
    #[error(
        "target {target} is not reachable from {}, reachable versions: {reachable:?}",
        crate::upgrade::display_version(.current.as_deref())
    )]
    UnreachableTarget {
        current: Option<String>,
        target: String,
        reachable: Vec<String>,
    },
    /// The control state in the database is inconsistent with the patch file.
    #[error("control state: {0}")]
    ControlState(String),
    /// A persistent command failed with an error that is not ignored.
    #[error("error executing statement ({location}): {source}")]
    Statement {
        #[source]
        source: SqlError,
        command: String,
        location: Location,
    },
    /// An `ASSERT` pseudo-statement did not hold.
    #[error("assertion failed ({location}): {message}")]
    Assertion { message: String, location: Location },
    /// The database reported an error outside of a patch statement.
    #[error("database error: {0}")]
    Database(#[source] SqlError),
    /// A connection name was selected that is not configured.
    #[error("connection `{0}` is not configured")]
    UnknownConnection(String),
    /// An error from the database client outside of statement execution.
    #[error("error from the database client: {0}")]
    Execute(#[source] BoxDynError),
    /// Reading a resource failed.
    #[error("could not read resource: {0}")]
    Io(#[from] std::io::Error),
    /// The run was interrupted between two commands.
    #[error("upgrade interrupted")]
    Interrupted,
    /// An error that happened after some segments were already completed.
    #[error("{source}")]
    Partial {
        source: Box<Error>,
        report: Box<dyn PartialReport>,
    },
}

impl Error {
    /// A source error at the given location.
    pub fn source_error<S: Into<String>>(message: S, location: &Location) -> Self {
        Self::Source {
            message: message.into(),
            location: location.clone(),
        }
    }

    /// The error without any attached partial report.
    pub fn root(&self) -> &Error {
        match self {
            Self::Partial { source, .. } => source.root(),
            other => other,
        }
    }

    /// The database error code when this is a statement or database error.
    pub fn sql_code(&self) -> Option<&str> {
        match self.root() {
            Self::Statement { source, .. } | Self::Database(source) => source.code(),
            _ => None,
        }
    }
}

/// A report of the work done before an error, kept opaque here so that
/// front ends can attach their own report type.
pub trait PartialReport: fmt::Debug + Display + Send + Sync + 'static {}

impl<T> PartialReport for T where T: fmt::Debug + Display + Send + Sync + 'static {}

/// An error reported by the database for one statement.
///
/// `code` is the vendor or SQLSTATE code that `IGNORE SQL ERROR` matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    code: Option<String>,
    message: String,
}

impl SqlError {
    pub fn new<S: Into<String>>(code: Option<String>, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The error code, if the driver reported one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for SqlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl StdError for SqlError {}

/// Converting a result with a generic `std::error::Error` to one with this
/// crate's error type.
pub trait DatabaseError<T, E> {
    fn ratchet_result(self) -> RatchetResult<T>;
    fn void_ratchet_result(self) -> RatchetResult<()>;
}

impl<T, E> DatabaseError<T, E> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn ratchet_result(self) -> RatchetResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(Error::Execute(Box::new(e))),
        }
    }

    fn void_ratchet_result(self) -> RatchetResult<()> {
        match self {
            Err(e) => Err(Error::Execute(Box::new(e))),
            _ => Ok(()),
        }
    }
}

/// Raise a [`SqlError`] from control-state bookkeeping as a database error.
pub trait SqlResult<T> {
    fn or_database(self) -> RatchetResult<T>;
}

impl<T> SqlResult<T> for Result<T, SqlError> {
    fn or_database(self) -> RatchetResult<T> {
        self.map_err(Error::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_partial() {
        let err = Error::Partial {
            source: Box::new(Error::Interrupted),
            report: Box::new(String::from("[]")),
        };
        assert!(matches!(err.root(), Error::Interrupted));
    }

    #[test]
    fn sql_code_from_statement() {
        let err = Error::Statement {
            source: SqlError::new(Some("23505".into()), "duplicate key"),
            command: "INSERT INTO t VALUES (1)".into(),
            location: Location::new(None, 3),
        };
        assert_eq!(err.sql_code(), Some("23505"));
        assert_eq!(
            err.to_string(),
            "error executing statement (line 3): [23505] duplicate key"
        );
    }
}
