use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Where a command starts: the resource it came from and its 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    resource: Option<Arc<str>>,
    line: usize,
}

impl Location {
    pub fn new(resource: Option<Arc<str>>, line: usize) -> Self {
        Self { resource, line }
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn line(&self) -> usize {
        self.line
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(name) => write!(f, "{name}, line {}", self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// Whether a command is sent to the database or handled by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    /// A statement that is sent to the database and counted toward progress.
    Persistent,
    /// A `--*` directive or plugin pseudo-statement.
    Transient,
}

/// One unit of work parsed from a patch segment or an included file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    location: Location,
}

impl Command {
    pub fn persistent<S: Into<String>>(text: S, location: Location) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Persistent,
            location,
        }
    }

    pub fn transient<S: Into<String>>(text: S, location: Location) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Transient,
            location,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind == CommandKind::Transient
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The same command with its text replaced.
    pub fn with_text<S: Into<String>>(&self, text: S) -> Self {
        Self {
            text: text.into(),
            kind: self.kind,
            location: self.location.clone(),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            CommandKind::Transient => write!(f, "--* {}", self.text),
            CommandKind::Persistent => write!(f, "{}", self.text.trim_end()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_serializes_its_resource() {
        let location = Location::new(Some(Arc::from("upgrade.sql")), 12);
        let json = serde_json::to_string(&location).unwrap();
        assert_eq!(json, r#"{"resource":"upgrade.sql","line":12}"#);
        assert_eq!(location.to_string(), "upgrade.sql, line 12");
    }
}
