use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::error::RatchetResult;
use crate::source::{Command, Delimiters, Location, SqlSource};
use crate::upgrade::display_version;

/// What a segment does to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SegmentKind {
    /// Creates a database from nothing.
    Setup,
    /// Moves forward to a newer version.
    Upgrade,
    /// Moves sideways to an equivalent version of another line.
    Switch,
    /// Moves back to an older version; only used when allowed.
    Downgrade,
}

impl SegmentKind {
    pub fn is_downgrade(self) -> bool {
        self == Self::Downgrade
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Upgrade => "UPGRADE",
            Self::Switch => "SWITCH",
            Self::Downgrade => "DOWNGRADE",
        }
    }
}

impl FromStr for SegmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SETUP" => Ok(Self::Setup),
            "UPGRADE" => Ok(Self::Upgrade),
            "SWITCH" => Ok(Self::Switch),
            "DOWNGRADE" => Ok(Self::Downgrade),
            other => Err(format!("unknown segment kind `{other}`")),
        }
    }
}

impl Display for SegmentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// An edge of the patch graph: the commands that move a database from
/// `source` to `target`.
///
/// The body is kept as text and parsed into commands the first time it is
/// needed.
#[derive(Debug)]
pub struct PatchSegment {
    kind: SegmentKind,
    source: Option<String>,
    target: String,
    open: bool,
    location: Location,
    body: String,
    first_line: usize,
    commands: OnceLock<Vec<Command>>,
}

impl PatchSegment {
    pub fn new<T: Into<String>>(kind: SegmentKind, source: Option<String>, target: T) -> Self {
        Self {
            kind,
            source,
            target: target.into(),
            open: false,
            location: Location::new(None, 0),
            body: String::new(),
            first_line: 1,
            commands: OnceLock::new(),
        }
    }

    /// Mark the segment's target as a branch point rather than a release.
    pub fn open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }

    /// Set where the segment is declared.
    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Set the body text and the line number of its first line.
    pub fn with_body<S: Into<String>>(mut self, body: S, first_line: usize) -> Self {
        self.body = body.into();
        self.first_line = first_line;
        self.commands = OnceLock::new();
        self
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The parsed commands of the body, parsing on first use.
    pub fn commands(&self, delimiters: &Delimiters) -> RatchetResult<&[Command]> {
        if let Some(commands) = self.commands.get() {
            return Ok(commands);
        }
        let resource = self.location.resource().map(Arc::from);
        let parsed = SqlSource::new(&self.body)
            .starting_at(self.first_line)
            .with_resource(resource)
            .with_delimiters(delimiters.clone())
            .collect::<RatchetResult<Vec<_>>>()?;
        log::trace!(target: "ratchet", "parsed {} commands for {self}", parsed.len());
        Ok(self.commands.get_or_init(|| parsed))
    }

    /// Whether this segment has the same endpoints and kind as `other`.
    pub fn same_edge(&self, other: &Self) -> bool {
        self.kind == other.kind && self.source == other.source && self.target == other.target
    }
}

impl Display for PatchSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} --> {}",
            self.kind,
            display_version(self.source()),
            self.target
        )
    }
}
