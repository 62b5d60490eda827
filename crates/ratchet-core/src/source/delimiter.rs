use regex::Regex;
use std::fmt::{self, Display, Formatter};
use std::sync::LazyLock;

use crate::error::{Error, RatchetResult};
use crate::source::Location;

static DELIMITER_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:SET\s+DELIMITER|SET\s+TERMINATOR|DELIMITER\s+IS|DELIMITER)(?:\s+(ISOLATED|TRAILING))?\s+(\S+)(?:\s+OR(?:\s+(ISOLATED|TRAILING))?\s+(\S+))?\s*$",
    )
    .expect("static regex")
});

static RESET_DELIMITER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^RESET\s+(?:DELIMITER|TERMINATOR)\s*$").expect("static regex")
});

/// How a delimiter must be placed to end a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Alone on its own line, surrounding whitespace allowed.
    Isolated,
    /// At the end of the line that ends the statement.
    Trailing,
}

/// A statement delimiter together with its placement.
#[derive(Debug, Clone)]
pub struct Delimiter {
    token: String,
    placement: Placement,
    pattern: Regex,
}

impl Delimiter {
    pub fn new<S: Into<String>>(token: S, placement: Placement) -> Self {
        let token = token.into();
        let quoted = regex::escape(&token);
        let source = match placement {
            Placement::Isolated => format!(r"(?i)^\s*{quoted}\s*$"),
            Placement::Trailing => format!(r"(?i)^(.*){quoted}\s*$"),
        };
        let pattern = Regex::new(&source).expect("escaped delimiter pattern");
        Self {
            token,
            placement,
            pattern,
        }
    }

    pub fn isolated<S: Into<String>>(token: S) -> Self {
        Self::new(token, Placement::Isolated)
    }

    pub fn trailing<S: Into<String>>(token: S) -> Self {
        Self::new(token, Placement::Trailing)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// If `line` ends a statement, the part of the line that still belongs to
    /// the statement.
    pub fn split<'a>(&self, line: &'a str) -> Option<&'a str> {
        let captures = self.pattern.captures(line)?;
        match self.placement {
            Placement::Isolated => Some(""),
            Placement::Trailing => captures.get(1).map(|m| m.as_str()),
        }
    }
}

impl PartialEq for Delimiter {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token && self.placement == other.placement
    }
}

impl Eq for Delimiter {}

impl Display for Delimiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.placement {
            Placement::Isolated => write!(f, "ISOLATED {}", self.token),
            Placement::Trailing => write!(f, "TRAILING {}", self.token),
        }
    }
}

/// The delimiters in effect: one or two alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters(Vec<Delimiter>);

impl Delimiters {
    pub fn new(first: Delimiter, second: Option<Delimiter>) -> Self {
        Self(std::iter::once(first).chain(second).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delimiter> {
        self.0.iter()
    }

    /// The first delimiter that ends a statement on `line`, and what remains
    /// of the line before it.
    pub fn split<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.0.iter().find_map(|d| d.split(line))
    }

    /// The primary delimiter.
    pub fn primary(&self) -> &Delimiter {
        &self.0[0]
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new(Delimiter::isolated("GO"), None)
    }
}

/// What a transient line says about delimiters, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelimiterChange {
    Set(Delimiters),
    Reset,
}

impl DelimiterChange {
    /// Recognize a `DELIMITER` or `RESET DELIMITER` directive.
    pub fn parse(text: &str, location: &Location) -> RatchetResult<Option<Self>> {
        let text = text.trim();
        if RESET_DELIMITER.is_match(text) {
            return Ok(Some(Self::Reset));
        }
        let Some(captures) = DELIMITER_DIRECTIVE.captures(text) else {
            if starts_with_word(text, "DELIMITER") || starts_with_word(text, "SET DELIMITER") {
                return Err(Error::source_error(
                    format!("malformed delimiter directive `{text}`"),
                    location,
                ));
            }
            return Ok(None);
        };

        let placement = |m: Option<regex::Match<'_>>| match m {
            Some(m) if m.as_str().eq_ignore_ascii_case("ISOLATED") => Placement::Isolated,
            _ => Placement::Trailing,
        };
        let first = captures
            .get(2)
            .map(|token| Delimiter::new(token.as_str(), placement(captures.get(1))));
        let second = captures
            .get(4)
            .map(|token| Delimiter::new(token.as_str(), placement(captures.get(3))));

        match first {
            Some(first) => Ok(Some(Self::Set(Delimiters::new(first, second)))),
            None => Err(Error::source_error("missing delimiter token", location)),
        }
    }
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text.get(..word.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(word))
        && text
            .get(word.len()..)
            .is_some_and(|tail| tail.chars().next().is_none_or(char::is_whitespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> Location {
        Location::new(None, 1)
    }

    #[test]
    fn isolated_matches_whole_line() {
        let go = Delimiter::isolated("GO");
        assert_eq!(go.split("  go  "), Some(""));
        assert_eq!(go.split("GO"), Some(""));
        assert_eq!(go.split("SELECT 1 GO"), None);
    }

    #[test]
    fn trailing_keeps_statement_text() {
        let semi = Delimiter::trailing(";");
        assert_eq!(semi.split("SELECT 1;"), Some("SELECT 1"));
        assert_eq!(semi.split("SELECT 1;  "), Some("SELECT 1"));
        assert_eq!(semi.split("SELECT 1"), None);
    }

    #[test]
    fn parses_two_delimiters() {
        let change = DelimiterChange::parse("DELIMITER IS ; OR ISOLATED /", &here()).unwrap();
        let Some(DelimiterChange::Set(delimiters)) = change else {
            panic!("expected a delimiter change");
        };
        let all: Vec<_> = delimiters.iter().cloned().collect();
        assert_eq!(all, vec![Delimiter::trailing(";"), Delimiter::isolated("/")]);
    }

    #[test]
    fn parses_set_and_reset() {
        assert!(matches!(
            DelimiterChange::parse("set delimiter isolated GO", &here()),
            Ok(Some(DelimiterChange::Set(_)))
        ));
        assert!(matches!(
            DelimiterChange::parse("RESET DELIMITER", &here()),
            Ok(Some(DelimiterChange::Reset))
        ));
        assert!(matches!(
            DelimiterChange::parse("SECTION \"x\"", &here()),
            Ok(None)
        ));
    }

    #[test]
    fn multibyte_text_is_not_a_delimiter_change() {
        for text in ["SECTION \"été\"", "RESET ü", "é", "DELIMITERé"] {
            assert!(matches!(DelimiterChange::parse(text, &here()), Ok(None)));
        }
    }

    #[test]
    fn malformed_delimiter_is_an_error() {
        assert!(matches!(
            DelimiterChange::parse("DELIMITER", &here()),
            Err(Error::Source { .. })
        ));
    }
}
