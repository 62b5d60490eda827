//! Splitting SQL text into [`Command`]s.
//!
//! Lines starting with `--*` are directives and become transient commands;
//! `--* //` lines are comments. Everything else accumulates into a persistent
//! command until a line is ended by one of the active [`Delimiters`].
use std::fmt::Write;
use std::str::Lines;
use std::sync::Arc;

use crate::error::{Error, RatchetResult};
use crate::source::{Command, DelimiterChange, Delimiters, Location, Placement};

/// Prefix of every directive line.
pub const DIRECTIVE_PREFIX: &str = "--*";

/// Parse `text` with the default delimiters.
pub fn parse(text: &str) -> RatchetResult<Vec<Command>> {
    SqlSource::new(text).collect()
}

/// A streaming parser over the lines of one segment body or file.
#[derive(Debug)]
pub struct SqlSource<'a> {
    lines: Lines<'a>,
    line: usize,
    resource: Option<Arc<str>>,
    defaults: Delimiters,
    delimiters: Delimiters,
    done: bool,
}

impl<'a> SqlSource<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            line: 0,
            resource: None,
            defaults: Delimiters::default(),
            delimiters: Delimiters::default(),
            done: false,
        }
    }

    /// Number lines starting from `first_line` instead of 1.
    pub fn starting_at(mut self, first_line: usize) -> Self {
        self.line = first_line.saturating_sub(1);
        self
    }

    /// Name the resource in command locations.
    pub fn with_resource(mut self, resource: Option<Arc<str>>) -> Self {
        self.resource = resource;
        self
    }

    /// Use `delimiters` as the defaults that `RESET DELIMITER` restores.
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.defaults = delimiters.clone();
        self.delimiters = delimiters;
        self
    }

    fn location(&self, line: usize) -> Location {
        Location::new(self.resource.clone(), line)
    }

    fn next_command(&mut self) -> RatchetResult<Option<Command>> {
        let mut statement = String::new();
        let mut start: Option<usize> = None;
        let mut has_content = false;

        while let Some(line) = self.lines.next() {
            self.line += 1;
            let trimmed = line.trim();

            if let Some(rest) = trimmed.strip_prefix(DIRECTIVE_PREFIX) {
                if has_content {
                    let start = start.unwrap_or(self.line);
                    return Err(Error::Unterminated(self.location(start)));
                }
                // Only SQL comments were collected, they go with nothing.
                statement.clear();
                start = None;

                let text = rest.trim();
                if text.is_empty() || text.starts_with("//") {
                    continue;
                }
                let location = self.location(self.line);
                match DelimiterChange::parse(text, &location)? {
                    Some(DelimiterChange::Set(delimiters)) => self.delimiters = delimiters,
                    Some(DelimiterChange::Reset) => self.delimiters = self.defaults.clone(),
                    None => {}
                }
                return Ok(Some(Command::transient(text, location)));
            }

            if let Some(head) = self.delimiters.split(line) {
                statement.push_str(head);
                has_content |= is_content(head);
                if !has_content {
                    statement.clear();
                    start = None;
                    continue;
                }
                let location = self.location(start.unwrap_or(self.line));
                return Ok(Some(Command::persistent(statement, location)));
            }

            if start.is_none() {
                if trimmed.is_empty() {
                    continue;
                }
                start = Some(self.line);
            }
            has_content |= is_content(line);
            statement.push_str(line);
            statement.push('\n');
        }

        if has_content {
            let start = start.unwrap_or(self.line);
            return Err(Error::Unterminated(self.location(start)));
        }
        Ok(None)
    }
}

impl Iterator for SqlSource<'_> {
    type Item = RatchetResult<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_command() {
            Ok(Some(command)) => Some(Ok(command)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// Blank lines and `--` comments alone do not make a statement.
fn is_content(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("--")
    })
}

/// Write commands back out as text that parses to the same commands, starting
/// from `delimiters`.
pub fn render(commands: &[Command], delimiters: &Delimiters) -> RatchetResult<String> {
    let defaults = delimiters.clone();
    let mut current = delimiters.clone();
    let mut out = String::new();

    for command in commands {
        if command.is_transient() {
            writeln!(out, "{DIRECTIVE_PREFIX} {}", command.text()).map_err(fmt_error)?;
            match DelimiterChange::parse(command.text(), command.location())? {
                Some(DelimiterChange::Set(delimiters)) => current = delimiters,
                Some(DelimiterChange::Reset) => current = defaults.clone(),
                None => {}
            }
            continue;
        }

        let delimiter = current.primary();
        let text = command.text();
        match delimiter.placement() {
            Placement::Isolated => {
                out.push_str(text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
                writeln!(out, "{}", delimiter.token()).map_err(fmt_error)?;
            }
            Placement::Trailing => {
                writeln!(out, "{text}{}", delimiter.token()).map_err(fmt_error)?;
            }
        }
    }

    Ok(out)
}

fn fmt_error(e: std::fmt::Error) -> Error {
    Error::Execute(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CommandKind, Delimiter};

    fn kinds_and_text(commands: &[Command]) -> Vec<(CommandKind, String)> {
        commands
            .iter()
            .map(|c| (c.kind(), c.text().to_string()))
            .collect()
    }

    #[test]
    fn splits_on_isolated_go() {
        let text = "\nCREATE TABLE a (id int)\ngo\n\nINSERT INTO a VALUES (1)\n  GO  \n";
        let commands = parse(text).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].text(), "CREATE TABLE a (id int)\n");
        assert_eq!(commands[0].location().line(), 2);
        assert_eq!(commands[1].text(), "INSERT INTO a VALUES (1)\n");
        assert_eq!(commands[1].location().line(), 5);
    }

    #[test]
    fn directives_are_transient_and_comments_are_dropped() {
        let text = "--* // a comment\n--* SECTION \"Tables\"\nSELECT 1\nGO\n";
        let commands = parse(text).unwrap();
        assert_eq!(
            kinds_and_text(&commands),
            vec![
                (CommandKind::Transient, "SECTION \"Tables\"".to_string()),
                (CommandKind::Persistent, "SELECT 1\n".to_string()),
            ]
        );
        assert_eq!(commands[0].location().line(), 2);
    }

    #[test]
    fn delimiter_directive_applies_to_following_text() {
        let text = "--* DELIMITER IS ;\nSELECT 1;\nSELECT\n  2;\n--* RESET DELIMITER\nSELECT 3\nGO\n";
        let commands = parse(text).unwrap();
        let persistent: Vec<_> = commands
            .iter()
            .filter(|c| !c.is_transient())
            .map(|c| c.text().to_string())
            .collect();
        assert_eq!(persistent, vec!["SELECT 1", "SELECT\n  2", "SELECT 3\n"]);
    }

    #[test]
    fn two_delimiters_at_once() {
        let text = "--* DELIMITER IS ; OR ISOLATED /\nSELECT 1;\nBEGIN\n  x := 1;\nEND\n/\n";
        let commands = parse(text).unwrap();
        assert_eq!(commands[1].text(), "SELECT 1");
        // The trailing delimiter is tried first and ends the block early.
        assert_eq!(commands[2].text(), "BEGIN\n  x := 1");
    }

    #[test]
    fn unterminated_before_directive() {
        let text = "SELECT 1\n\n--* SECTION \"x\"\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::Unterminated(ref loc) if loc.line() == 1));
    }

    #[test]
    fn unterminated_at_end_of_input() {
        let text = "SELECT 1\nGO\nSELECT 2\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, Error::Unterminated(ref loc) if loc.line() == 3));
    }

    #[test]
    fn whitespace_and_comment_only_statements_are_discarded() {
        let text = "GO\n   \nGO\n-- just a note\nGO\n-- trailing note\n";
        assert!(parse(text).unwrap().is_empty());
    }

    #[test]
    fn starting_line_and_resource_are_reported() {
        let commands = SqlSource::new("SELECT 1\nGO\n")
            .starting_at(10)
            .with_resource(Some(Arc::from("patch.sql")))
            .collect::<RatchetResult<Vec<_>>>()
            .unwrap();
        assert_eq!(commands[0].location().to_string(), "patch.sql, line 10");
    }

    #[test]
    fn render_then_parse_is_stable() {
        let text = "--* SECTION \"one\"\nCREATE TABLE a (\n  id int\n)\nGO\n\
                    --* DELIMITER IS ;\nINSERT INTO a VALUES (1);\n--* RESET DELIMITER\n\
                    --* IGNORE SQL ERROR 42P07\nCREATE TABLE a (id int)\nGO\n--* END IGNORE SQL ERROR\n";
        let first = parse(text).unwrap();
        let rendered = render(&first, &Delimiters::default()).unwrap();
        let second = parse(&rendered).unwrap();
        assert_eq!(kinds_and_text(&first), kinds_and_text(&second));
    }

    #[test]
    fn non_ascii_directives() {
        let text = "--* SECTION \"été\"\n--* SET MESSAGE \"Über\"\nSELECT 'ü'\nGO\n";
        let commands = parse(text).unwrap();
        assert_eq!(
            kinds_and_text(&commands),
            vec![
                (CommandKind::Transient, "SECTION \"été\"".to_string()),
                (CommandKind::Transient, "SET MESSAGE \"Über\"".to_string()),
                (CommandKind::Persistent, "SELECT 'ü'\n".to_string()),
            ]
        );
    }

    #[test]
    fn render_with_trailing_default() {
        let delimiters = Delimiters::new(Delimiter::trailing(";"), None);
        let commands = SqlSource::new("SELECT 1;\nSELECT 2;\n")
            .with_delimiters(delimiters.clone())
            .collect::<RatchetResult<Vec<_>>>()
            .unwrap();
        assert_eq!(render(&commands, &delimiters).unwrap(), "SELECT 1;\nSELECT 2;\n");
    }
}
