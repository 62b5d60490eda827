//! The grammar of `--*` directives understood by the interpreter.
//!
//! Every block directive can be closed with either `END X` or `/X`.
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Error, RatchetResult};
use crate::source::{DelimiterChange, Location};

macro_rules! directive_regex {
    ($name:ident, $pattern:literal) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(concat!("(?i)^", $pattern, r"\s*$")).expect("static regex"));
    };
}

directive_regex!(SECTION, r#"SECTION(?:\.(\d))?\s+"(.*)""#);
directive_regex!(SET_MESSAGE, r#"SET\s+MESSAGE\s+"(.*)""#);
directive_regex!(IGNORE, r"IGNORE\s+SQL\s+ERROR\s+(\w+(?:\s*,\s*\w+)*)");
directive_regex!(END_IGNORE, r"(?:END\s+|/)IGNORE\s+SQL\s+ERROR");
directive_regex!(SELECT_CONNECTION, r"SELECT\s+CONNECTION\s+(\w+)");
directive_regex!(SET_USER, r"SET\s+USER\s+(\w+)");
directive_regex!(SKIP, r"SKIP");
directive_regex!(END_SKIP, r"(?:END\s+|/)SKIP");
directive_regex!(IF_VARIABLE, r"IF\s+VARIABLE\s+(\w+)\s+IS\s+(NOT\s+)?NULL");
directive_regex!(IF_HISTORY, r#"IF\s+HISTORY\s+(NOT\s+)?CONTAINS\s+"([^"]*)""#);
directive_regex!(ELSE, r"ELSE");
directive_regex!(END_IF, r"(?:END\s+|/)IF");
directive_regex!(SET_VARIABLE, r"SET\s+VARIABLE\s+(\w+)\s*=\s*(SELECT\s.*)");
directive_regex!(BATCH, r"BATCH");
directive_regex!(END_BATCH, r"(?:END\s+|/)BATCH");
directive_regex!(TRANSIENT, r"TRANSIENT");
directive_regex!(END_TRANSIENT, r"(?:END\s+|/)TRANSIENT");
directive_regex!(INCLUDE, r#"INCLUDE\s+"([^"]*)""#);
directive_regex!(ENCODING, r#"ENCODING\s+"([^"]*)""#);

/// A directive recognized by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// A progress message at a nesting level (0 to 9).
    Section { level: u8, message: String },
    /// `DELIMITER` and `RESET DELIMITER`; already applied by the parser.
    Delimiter,
    IgnoreSqlError(Vec<String>),
    EndIgnoreSqlError,
    SelectConnection(String),
    SetUser(String),
    Skip,
    EndSkip,
    IfVariable { name: String, is_null: bool },
    IfHistory { version: String, contains: bool },
    Else,
    EndIf,
    SetVariable { name: String, select: String },
    Batch,
    EndBatch,
    Transient,
    EndTransient,
    Include(String),
    Encoding,
}

impl Directive {
    /// Recognize the text of a transient command, or `None` if it is not a
    /// directive and should go to the command listeners.
    pub fn parse(text: &str, location: &Location) -> RatchetResult<Option<Self>> {
        let text = text.trim();

        if DelimiterChange::parse(text, location)?.is_some() {
            return Ok(Some(Self::Delimiter));
        }
        if let Some(c) = SECTION.captures(text) {
            let level = match c.get(1) {
                Some(level) => level
                    .as_str()
                    .parse::<u8>()
                    .map_err(|e| Error::source_error(e.to_string(), location))?,
                None => 1,
            };
            return Ok(Some(Self::Section {
                level,
                message: group(&c, 2),
            }));
        }
        if let Some(c) = SET_MESSAGE.captures(text) {
            return Ok(Some(Self::Section {
                level: 1,
                message: group(&c, 1),
            }));
        }
        if let Some(c) = IGNORE.captures(text) {
            let codes = group(&c, 1)
                .split(',')
                .map(|code| code.trim().to_ascii_uppercase())
                .collect();
            return Ok(Some(Self::IgnoreSqlError(codes)));
        }
        if END_IGNORE.is_match(text) {
            return Ok(Some(Self::EndIgnoreSqlError));
        }
        if let Some(c) = SELECT_CONNECTION.captures(text) {
            return Ok(Some(Self::SelectConnection(group(&c, 1).to_ascii_lowercase())));
        }
        if let Some(c) = SET_USER.captures(text) {
            return Ok(Some(Self::SetUser(group(&c, 1))));
        }
        if SKIP.is_match(text) {
            return Ok(Some(Self::Skip));
        }
        if END_SKIP.is_match(text) {
            return Ok(Some(Self::EndSkip));
        }
        if let Some(c) = IF_VARIABLE.captures(text) {
            return Ok(Some(Self::IfVariable {
                name: group(&c, 1).to_ascii_uppercase(),
                is_null: c.get(2).is_none(),
            }));
        }
        if let Some(c) = IF_HISTORY.captures(text) {
            return Ok(Some(Self::IfHistory {
                version: group(&c, 2),
                contains: c.get(1).is_none(),
            }));
        }
        if ELSE.is_match(text) {
            return Ok(Some(Self::Else));
        }
        if END_IF.is_match(text) {
            return Ok(Some(Self::EndIf));
        }
        if let Some(c) = SET_VARIABLE.captures(text) {
            return Ok(Some(Self::SetVariable {
                name: group(&c, 1).to_ascii_uppercase(),
                select: group(&c, 2),
            }));
        }
        if BATCH.is_match(text) {
            return Ok(Some(Self::Batch));
        }
        if END_BATCH.is_match(text) {
            return Ok(Some(Self::EndBatch));
        }
        if TRANSIENT.is_match(text) {
            return Ok(Some(Self::Transient));
        }
        if END_TRANSIENT.is_match(text) {
            return Ok(Some(Self::EndTransient));
        }
        if let Some(c) = INCLUDE.captures(text) {
            return Ok(Some(Self::Include(group(&c, 1))));
        }
        if ENCODING.is_match(text) {
            return Ok(Some(Self::Encoding));
        }

        Ok(None)
    }

    /// Directives that only change interpreter bookkeeping and therefore
    /// still apply inside a skipped block.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Section { .. }
                | Self::Delimiter
                | Self::IgnoreSqlError(_)
                | Self::EndIgnoreSqlError
                | Self::Skip
                | Self::EndSkip
                | Self::IfVariable { .. }
                | Self::IfHistory { .. }
                | Self::Else
                | Self::EndIf
                | Self::Batch
                | Self::EndBatch
                | Self::Transient
                | Self::EndTransient
                | Self::Encoding
        )
    }
}

fn group(captures: &regex::Captures<'_>, i: usize) -> String {
    captures.get(i).map_or_else(String::new, |m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<Directive> {
        Directive::parse(text, &Location::new(None, 1)).unwrap()
    }

    #[test]
    fn sections() {
        assert_eq!(
            parse(r#"SECTION "Creating tables""#),
            Some(Directive::Section {
                level: 1,
                message: "Creating tables".into()
            })
        );
        assert_eq!(
            parse(r#"section.3 "deep""#),
            Some(Directive::Section {
                level: 3,
                message: "deep".into()
            })
        );
        assert_eq!(
            parse(r#"SET MESSAGE "hello""#),
            Some(Directive::Section {
                level: 1,
                message: "hello".into()
            })
        );
        // Two digit levels are not sections at all.
        assert_eq!(parse(r#"SECTION.10 "x""#), None);
    }

    #[test]
    fn ignore_codes_are_normalized() {
        assert_eq!(
            parse("IGNORE SQL ERROR 23505, 42p07"),
            Some(Directive::IgnoreSqlError(vec!["23505".into(), "42P07".into()]))
        );
        assert_eq!(parse("END IGNORE SQL ERROR"), Some(Directive::EndIgnoreSqlError));
        assert_eq!(parse("/IGNORE SQL ERROR"), Some(Directive::EndIgnoreSqlError));
    }

    #[test]
    fn conditionals() {
        assert_eq!(
            parse("IF VARIABLE tbl IS NOT NULL"),
            Some(Directive::IfVariable {
                name: "TBL".into(),
                is_null: false
            })
        );
        assert_eq!(
            parse(r#"IF HISTORY NOT CONTAINS "1.1""#),
            Some(Directive::IfHistory {
                version: "1.1".into(),
                contains: false
            })
        );
        assert_eq!(parse("else"), Some(Directive::Else));
        assert_eq!(parse("/IF"), Some(Directive::EndIf));
        assert_eq!(parse("END SKIP"), Some(Directive::EndSkip));
    }

    #[test]
    fn set_variable_keeps_select() {
        assert_eq!(
            parse("SET VARIABLE n = SELECT count(*) FROM t"),
            Some(Directive::SetVariable {
                name: "N".into(),
                select: "SELECT count(*) FROM t".into()
            })
        );
    }

    #[test]
    fn connections_and_users() {
        assert_eq!(
            parse("SELECT CONNECTION Queue"),
            Some(Directive::SelectConnection("queue".into()))
        );
        assert_eq!(parse("SET USER app"), Some(Directive::SetUser("app".into())));
    }

    #[test]
    fn unknown_text_goes_to_listeners() {
        assert_eq!(parse(r#"ASSERT EXISTS MESSAGE "x" SELECT 1"#), None);
        assert_eq!(parse("SKIPPY"), None);
    }

    #[test]
    fn skipped_blocks_still_apply_structure() {
        assert!(Directive::Skip.is_structural());
        assert!(!Directive::SetUser("x".into()).is_structural());
        assert!(!Directive::Include("a.sql".into()).is_structural());
    }
}
