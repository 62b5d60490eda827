//! The state the interpreter keeps while walking the commands of a segment.
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use crate::error::{Error, RatchetResult};
use crate::source::{Command, Location};

pub mod executor;
pub use executor::Executor;

mod query;
pub use query::{Query, QueryRepository};

/// Name of the connection every run starts on and the control state lives on.
pub const DEFAULT_CONNECTION: &str = "default";

const SECTION_LEVELS: usize = 10;

static VARIABLE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&\{(\w+)\}|&(\w+)").expect("static regex"));

/// Persistent commands queued between `BATCH` and `END BATCH`.
#[derive(Debug)]
pub struct Batch {
    connection: String,
    user: Option<String>,
    commands: Vec<(Command, Option<i64>)>,
}

impl Batch {
    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Queued commands with their progress position, `None` for commands in
    /// a `TRANSIENT` block.
    pub fn commands(&self) -> &[(Command, Option<i64>)] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Interpreter state for one segment, or for one included file.
///
/// Conditional blocks are tracked with two counters: `skip_depth` counts open
/// blocks that are being skipped, `no_skip_depth` counts open blocks being
/// run while nothing is skipped. A block opened inside a skipped block is
/// always counted as skipped and its condition is never evaluated.
///
/// An included file runs in a child context: it starts with the parent's
/// connection, user, variables and section level but with its own
/// conditional and ignore state. Leaving the child restores the parent as it
/// was.
#[derive(Debug)]
pub struct ExecutionContext {
    parent: Option<Box<ExecutionContext>>,
    commands: std::vec::IntoIter<Command>,
    resource: Option<Arc<str>>,
    connection: String,
    user: Option<String>,
    section_level: u8,
    pending: [Option<String>; SECTION_LEVELS],
    ignore_stack: Vec<Vec<String>>,
    ignored: HashSet<String>,
    skip_depth: usize,
    no_skip_depth: usize,
    batch: Option<Batch>,
    variables: HashMap<String, Option<String>>,
    transient: bool,
}

impl ExecutionContext {
    pub fn new(
        commands: Vec<Command>,
        resource: Option<Arc<str>>,
        connection: &str,
        user: Option<String>,
    ) -> Self {
        Self {
            parent: None,
            commands: commands.into_iter(),
            resource,
            connection: connection.to_string(),
            user,
            section_level: 0,
            pending: Default::default(),
            ignore_stack: Vec::new(),
            ignored: HashSet::new(),
            skip_depth: 0,
            no_skip_depth: 0,
            batch: None,
            variables: HashMap::new(),
            transient: false,
        }
    }

    /// Continue in a child context over `commands`.
    pub fn push(&mut self, commands: Vec<Command>, resource: Option<Arc<str>>) {
        let child = Self {
            parent: None,
            commands: commands.into_iter(),
            resource,
            connection: self.connection.clone(),
            user: self.user.clone(),
            section_level: self.section_level,
            pending: std::mem::take(&mut self.pending),
            ignore_stack: Vec::new(),
            ignored: HashSet::new(),
            skip_depth: 0,
            no_skip_depth: 0,
            batch: None,
            variables: self.variables.clone(),
            transient: self.transient,
        };
        let parent = std::mem::replace(self, child);
        self.parent = Some(Box::new(parent));
    }

    /// Go back to the parent context. `false` if this is the outermost one.
    ///
    /// Section messages the child did not show yet stay pending in the
    /// parent.
    pub fn pop(&mut self) -> bool {
        match self.parent.take() {
            Some(parent) => {
                let pending = std::mem::take(&mut self.pending);
                *self = *parent;
                self.pending = pending;
                true
            }
            None => false,
        }
    }

    /// The next command of this context, not looking at the parent.
    pub fn next_command(&mut self) -> Option<Command> {
        self.commands.next()
    }

    /// Check that nothing opened in this context is left open.
    pub fn finish(&self, location: &Location) -> RatchetResult<()> {
        if self.skip_depth > 0 || self.no_skip_depth > 0 {
            return Err(Error::source_error(
                "conditional block is not closed",
                location,
            ));
        }
        if self.batch.is_some() {
            return Err(Error::source_error("batch is not closed", location));
        }
        Ok(())
    }

    /// The resource the commands of this context come from.
    pub fn resource(&self) -> Option<&Arc<str>> {
        self.resource.as_ref()
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Switch to another connection with its default user.
    pub fn select_connection(&mut self, name: String, default_user: Option<String>) {
        self.connection = name;
        self.user = default_user;
    }

    pub fn set_user(&mut self, user: Option<String>) {
        self.user = user;
    }

    /// Whether commands are currently skipped here or in any ancestor.
    pub fn is_skipping(&self) -> bool {
        self.skip_depth > 0 || self.parent.as_ref().is_some_and(|p| p.is_skipping())
    }

    /// Open a conditional block that is skipped when `skip` is true.
    pub fn enter_block(&mut self, skip: bool) {
        if self.skip_depth == 0 && !skip {
            self.no_skip_depth += 1;
        } else {
            self.skip_depth += 1;
        }
    }

    /// Close the innermost conditional block.
    pub fn end_block(&mut self, location: &Location) -> RatchetResult<()> {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
        } else if self.no_skip_depth > 0 {
            self.no_skip_depth -= 1;
        } else {
            return Err(Error::source_error(
                "end of block without a matching SKIP or IF",
                location,
            ));
        }
        Ok(())
    }

    /// Switch the innermost conditional block to its other branch.
    pub fn else_block(&mut self, location: &Location) -> RatchetResult<()> {
        if self.skip_depth == 0 && self.no_skip_depth == 0 {
            return Err(Error::source_error("ELSE without a matching IF", location));
        }
        let was_skipping = self.skip_depth > 0;
        self.end_block(location)?;
        self.enter_block(!was_skipping);
        Ok(())
    }

    /// Set the message of a section level. Entering a level clears every
    /// pending message below it.
    pub fn section(&mut self, level: u8, message: String, location: &Location) -> RatchetResult<()> {
        let level_index = usize::from(level);
        if level_index >= SECTION_LEVELS || level > self.section_level + 1 {
            return Err(Error::source_error(
                format!(
                    "section level {level} is not allowed after level {}",
                    self.section_level
                ),
                location,
            ));
        }
        self.section_level = level;
        self.pending[level_index] = Some(message);
        for pending in &mut self.pending[level_index + 1..] {
            *pending = None;
        }
        Ok(())
    }

    /// Pending section messages, outermost first, to show before the next
    /// command that runs.
    pub fn take_sections(&mut self) -> Vec<(u8, String)> {
        self.pending
            .iter_mut()
            .enumerate()
            .filter_map(|(level, message)| message.take().map(|m| (level as u8, m)))
            .collect()
    }

    pub fn section_level(&self) -> u8 {
        self.section_level
    }

    /// Push a set of error codes to ignore.
    pub fn push_ignores(&mut self, codes: Vec<String>) {
        self.ignore_stack.push(codes);
        self.refresh_ignores();
    }

    /// Pop the most recent set of ignored codes.
    pub fn pop_ignores(&mut self, location: &Location) -> RatchetResult<()> {
        if self.ignore_stack.pop().is_none() {
            return Err(Error::source_error(
                "END IGNORE SQL ERROR without IGNORE SQL ERROR",
                location,
            ));
        }
        self.refresh_ignores();
        Ok(())
    }

    fn refresh_ignores(&mut self) {
        self.ignored = self.ignore_stack.iter().flatten().cloned().collect();
    }

    /// Whether an error with this code is currently non-fatal.
    pub fn is_ignored(&self, code: Option<&str>) -> bool {
        code.is_some_and(|code| self.ignored.contains(&code.to_ascii_uppercase()))
    }

    pub fn ignored(&self) -> &HashSet<String> {
        &self.ignored
    }

    pub fn set_variable(&mut self, name: String, value: Option<String>) {
        self.variables.insert(name.to_ascii_uppercase(), value);
    }

    /// `None` if the variable is not defined, `Some(None)` if it is null.
    pub fn variable(&self, name: &str) -> Option<Option<&str>> {
        self.variables
            .get(&name.to_ascii_uppercase())
            .map(Option::as_deref)
    }

    /// Replace `&name` and `&{name}` with the values of defined variables.
    /// References to undefined names are left alone.
    pub fn substitute(&self, command: &Command) -> RatchetResult<Command> {
        if self.variables.is_empty() || !command.text().contains('&') {
            return Ok(command.clone());
        }
        let text = command.text();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for captures in VARIABLE_REFERENCE.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let Some(name) = captures.get(1).or_else(|| captures.get(2)) else {
                continue;
            };
            match self.variable(name.as_str()) {
                None => continue,
                Some(None) => {
                    return Err(Error::source_error(
                        format!("variable {} is null", name.as_str()),
                        command.location(),
                    ));
                }
                Some(Some(value)) => {
                    out.push_str(&text[last..whole.start()]);
                    out.push_str(value);
                    last = whole.end();
                }
            }
        }
        out.push_str(&text[last..]);
        Ok(command.with_text(out))
    }

    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    pub fn begin_batch(&mut self, location: &Location) -> RatchetResult<()> {
        if self.batch.is_some() {
            return Err(Error::source_error("batch is already open", location));
        }
        self.batch = Some(Batch {
            connection: self.connection.clone(),
            user: self.user.clone(),
            commands: Vec::new(),
        });
        Ok(())
    }

    /// Queue a command in the open batch. Returns the command back if no
    /// batch is open.
    pub fn queue(&mut self, command: Command, position: Option<i64>) -> Option<Command> {
        match &mut self.batch {
            Some(batch) => {
                batch.commands.push((command, position));
                None
            }
            None => Some(command),
        }
    }

    pub fn end_batch(&mut self, location: &Location) -> RatchetResult<Batch> {
        self.batch
            .take()
            .ok_or_else(|| Error::source_error("END BATCH without BATCH", location))
    }

    /// Whether persistent commands are currently left out of progress.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn set_transient(&mut self, transient: bool, location: &Location) -> RatchetResult<()> {
        if self.transient == transient {
            let message = if transient {
                "TRANSIENT block is already open"
            } else {
                "END TRANSIENT without TRANSIENT"
            };
            return Err(Error::source_error(message, location));
        }
        self.transient = transient;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> Location {
        Location::new(None, 1)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(Vec::new(), None, DEFAULT_CONNECTION, None)
    }

    #[test]
    fn nested_skip_stays_skipped() {
        let mut ctx = context();
        ctx.enter_block(true);
        ctx.enter_block(false);
        assert!(ctx.is_skipping());
        ctx.end_block(&here()).unwrap();
        assert!(ctx.is_skipping());
        ctx.end_block(&here()).unwrap();
        assert!(!ctx.is_skipping());
    }

    #[test]
    fn unmatched_end_is_an_error() {
        let mut ctx = context();
        assert!(matches!(ctx.end_block(&here()), Err(Error::Source { .. })));
        assert!(matches!(ctx.else_block(&here()), Err(Error::Source { .. })));
    }

    #[test]
    fn else_flips_the_innermost_block() {
        let mut ctx = context();
        ctx.enter_block(false);
        assert!(!ctx.is_skipping());
        ctx.else_block(&here()).unwrap();
        assert!(ctx.is_skipping());
        ctx.end_block(&here()).unwrap();
        assert!(!ctx.is_skipping());

        // Inside a skipped block ELSE keeps skipping.
        ctx.enter_block(true);
        ctx.enter_block(false);
        ctx.else_block(&here()).unwrap();
        assert!(ctx.is_skipping());
        ctx.end_block(&here()).unwrap();
        ctx.else_block(&here()).unwrap();
        assert!(!ctx.is_skipping());
        ctx.end_block(&here()).unwrap();
        ctx.finish(&here()).unwrap();
    }

    #[test]
    fn ignore_sets_are_additive() {
        let mut ctx = context();
        ctx.push_ignores(vec!["A".into()]);
        ctx.push_ignores(vec!["B".into()]);
        assert!(ctx.is_ignored(Some("a")));
        assert!(ctx.is_ignored(Some("B")));
        ctx.pop_ignores(&here()).unwrap();
        assert!(ctx.is_ignored(Some("A")));
        assert!(!ctx.is_ignored(Some("B")));
        assert!(!ctx.is_ignored(None));
        ctx.pop_ignores(&here()).unwrap();
        assert!(ctx.pop_ignores(&here()).is_err());
    }

    #[test]
    fn sections_clear_deeper_levels() {
        let mut ctx = context();
        assert!(ctx.section(2, "too deep".into(), &here()).is_err());
        ctx.section(1, "one".into(), &here()).unwrap();
        ctx.section(2, "two".into(), &here()).unwrap();
        ctx.section(1, "uno".into(), &here()).unwrap();
        assert_eq!(ctx.take_sections(), vec![(1, "uno".to_string())]);
        assert!(ctx.take_sections().is_empty());
        ctx.section(0, "top".into(), &here()).unwrap();
        assert_eq!(ctx.section_level(), 0);
    }

    #[test]
    fn child_inherits_data_but_not_control_flow() {
        let mut ctx = context();
        ctx.set_variable("x".into(), Some("1".into()));
        ctx.push_ignores(vec!["23505".into()]);
        ctx.enter_block(true);
        ctx.push(Vec::new(), None);
        assert!(ctx.is_skipping());
        assert!(!ctx.is_ignored(Some("23505")));
        assert_eq!(ctx.variable("X"), Some(Some("1")));
        ctx.set_variable("x".into(), Some("2".into()));
        ctx.enter_block(false);
        assert!(ctx.pop());
        assert_eq!(ctx.variable("x"), Some(Some("1")));
        assert!(ctx.is_ignored(Some("23505")));
        assert!(!ctx.pop());
    }

    #[test]
    fn unshown_sections_survive_the_child() {
        let mut ctx = context();
        ctx.section(1, "Tables".into(), &here()).unwrap();
        ctx.push(Vec::new(), None);
        assert!(ctx.pop());
        assert_eq!(ctx.take_sections(), vec![(1, "Tables".to_string())]);

        ctx.push(Vec::new(), None);
        ctx.section(2, "Views".into(), &here()).unwrap();
        assert!(ctx.pop());
        assert_eq!(ctx.take_sections(), vec![(2, "Views".to_string())]);
    }

    #[test]
    fn variables_are_substituted() {
        let mut ctx = context();
        ctx.set_variable("tbl".into(), Some("users".into()));
        ctx.set_variable("empty".into(), None);
        let command = Command::persistent("SELECT a && b FROM &tbl JOIN &{TBL}_x", here());
        assert_eq!(
            ctx.substitute(&command).unwrap().text(),
            "SELECT a && b FROM users JOIN users_x"
        );
        let null = Command::persistent("SELECT &empty", here());
        assert!(ctx.substitute(&null).is_err());
    }

    #[test]
    fn batch_and_transient_must_balance() {
        let mut ctx = context();
        ctx.begin_batch(&here()).unwrap();
        assert!(ctx.begin_batch(&here()).is_err());
        assert!(ctx.finish(&here()).is_err());
        assert!(ctx.queue(Command::persistent("x", here()), Some(1)).is_none());
        let batch = ctx.end_batch(&here()).unwrap();
        assert_eq!(batch.commands().len(), 1);
        assert!(ctx.end_batch(&here()).is_err());
        assert!(ctx.set_transient(false, &here()).is_err());
        ctx.set_transient(true, &here()).unwrap();
        assert!(ctx.set_transient(true, &here()).is_err());
    }
}
