//! Running the commands of one segment against the database.
//!
//! Each persistent command runs in its own transaction on the current
//! connection and is committed before the position of the command is written
//! to the control state. When a run starts on a segment that an earlier run
//! left in flight, the commands up to the recorded position are passed over,
//! while every directive is interpreted again from the top.
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::Databases;
use crate::context::{DEFAULT_CONNECTION, ExecutionContext, Executor};
use crate::control::{ControlStore, HistoryRecord};
use crate::directive::Directive;
use crate::error::{Error, RatchetResult, SqlError};
use crate::listener::{CommandListener, NoProgress, ProgressListener, dispatch};
use crate::source::{Command, Delimiters, FileLoader, Location, ResourceLoader, SqlSource};
use crate::upgrade::{PatchSegment, Resolver, UpgradeFile};

static NO_PROGRESS: NoProgress = NoProgress;
static DEFAULT_LOADER: FileLoader = FileLoader::new();

/// Options of an upgrade run.
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Admit downgrade segments when resolving a path.
    pub downgrade_allowed: bool,
    /// Write a log row for every committed statement, not only for
    /// failures, ignored errors and completed segments.
    pub log_statements: bool,
}

impl UpgradeOptions {
    pub fn allow_downgrade(mut self, allowed: bool) -> Self {
        self.downgrade_allowed = allowed;
        self
    }

    pub fn log_statements(mut self, log: bool) -> Self {
        self.log_statements = log;
        self
    }
}

/// A flag to stop a run between two commands.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop after the command in progress.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag for another run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What running one segment did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SegmentOutcome {
    /// Position of the last persistent command of the segment.
    pub statements: i64,
    /// Statements committed by an earlier run and not sent again.
    pub resumed: i64,
    pub executed: usize,
    pub suppressed: usize,
    pub skipped: usize,
}

enum Executed {
    Committed,
    Suppressed(SqlError),
}

struct SegmentRun<'s> {
    segment: &'s PatchSegment,
    delimiters: &'s Delimiters,
    resume_from: i64,
    position: i64,
    outcome: SegmentOutcome,
}

/// Interprets the commands of segments and executes them.
pub struct CommandProcessor<'r, E: Executor> {
    databases: &'r mut Databases<E>,
    control: &'r mut ControlStore,
    options: &'r UpgradeOptions,
    listeners: &'r [Box<dyn CommandListener<E>>],
    progress: &'r dyn ProgressListener,
    loader: &'r dyn ResourceLoader,
    interrupt: Option<&'r Interrupt>,
}

impl<'r, E: Executor> CommandProcessor<'r, E> {
    pub fn new(
        databases: &'r mut Databases<E>,
        control: &'r mut ControlStore,
        options: &'r UpgradeOptions,
    ) -> Self {
        Self {
            databases,
            control,
            options,
            listeners: &[],
            progress: &NO_PROGRESS,
            loader: &DEFAULT_LOADER,
            interrupt: None,
        }
    }

    pub fn with_listeners(mut self, listeners: &'r [Box<dyn CommandListener<E>>]) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn with_progress(mut self, progress: &'r dyn ProgressListener) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_loader(mut self, loader: &'r dyn ResourceLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_interrupt(mut self, interrupt: &'r Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.is_some_and(Interrupt::is_interrupted)
    }

    /// Run every command of `segment` and, when all are done, record its
    /// target as the current version.
    pub async fn run_segment(
        &mut self,
        file: &UpgradeFile,
        segment: &PatchSegment,
    ) -> RatchetResult<SegmentOutcome> {
        let commands = file.commands(segment)?.to_vec();
        let state = self.control.state(self.databases.default_executor()).await?;
        let resume_from = if state.in_flight() == Some(segment.target())
            && state.version() == segment.source()
        {
            state.statements
        } else {
            0
        };
        self.progress.segment_starting(segment, resume_from);

        let user = self.databases.default_user(DEFAULT_CONNECTION)?;
        let resource = file.name().map(Arc::from);
        let mut ctx = ExecutionContext::new(commands, resource, DEFAULT_CONNECTION, user);
        let mut run = SegmentRun {
            segment,
            delimiters: file.delimiters(),
            resume_from,
            position: 0,
            outcome: SegmentOutcome {
                resumed: resume_from,
                ..SegmentOutcome::default()
            },
        };

        let mut last = segment.location().clone();
        loop {
            let Some(command) = ctx.next_command() else {
                ctx.finish(&last)?;
                if ctx.pop() {
                    continue;
                }
                break;
            };
            last = command.location().clone();

            if let Err(error) = self.step(&mut ctx, &mut run, &command).await {
                self.record_failure(&run, &command, &error).await;
                self.progress.failed(&error);
                return Err(error);
            }
            if self.interrupted() {
                log::info!(target: "ratchet", "interrupted after {}", command.location());
                return Err(Error::Interrupted);
            }
        }

        self.complete(file, &mut run).await?;
        Ok(run.outcome)
    }

    async fn step(
        &mut self,
        ctx: &mut ExecutionContext,
        run: &mut SegmentRun<'_>,
        command: &Command,
    ) -> RatchetResult<()> {
        if command.is_transient() {
            return self.transient(ctx, run, command).await;
        }

        let counted = !ctx.is_transient();
        if counted {
            run.position += 1;
        }
        if counted && run.position <= run.resume_from {
            log::trace!(target: "ratchet", "statement {} is already committed", run.position);
            return Ok(());
        }
        if ctx.is_skipping() {
            run.outcome.skipped += 1;
            self.progress.skipped(command);
            return Ok(());
        }

        let command = ctx.substitute(command)?;
        let position = counted.then_some(run.position);
        self.emit_sections(ctx);
        let Some(command) = ctx.queue(command, position) else {
            return Ok(());
        };

        self.progress.executing(&command);
        match self.execute(ctx, &command).await? {
            Executed::Committed => {
                run.outcome.executed += 1;
                self.progress.executed(&command);
                if let Some(position) = position {
                    self.record_progress(run, position).await?;
                    if self.options.log_statements {
                        let record =
                            HistoryRecord::statement(run.segment, position, command.text(), "OK");
                        self.log_best_effort(&record).await;
                    }
                }
            }
            Executed::Suppressed(error) => {
                run.outcome.suppressed += 1;
                self.progress.suppressed(&command, &error);
                let record = HistoryRecord::statement(
                    run.segment,
                    run.position,
                    command.text(),
                    format!("IGNORED {error}"),
                );
                self.log_best_effort(&record).await;
            }
        }
        Ok(())
    }

    // Send one persistent command, letting listeners claim it first, and end
    // its transaction.
    async fn execute(&mut self, ctx: &ExecutionContext, command: &Command) -> RatchetResult<Executed> {
        let executor = self.databases.session(ctx.connection(), ctx.user()).await?;
        let result = match dispatch(self.listeners, command, ctx, executor).await {
            Ok(true) => Ok(()),
            Ok(false) => executor
                .execute(command.text())
                .await
                .map_err(Error::Database),
            Err(e) => Err(e),
        };
        let result = match result {
            Ok(()) => executor.commit().await.map_err(Error::Database),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(Executed::Committed),
            Err(error) => {
                if let Err(e) = executor.rollback().await {
                    log::warn!(target: "ratchet", "rollback failed: {e}");
                }
                match error {
                    Error::Database(source) if ctx.is_ignored(source.code()) => {
                        Ok(Executed::Suppressed(source))
                    }
                    Error::Database(source) => Err(statement_error(source, command)),
                    other => Err(other),
                }
            }
        }
    }

    async fn transient(
        &mut self,
        ctx: &mut ExecutionContext,
        run: &mut SegmentRun<'_>,
        command: &Command,
    ) -> RatchetResult<()> {
        let location = command.location();
        let directive = Directive::parse(command.text(), location)?;
        if ctx.in_batch() && directive != Some(Directive::EndBatch) {
            return Err(Error::source_error(
                "transient commands are not allowed in batch mode",
                location,
            ));
        }

        let Some(directive) = directive else {
            if ctx.is_skipping() {
                return Ok(());
            }
            let executor = self.databases.session(ctx.connection(), ctx.user()).await?;
            let claimed = match dispatch(self.listeners, command, ctx, executor).await {
                Ok(claimed) => executor.commit().await.map(|()| claimed).map_err(Error::Database),
                Err(e) => {
                    if let Err(e) = executor.rollback().await {
                        log::warn!(target: "ratchet", "rollback failed: {e}");
                    }
                    Err(e)
                }
            }?;
            if claimed {
                return Ok(());
            }
            return Err(Error::UnknownCommand {
                command: command.text().to_string(),
                location: location.clone(),
            });
        };

        if ctx.is_skipping() && !directive.is_structural() {
            log::trace!(target: "ratchet", "skipped directive ({location})");
            return Ok(());
        }

        match directive {
            Directive::Section { level, message } => ctx.section(level, message, location)?,
            Directive::Delimiter | Directive::Encoding => {}
            Directive::IgnoreSqlError(codes) => ctx.push_ignores(codes),
            Directive::EndIgnoreSqlError => ctx.pop_ignores(location)?,
            Directive::SelectConnection(name) => {
                let user = self.databases.default_user(&name)?;
                ctx.select_connection(name, user);
            }
            Directive::SetUser(user) => ctx.set_user(Some(user)),
            Directive::Skip => ctx.enter_block(true),
            Directive::EndSkip | Directive::EndIf => ctx.end_block(location)?,
            Directive::Else => ctx.else_block(location)?,
            Directive::IfVariable { name, is_null } => {
                let skip = if ctx.is_skipping() {
                    true
                } else {
                    let value = ctx.variable(&name).ok_or_else(|| {
                        Error::source_error(format!("variable {name} is not defined"), location)
                    })?;
                    value.is_none() != is_null
                };
                ctx.enter_block(skip);
            }
            Directive::IfHistory { version, contains } => {
                let skip = if ctx.is_skipping() {
                    true
                } else {
                    let executor = self.databases.default_executor();
                    self.control.history_contains(executor, &version).await? != contains
                };
                ctx.enter_block(skip);
            }
            Directive::SetVariable { name, select } => {
                let value = self.query_value(ctx, command, &select).await?;
                log::debug!(target: "ratchet", "variable {name} = {value:?}");
                ctx.set_variable(name, value);
            }
            Directive::Batch => ctx.begin_batch(location)?,
            Directive::EndBatch => self.flush_batch(ctx, run, location).await?,
            Directive::Transient => ctx.set_transient(true, location)?,
            Directive::EndTransient => ctx.set_transient(false, location)?,
            Directive::Include(name) => {
                let base = ctx.resource().cloned();
                let resource = self.loader.load(&name, base.as_deref())?;
                let commands = SqlSource::new(resource.text())
                    .with_resource(Some(resource.name().clone()))
                    .with_delimiters(run.delimiters.clone())
                    .collect::<RatchetResult<Vec<_>>>()?;
                log::debug!(
                    target: "ratchet",
                    "including {} with {} commands",
                    resource.name(),
                    commands.len()
                );
                ctx.push(commands, Some(resource.name().clone()));
            }
        }
        Ok(())
    }

    async fn query_value(
        &mut self,
        ctx: &ExecutionContext,
        command: &Command,
        select: &str,
    ) -> RatchetResult<Option<String>> {
        let executor = self.databases.session(ctx.connection(), ctx.user()).await?;
        let result = executor.query_value(select).await;
        let ended = match &result {
            Ok(_) => executor.commit().await,
            Err(_) => executor.rollback().await,
        };
        let value = result.map_err(|e| statement_error(e, command))?;
        ended.map_err(|e| statement_error(e, command))?;
        Ok(value.flatten())
    }

    async fn flush_batch(
        &mut self,
        ctx: &mut ExecutionContext,
        run: &mut SegmentRun<'_>,
        location: &Location,
    ) -> RatchetResult<()> {
        let batch = ctx.end_batch(location)?;
        if batch.is_empty() {
            return Ok(());
        }
        let statements: Vec<String> = batch
            .commands()
            .iter()
            .map(|(command, _)| command.text().to_string())
            .collect();
        for (command, _) in batch.commands() {
            self.progress.executing(command);
        }

        let executor = self.databases.session(batch.connection(), batch.user()).await?;
        let result = match executor.execute_batch(&statements).await {
            Ok(()) => executor.commit().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                run.outcome.executed += batch.commands().len();
                for (command, _) in batch.commands() {
                    self.progress.executed(command);
                }
                let last = batch.commands().iter().filter_map(|(_, p)| *p).max();
                if let Some(position) = last {
                    self.record_progress(run, position).await?;
                }
                Ok(())
            }
            Err(error) => {
                if let Err(e) = executor.rollback().await {
                    log::warn!(target: "ratchet", "rollback failed: {e}");
                }
                let first = &batch.commands()[0].0;
                if !ctx.is_ignored(error.code()) {
                    return Err(statement_error(error, first));
                }
                run.outcome.suppressed += batch.commands().len();
                for (command, position) in batch.commands() {
                    self.progress.suppressed(command, &error);
                    let record = HistoryRecord::statement(
                        run.segment,
                        position.unwrap_or(run.position),
                        command.text(),
                        format!("IGNORED {error}"),
                    );
                    self.log_best_effort(&record).await;
                }
                Ok(())
            }
        }
    }

    fn emit_sections(&self, ctx: &mut ExecutionContext) {
        for (level, message) in ctx.take_sections() {
            self.progress.section(level, &message);
        }
    }

    async fn record_progress(&mut self, run: &SegmentRun<'_>, position: i64) -> RatchetResult<()> {
        let executor = self.databases.default_executor();
        let state = self
            .control
            .record_progress(executor, run.segment.target(), position)
            .await?;
        self.progress.progress(&state);
        Ok(())
    }

    async fn log_best_effort(&mut self, record: &HistoryRecord) {
        let executor = self.databases.default_executor();
        if let Err(e) = self.control.log(executor, record).await {
            log::warn!(target: "ratchet", "could not write to the log table: {e}");
        }
    }

    async fn record_failure(&mut self, run: &SegmentRun<'_>, command: &Command, error: &Error) {
        let record = HistoryRecord::statement(
            run.segment,
            run.position,
            command.text(),
            format!("FAILED {error}"),
        );
        self.log_best_effort(&record).await;
    }

    async fn complete(&mut self, file: &UpgradeFile, run: &mut SegmentRun<'_>) -> RatchetResult<()> {
        let segment = run.segment;
        let executor = self.databases.default_executor();

        if segment.kind().is_downgrade() {
            // Versions after the downgrade target are no longer part of the
            // database's history.
            let undone: Vec<String> = Resolver::new(file)
                .reachable(Some(segment.target()), false)
                .into_iter()
                .filter(|v| v != segment.target())
                .collect();
            self.control.downgrade_history(executor, &undone).await?;
        }

        self.control
            .log(executor, &HistoryRecord::complete(segment, run.position))
            .await?;
        let state = self.control.record_version(executor, segment.target()).await?;
        run.outcome.statements = run.position;
        self.progress.progress(&state);
        self.progress.segment_finished(segment);
        Ok(())
    }
}

fn statement_error(source: SqlError, command: &Command) -> Error {
    Error::Statement {
        source,
        command: command.text().to_string(),
        location: command.location().clone(),
    }
}
