use chrono::Utc;
use ratchet_core::connection::Databases;
use ratchet_core::context::Executor;
use ratchet_core::control::{ControlState, ControlStore};
use ratchet_core::error::{Error, RatchetResult};
use ratchet_core::listener::{CommandListener, LogProgress, ProgressListener};
use ratchet_core::source::{FileLoader, ResourceLoader};
use ratchet_core::upgrade::{PatchSegment, Resolver, Target, UpgradeFile, display_version};
use ratchet_core::{AssertListener, CommandProcessor, Interrupt, UpgradeOptions};

mod report;
pub use report::{AttachReport as _, HistoryReport, Report, SegmentResult};

/// `Ratchet` is the main application: one upgrade file, the database
/// connections it runs against, and the listeners that watch it.
pub struct Ratchet<E: Executor> {
    file: UpgradeFile,
    databases: Databases<E>,
    control: ControlStore,
    options: UpgradeOptions,
    listeners: Vec<Box<dyn CommandListener<E>>>,
    progress: Box<dyn ProgressListener>,
    loader: Box<dyn ResourceLoader>,
    interrupt: Interrupt,
}

impl<E: Executor> Ratchet<E> {
    /// Create a new `Ratchet` application for `file` with `executor` as the
    /// default connection.
    ///
    /// `ASSERT` statements are understood and progress goes to the `log`
    /// facade unless other listeners are configured.
    pub fn new(file: UpgradeFile, executor: E) -> Self {
        let control = ControlStore::new(file.control_tables().clone());
        Self {
            file,
            databases: Databases::new(executor),
            control,
            options: UpgradeOptions::default(),
            listeners: vec![Box::new(AssertListener)],
            progress: Box::new(LogProgress),
            loader: Box::new(FileLoader::new()),
            interrupt: Interrupt::new(),
        }
    }

    /// Read the upgrade file at `path` and create the application for it.
    pub fn open(path: &str, executor: E) -> RatchetResult<Self> {
        let file = UpgradeFile::open(&FileLoader::new(), path)?;
        Ok(Self::new(file, executor))
    }

    /// Add a connection that `SELECT CONNECTION name` switches to.
    pub fn with_connection(mut self, name: &str, executor: E, default_user: Option<&str>) -> Self {
        self.databases
            .add(name, executor, default_user.map(str::to_string));
        self
    }

    /// Run the default connection as `user` unless a directive says
    /// otherwise.
    pub fn with_default_user(mut self, user: &str) -> Self {
        self.databases.set_default_user(Some(user.to_string()));
        self
    }

    pub fn with_options(mut self, options: UpgradeOptions) -> Self {
        self.options = options;
        self
    }

    /// Report progress to `progress` instead of the `log` facade.
    pub fn with_progress<P: ProgressListener + 'static>(mut self, progress: P) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// Add a command listener, asked after the ones added before it.
    pub fn with_listener<L: CommandListener<E> + 'static>(mut self, listener: L) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Resolve `INCLUDE` names with `loader`.
    pub fn with_loader<L: ResourceLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// A handle for stopping a run from another task or a signal handler.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn file(&self) -> &UpgradeFile {
        &self.file
    }

    /// The control state as it is in the database now.
    pub async fn current_state(&mut self) -> RatchetResult<ControlState> {
        self.control.invalidate();
        self.control.state(self.databases.default_executor()).await
    }

    /// Versions that could be given as an exact target from the current
    /// version, see [`Resolver::targets`].
    pub async fn targets(&mut self, tips: bool, prefix: Option<&str>) -> RatchetResult<Vec<String>> {
        let state = self.current_state().await?;
        let from = state.in_flight().or(state.version());
        Ok(Resolver::new(&self.file).targets(
            from,
            tips,
            prefix,
            self.options.downgrade_allowed,
        ))
    }

    /// Return a report of what [`upgrade`] would do without running anything.
    ///
    /// [`upgrade`]: Self::upgrade
    pub async fn plan(&mut self, target: &Target) -> RatchetResult<Report> {
        let state = self.current_state().await?;
        let path = resolve_path(&self.file, &state, target, &self.options)?;

        let mut results = Vec::new();
        for segment in path {
            let commands = self.file.commands(segment).with_report(&results)?;
            let statements = commands.iter().filter(|c| !c.is_transient()).count() as i64;
            let resumed_from = resume_position(&state, segment);
            results.push(SegmentResult::planned(segment, statements, resumed_from));
        }

        Ok(Report::new(results))
    }

    /// Bring the database to `target`, finishing a segment an earlier run
    /// left in flight first.
    pub async fn upgrade(&mut self, target: &Target) -> RatchetResult<Report> {
        self.interrupt.reset();
        let state = self.current_state().await?;

        let Self {
            file,
            databases,
            control,
            options,
            listeners,
            progress,
            loader,
            interrupt,
        } = self;
        let path = resolve_path(file, &state, target, options)?;
        if path.is_empty() {
            progress.no_upgrade_needed(state.version());
            return Ok(Report::default());
        }

        // Statements are only sent once the whole path is known to parse.
        for segment in &path {
            file.commands(segment)?;
        }
        control.ensure_tables(databases.default_executor()).await?;

        let mut processor = CommandProcessor::new(databases, control, options)
            .with_listeners(listeners)
            .with_progress(progress.as_ref())
            .with_loader(loader.as_ref())
            .with_interrupt(interrupt);

        let mut results = Vec::new();
        for segment in path {
            if interrupt.is_interrupted() {
                return Err(Error::Interrupted).with_report(&results);
            }
            log::trace!(target: "ratchet", "running segment {segment}");
            let started_at = Utc::now();
            let outcome = processor
                .run_segment(file, segment)
                .await
                .with_report(&results)?;
            results.push(SegmentResult::from_outcome(segment, &outcome, started_at));
        }

        let report = Report::new(results);
        progress.upgrade_complete(report.version());
        Ok(report)
    }

    /// The rows of the log table and the current version.
    pub async fn history(&mut self) -> RatchetResult<HistoryReport> {
        let state = self.current_state().await?;
        let records = self
            .control
            .history(self.databases.default_executor())
            .await?;

        Ok(HistoryReport::new(state.version, records))
    }
}

/// The segments to run from `state` to `target`. A segment left in flight is
/// always finished first, and the rest of the path starts at its target.
fn resolve_path<'f>(
    file: &'f UpgradeFile,
    state: &ControlState,
    target: &Target,
    options: &UpgradeOptions,
) -> RatchetResult<Vec<&'f PatchSegment>> {
    let resolver = Resolver::new(file);
    let Some(in_flight) = state.in_flight() else {
        return resolver.resolve(state.version(), target, options.downgrade_allowed);
    };

    let Some(segment) = file.segment(state.version(), in_flight) else {
        return Err(Error::ControlState(format!(
            "a segment from {} to {in_flight} is in flight but not in {}",
            display_version(state.version()),
            file.name().unwrap_or("the upgrade file")
        )));
    };
    if matches!(target, Target::Exact(v) if Some(v.as_str()) == state.version()) {
        return Err(Error::ControlState(format!(
            "cannot stay at {} while the segment to {in_flight} is in flight",
            display_version(state.version())
        )));
    }

    let mut path = vec![segment];
    path.extend(resolver.resolve(Some(in_flight), target, options.downgrade_allowed)?);
    Ok(path)
}

fn resume_position(state: &ControlState, segment: &PatchSegment) -> i64 {
    if state.in_flight() == Some(segment.target()) && state.version() == segment.source() {
        state.statements
    } else {
        0
    }
}
