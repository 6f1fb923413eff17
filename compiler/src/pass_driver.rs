//! Pass pipelines and the driver that executes them.
//!
//! Two kinds of pipeline exist at runtime:
//!
//! - the **default pipeline**, owned by [`CompilerSetup`](crate::setup::CompilerSetup)
//!   and edited during start-up by plugins and the disable list;
//! - the **run pipeline** of a [`PassDriver`], copied from the default
//!   pipeline (or chosen by a selection hook) for one compilation unit and
//!   then only read.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::pass::{CompilationUnit, Pass, PassContext, PassHandle};
use crate::setup::SharedSetup;

/// Position-based edit applied to the default pipeline.
///
/// The payload of the insert and replace variants is the pass being
/// installed; removal takes none.
#[derive(Clone)]
pub enum PassEdit {
    InsertBefore(PassHandle),
    InsertAfter(PassHandle),
    Replace(PassHandle),
    Remove,
}

impl PassEdit {
    fn label(&self) -> &'static str {
        match self {
            PassEdit::InsertBefore(_) => "insert-before",
            PassEdit::InsertAfter(_) => "insert-after",
            PassEdit::Replace(_) => "replace",
            PassEdit::Remove => "remove",
        }
    }
}

impl fmt::Debug for PassEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassEdit::InsertBefore(p) | PassEdit::InsertAfter(p) | PassEdit::Replace(p) => {
                write!(f, "{}({})", self.label(), p.name())
            }
            PassEdit::Remove => f.write_str(self.label()),
        }
    }
}

/// Rejected registration. Both cases are integration bugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassRegistrationError {
    EmptyName,
    DuplicateName(String),
}

impl fmt::Display for PassRegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassRegistrationError::EmptyName => write!(f, "pass registered without a name"),
            PassRegistrationError::DuplicateName(name) => {
                write!(f, "pass name {} already used", name)
            }
        }
    }
}

impl std::error::Error for PassRegistrationError {}

/// Ordered list of passes with unique names.
#[derive(Clone, Default)]
pub struct Pipeline {
    passes: Vec<PassHandle>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Build a pipeline from `passes`, registering each in order.
    ///
    /// # Panics
    ///
    /// On an unnamed pass or a repeated name.
    pub fn from_passes(passes: impl IntoIterator<Item = PassHandle>) -> Self {
        let mut pipeline = Self::new();
        for pass in passes {
            pipeline.register(pass);
        }
        pipeline
    }

    /// Append `pass`, rejecting empty and already used names.
    pub fn try_register(&mut self, pass: PassHandle) -> Result<(), PassRegistrationError> {
        let name = pass.name();
        if name.is_empty() {
            return Err(PassRegistrationError::EmptyName);
        }
        if self.find(name).is_some() {
            return Err(PassRegistrationError::DuplicateName(name.to_string()));
        }
        log::trace!("registering pass {}", name);
        self.passes.push(pass);
        Ok(())
    }

    /// Append `pass`.
    ///
    /// # Panics
    ///
    /// On an unnamed pass or a repeated name.
    pub fn register(&mut self, pass: PassHandle) {
        if let Err(e) = self.try_register(pass) {
            panic!("{}", e);
        }
    }

    /// First pass called `name`.
    pub fn find(&self, name: &str) -> Option<&PassHandle> {
        self.passes.iter().find(|p| p.name() == name)
    }

    fn position(&self, name: &str, reverse_scan: bool) -> Option<usize> {
        if reverse_scan {
            self.passes.iter().rposition(|p| p.name() == name)
        } else {
            self.passes.iter().position(|p| p.name() == name)
        }
    }

    /// Apply `edit` relative to the pass called `target`.
    ///
    /// `reverse_scan` picks the last match instead of the first. When
    /// `target` is missing nothing changes, the current names are logged and
    /// `false` is returned.
    pub fn edit_by_name(&mut self, target: &str, edit: PassEdit, reverse_scan: bool) -> bool {
        let Some(idx) = self.position(target, reverse_scan) else {
            log::info!(
                "Pass modification could not find the reference pass name, here is what you provided: {}",
                target
            );
            log::info!("\t- Here are the passes for reference:");
            self.print_names();
            return false;
        };

        log::debug!("pipeline edit {:?} at {} ({})", edit, target, idx);
        match edit {
            PassEdit::InsertBefore(pass) => self.passes.insert(idx, pass),
            PassEdit::InsertAfter(pass) => self.passes.insert(idx + 1, pass),
            PassEdit::Replace(pass) => self.passes[idx] = pass,
            PassEdit::Remove => {
                self.passes.remove(idx);
            }
        }
        true
    }

    /// Drop every pass selected by the `disabled` list, keeping order.
    ///
    /// See [`pass_list_selects`] for the matching rule.
    pub fn retain_enabled(&mut self, disabled: &str) {
        self.passes.retain(|pass| {
            let skip = pass_list_selects(disabled, pass.name());
            if skip {
                log::info!("Skipping {}", pass.name());
            }
            !skip
        });
    }

    pub fn print_names(&self) {
        for pass in &self.passes {
            log::info!("\t-{}", pass.name());
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PassHandle> {
        self.passes.iter()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<'a> IntoIterator for &'a Pipeline {
    type Item = &'a PassHandle;
    type IntoIter = std::slice::Iter<'a, PassHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.passes.iter()
    }
}

/// Whether the free-text pass `list` selects `pass_name`.
///
/// A pass is selected when its name occurs anywhere in the list, or when one
/// of the comma-separated entries of the list occurs in its name. Empty
/// entries select nothing.
pub fn pass_list_selects(list: &str, pass_name: &str) -> bool {
    if pass_name.is_empty() {
        return false;
    }
    list.contains(pass_name)
        || list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .any(|entry| pass_name.contains(entry))
}

/// Printing and CFG-dump selection, shared by every run instance.
///
/// The lists use the [`pass_list_selects`] matching rule.
#[derive(Debug, Clone, Default)]
pub struct PassDriverOptions {
    pub print_all_passes: bool,
    pub print_pass_list: String,
    pub dump_pass_list: String,
    pub dump_cfg_folder: Option<PathBuf>,
}

impl PassDriverOptions {
    pub fn should_print(&self, pass_name: &str) -> bool {
        self.print_all_passes || pass_list_selects(&self.print_pass_list, pass_name)
    }

    pub fn should_dump_cfg(&self, pass_name: &str) -> bool {
        pass_list_selects(&self.dump_pass_list, pass_name)
    }
}

/// The dispatch step between a pass's `start` and `end`.
///
/// Wrap the default behavior to add cross-cutting work around every pass.
pub trait PassDispatcher {
    fn dispatch(&mut self, pass: &dyn Pass, ctx: &mut PassContext<'_>);
}

/// Runs the pass, then prints it and dumps the CFG when selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDispatcher;

impl PassDispatcher for DefaultDispatcher {
    fn dispatch(&mut self, pass: &dyn Pass, ctx: &mut PassContext<'_>) {
        pass.run(ctx);

        if ctx.print_pass() {
            log::info!("Pass {} applied", pass.name());
        }

        if let Some(folder) = ctx.dump_cfg_folder() {
            if let Err(e) = ctx.unit().dump_cfg(folder, pass.name()) {
                log::warn!(
                    "CFG dump after {} into {} failed: {}",
                    pass.name(),
                    folder.display(),
                    e
                );
            }
        }
    }
}

/// Elapsed time of one dispatched pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTiming {
    pub pass: String,
    pub elapsed: Duration,
}

/// Times each dispatch and opens a `tracing` span around it.
#[derive(Debug, Default)]
pub struct TimingDispatcher<D = DefaultDispatcher> {
    inner: D,
    timings: Vec<PassTiming>,
}

impl TimingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: PassDispatcher> TimingDispatcher<D> {
    pub fn wrap(inner: D) -> Self {
        Self {
            inner,
            timings: Vec::new(),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn timings(&self) -> &[PassTiming] {
        &self.timings
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|t| t.elapsed).sum()
    }
}

impl<D: PassDispatcher> PassDispatcher for TimingDispatcher<D> {
    fn dispatch(&mut self, pass: &dyn Pass, ctx: &mut PassContext<'_>) {
        let _span = tracing::debug_span!("pass", name = pass.name()).entered();
        let started = Instant::now();
        self.inner.dispatch(pass, ctx);
        let elapsed = started.elapsed();
        log::debug!("{} took {:?}", pass.name(), elapsed);
        self.timings.push(PassTiming {
            pass: pass.name().to_string(),
            elapsed,
        });
    }
}

/// Runs one pipeline over one compilation unit.
///
/// Constructing a driver picks its starting pipeline: the setup's selection
/// hook when installed, otherwise a copy of the default pipeline.
pub struct PassDriver<'u, D = DefaultDispatcher> {
    setup: SharedSetup,
    unit: &'u mut dyn CompilationUnit,
    passes: Pipeline,
    dispatcher: D,
}

impl<'u> PassDriver<'u> {
    pub fn new(setup: &SharedSetup, unit: &'u mut dyn CompilationUnit) -> Self {
        Self::with_dispatcher(setup, unit, DefaultDispatcher)
    }
}

impl<'u, D: PassDispatcher> PassDriver<'u, D> {
    pub fn with_dispatcher(
        setup: &SharedSetup,
        unit: &'u mut dyn CompilationUnit,
        dispatcher: D,
    ) -> Self {
        let passes = match setup.driver_selection() {
            Some(select) => {
                let mut passes = Pipeline::new();
                select(&mut passes, setup.default_pipeline(), &*unit);
                passes
            }
            None => setup.default_pipeline().clone(),
        };

        Self {
            setup: setup.clone(),
            unit,
            passes,
            dispatcher,
        }
    }

    /// Append a pass to this run only.
    ///
    /// # Panics
    ///
    /// On an unnamed pass or a repeated name.
    pub fn register(&mut self, pass: PassHandle) {
        self.passes.register(pass);
    }

    pub fn find(&self, name: &str) -> Option<&PassHandle> {
        self.passes.find(name)
    }

    /// Run the pass called `name`. Returns `false` when it is not scheduled.
    pub fn run_by_name(&mut self, name: &str) -> bool {
        match self.passes.find(name).cloned() {
            Some(pass) => {
                self.run(pass.as_ref());
                true
            }
            None => false,
        }
    }

    /// Run `pass`: start, dispatch, end.
    pub fn run(&mut self, pass: &dyn Pass) {
        apply_pass(&self.setup, &mut *self.unit, &mut self.dispatcher, pass);
    }

    /// Run every scheduled pass front to back.
    pub fn run_all(&mut self) {
        for pass in self.passes.iter() {
            apply_pass(
                &self.setup,
                &mut *self.unit,
                &mut self.dispatcher,
                pass.as_ref(),
            );
        }
    }

    pub fn passes(&self) -> &Pipeline {
        &self.passes
    }

    /// Replace the scheduled passes with a caller-chosen list.
    pub fn copy_passes(&mut self, passes: Pipeline) {
        self.passes = passes;
    }

    /// Reset the scheduled passes to the default pipeline.
    pub fn set_default_passes(&mut self) {
        self.passes = self.setup.default_pipeline().clone();
    }

    pub fn unit(&self) -> &dyn CompilationUnit {
        &*self.unit
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn into_dispatcher(self) -> D {
        self.dispatcher
    }
}

fn apply_pass<D: PassDispatcher>(
    setup: &SharedSetup,
    unit: &mut dyn CompilationUnit,
    dispatcher: &mut D,
    pass: &dyn Pass,
) {
    let options = setup.options();
    let folder = options
        .should_dump_cfg(pass.name())
        .then(|| dump_folder(options));
    let mut ctx = PassContext::new(unit, options.should_print(pass.name()), folder);

    pass.start(&mut ctx);
    dispatcher.dispatch(pass, &mut ctx);
    pass.end(&mut ctx);
}

fn dump_folder(options: &PassDriverOptions) -> &Path {
    options
        .dump_cfg_folder
        .as_deref()
        .unwrap_or_else(|| Path::new("."))
}
