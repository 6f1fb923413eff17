//! Process-wide compiler configuration.
//!
//! Configuration happens in two phases:
//!
//! 1. **Setup** - a single owner holds a [`CompilerSetup`] and mutates it:
//!    plugins are loaded, the default pipeline is edited and filtered, hooks
//!    and driver options are installed.
//! 2. **Frozen** - [`CompilerSetup::freeze`] turns it into a [`SharedSetup`],
//!    a cheap-to-clone read-only handle given to every worker. No API mutates
//!    a frozen setup.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::pass::{CompilationUnit, PassHandle};
use crate::pass_driver::{PassDriverOptions, PassEdit, Pipeline};
use crate::selectivity::SelectivityHooks;

/// Chooses the starting pipeline of a new run instance.
///
/// Arguments are the (empty) run pipeline to fill, the default pipeline and
/// the unit about to be compiled.
pub type DriverSelectionFn =
    dyn Fn(&mut Pipeline, &Pipeline, &dyn CompilationUnit) + Send + Sync;

/// Mutable configuration, owned by whoever starts the compiler.
pub struct CompilerSetup {
    pipeline: Pipeline,
    hooks: SelectivityHooks,
    options: PassDriverOptions,
    driver_selection: Option<Arc<DriverSelectionFn>>,
}

impl CompilerSetup {
    /// Start from `pipeline` as the default pipeline.
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            hooks: SelectivityHooks::new(),
            options: PassDriverOptions::default(),
            driver_selection: None,
        }
    }

    /// Start from the built-in pass list.
    pub fn with_standard_passes() -> Self {
        Self::new(Pipeline::from_passes(crate::builtin_passes::standard_passes()))
    }

    pub fn default_pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Append `pass` to the default pipeline.
    ///
    /// # Panics
    ///
    /// On an unnamed pass or a repeated name.
    pub fn register_default_pass(&mut self, pass: PassHandle) {
        self.pipeline.register(pass);
    }

    /// Edit the default pipeline relative to the pass called `target`.
    ///
    /// Returns `false`, leaving the pipeline untouched, when `target` is not
    /// scheduled. Every run instance created afterwards sees the edit.
    pub fn edit_pass_by_name(&mut self, target: &str, edit: PassEdit, reverse_scan: bool) -> bool {
        self.pipeline.edit_by_name(target, edit, reverse_scan)
    }

    /// Remove the passes selected by `disabled` from the default pipeline.
    pub fn build_default_list(&mut self, disabled: &str) {
        self.pipeline.retain_enabled(disabled);
    }

    pub fn print_pass_names(&self) {
        log::info!("Passes are:");
        self.pipeline.print_names();
    }

    pub fn hooks(&self) -> &SelectivityHooks {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut SelectivityHooks {
        &mut self.hooks
    }

    pub fn options(&self) -> &PassDriverOptions {
        &self.options
    }

    pub fn set_print_all_passes(&mut self) {
        self.options.print_all_passes = true;
    }

    pub fn set_print_pass_list(&mut self, list: impl Into<String>) {
        self.options.print_pass_list = list.into();
    }

    pub fn set_dump_pass_list(&mut self, list: impl Into<String>) {
        self.options.dump_pass_list = list.into();
    }

    pub fn set_dump_cfg_folder(&mut self, folder: impl Into<PathBuf>) {
        self.options.dump_cfg_folder = Some(folder.into());
    }

    /// Install a selection hook. `None` keeps the current one.
    pub fn set_driver_selection<F>(&mut self, select: Option<F>)
    where
        F: Fn(&mut Pipeline, &Pipeline, &dyn CompilationUnit) + Send + Sync + 'static,
    {
        if let Some(select) = select {
            self.driver_selection = Some(Arc::new(select));
        }
    }

    /// End the setup phase.
    pub fn freeze(self) -> SharedSetup {
        SharedSetup(Arc::new(self))
    }
}

impl Default for CompilerSetup {
    fn default() -> Self {
        Self::with_standard_passes()
    }
}

impl fmt::Debug for CompilerSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerSetup")
            .field("pipeline", &self.pipeline)
            .field("hooks", &self.hooks)
            .field("options", &self.options)
            .field("driver_selection", &self.driver_selection.is_some())
            .finish()
    }
}

/// Read-only configuration shared by all compilation workers.
#[derive(Clone, Debug)]
pub struct SharedSetup(Arc<CompilerSetup>);

impl SharedSetup {
    pub fn default_pipeline(&self) -> &Pipeline {
        &self.0.pipeline
    }

    pub fn hooks(&self) -> &SelectivityHooks {
        &self.0.hooks
    }

    pub fn options(&self) -> &PassDriverOptions {
        &self.0.options
    }

    pub fn driver_selection(&self) -> Option<&DriverSelectionFn> {
        self.0.driver_selection.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{FnPass, PassContext};
    use crate::pass_driver::PassDriver;
    use std::any::Any;

    struct Method {
        hot: bool,
    }

    impl CompilationUnit for Method {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn named(name: &str) -> PassHandle {
        FnPass::handle(name, |_: &mut PassContext<'_>| {})
    }

    #[test]
    fn test_selection_hook_chooses_pipeline_per_unit() {
        let mut setup = CompilerSetup::new(Pipeline::from_passes([named("A"), named("B")]));
        setup.set_driver_selection(Some(
            |run: &mut Pipeline, default: &Pipeline, unit: &dyn CompilationUnit| {
                let hot = unit
                    .as_any()
                    .downcast_ref::<Method>()
                    .map(|m| m.hot)
                    .unwrap_or(false);
                if hot {
                    *run = default.clone();
                } else if let Some(first) = default.iter().next() {
                    run.register(first.clone());
                }
            },
        ));
        let shared = setup.freeze();

        let mut hot = Method { hot: true };
        let mut cold = Method { hot: false };
        assert_eq!(
            PassDriver::new(&shared, &mut hot).passes().names(),
            ["A", "B"]
        );
        assert_eq!(PassDriver::new(&shared, &mut cold).passes().names(), ["A"]);
    }

    #[test]
    fn test_none_selection_keeps_previous() {
        type Select = fn(&mut Pipeline, &Pipeline, &dyn CompilationUnit);
        let mut setup = CompilerSetup::new(Pipeline::from_passes([named("A")]));
        setup.set_driver_selection(Some(
            |_: &mut Pipeline, _: &Pipeline, _: &dyn CompilationUnit| {},
        ));
        setup.set_driver_selection(None::<Select>);
        let shared = setup.freeze();

        let mut unit = Method { hot: false };
        assert!(PassDriver::new(&shared, &mut unit).passes().is_empty());
    }

    #[test]
    fn test_edits_visible_after_freeze() {
        let mut setup = CompilerSetup::new(Pipeline::from_passes([named("A"), named("B")]));
        assert!(setup.edit_pass_by_name("A", PassEdit::InsertAfter(named("Plugin")), false));
        assert!(!setup.edit_pass_by_name("Missing", PassEdit::Remove, false));
        setup.build_default_list("B");
        setup.set_print_pass_list("Plugin");
        setup.set_dump_cfg_folder("/tmp/cfg");

        let shared = setup.freeze();
        assert_eq!(shared.default_pipeline().names(), ["A", "Plugin"]);
        assert!(shared.options().should_print("Plugin"));
        assert_eq!(
            shared.options().dump_cfg_folder.as_deref(),
            Some(std::path::Path::new("/tmp/cfg"))
        );
    }

    #[test]
    fn test_register_default_pass_appends() {
        let mut setup = CompilerSetup::new(Pipeline::from_passes([named("A")]));
        let pass = named("Plugin");
        setup.register_default_pass(pass.clone());

        assert_eq!(setup.default_pipeline().names(), ["A", "Plugin"]);
        let shared = setup.freeze();
        let found = shared.default_pipeline().find("Plugin").unwrap();
        assert!(Arc::ptr_eq(found, &pass));
    }

    #[test]
    #[should_panic(expected = "pass name CodeLayout already used")]
    fn test_register_default_pass_rejects_duplicate() {
        let mut setup = CompilerSetup::with_standard_passes();
        setup.register_default_pass(named("CodeLayout"));
    }

    #[test]
    fn test_shared_setup_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedSetup>();
    }
}
