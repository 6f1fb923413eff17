//! Pass abstraction
//!
//! A pass is a named, shared unit of compiler work. Pass objects are created
//! once and handed around as [`PassHandle`]s; every pipeline that contains a
//! pass points at the same instance, possibly from several worker threads at
//! once. Anything a pass needs to remember during a run belongs to the
//! [`CompilationUnit`] reached through the [`PassContext`].

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Shared handle to a pass instance.
pub type PassHandle = Arc<dyn Pass>;

/// The unit a pipeline is run over (a method, a class, a whole dex file...).
///
/// The pipeline never looks inside a unit. Passes downcast it through
/// [`PassContext::unit_mut`].
pub trait CompilationUnit: Send {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Write the unit's control-flow graph after `pass_name` ran.
    ///
    /// Called only for passes selected for CFG dumping.
    fn dump_cfg(&self, _folder: &Path, _pass_name: &str) -> std::io::Result<()> {
        Ok(())
    }
}

/// Per-invocation data handed to a pass.
pub struct PassContext<'a> {
    unit: &'a mut dyn CompilationUnit,
    print_pass: bool,
    dump_cfg_folder: Option<&'a Path>,
}

impl<'a> PassContext<'a> {
    pub fn new(
        unit: &'a mut dyn CompilationUnit,
        print_pass: bool,
        dump_cfg_folder: Option<&'a Path>,
    ) -> Self {
        Self {
            unit,
            print_pass,
            dump_cfg_folder,
        }
    }

    pub fn unit(&self) -> &dyn CompilationUnit {
        &*self.unit
    }

    /// Downcast the unit to its concrete type.
    pub fn unit_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.unit.as_any_mut().downcast_mut::<T>()
    }

    /// Whether this pass was selected for printing.
    pub fn print_pass(&self) -> bool {
        self.print_pass
    }

    /// Folder to dump the CFG into, if this pass was selected for dumping.
    pub fn dump_cfg_folder(&self) -> Option<&Path> {
        self.dump_cfg_folder
    }
}

/// A compilation stage.
///
/// Within a pipeline the three steps always run as `start`, dispatch (which
/// ends in [`Pass::run`]), `end`.
pub trait Pass: Send + Sync {
    /// Unique, non-empty name.
    fn name(&self) -> &str;

    fn start(&self, _ctx: &mut PassContext<'_>) {}

    fn run(&self, ctx: &mut PassContext<'_>);

    fn end(&self, _ctx: &mut PassContext<'_>) {}
}

impl fmt::Debug for dyn Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pass({})", self.name())
    }
}

/// A pass built from a closure, for plugins and hosts that do not need a
/// dedicated type.
pub struct FnPass<F> {
    name: String,
    work: F,
}

impl<F> FnPass<F>
where
    F: Fn(&mut PassContext<'_>) + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, work: F) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }

    pub fn handle(name: impl Into<String>, work: F) -> PassHandle {
        Arc::new(Self::new(name, work))
    }
}

impl<F> Pass for FnPass<F>
where
    F: Fn(&mut PassContext<'_>) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &mut PassContext<'_>) {
        (self.work)(ctx)
    }
}
