//! Ahead-of-time compiler pass pipeline with native plugin support.
//!
//! Start from a [`CompilerSetup`], let plugins and configuration edit it,
//! then [`freeze`](CompilerSetup::freeze) it and run a [`PassDriver`] per
//! compilation unit.

pub mod builtin_passes;
pub mod config;
pub mod logging;
pub mod pass;
pub mod pass_driver;
pub mod plugin_handler;
pub mod selectivity;
pub mod setup;

pub use pass::{CompilationUnit, FnPass, Pass, PassContext, PassHandle};
pub use pass_driver::{PassDriver, PassEdit, Pipeline};
pub use setup::{CompilerSetup, SharedSetup};
