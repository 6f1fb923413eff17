//! Selectivity hooks
//!
//! Extension points that let an embedder or plugin override compiler policy:
//! whether a class or method is compiled at all, and what extra analysis runs
//! around resolution and verification. Every point is a single optional slot.
//! An empty slot falls back to the built-in behavior (never skip, do nothing).
//!
//! The dex model (dex files, class definitions, code items, resolved methods,
//! verifiers) is not owned by this crate; those values are passed through as
//! `&dyn Any` and hooks downcast them to the embedder's types.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Compiler aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// No optimization
    O0,
    /// Baseline
    #[default]
    O1,
    O2,
    /// Aggressive
    O3,
}

/// How much bytecode-to-bytecode rewriting a method receives when it is not
/// compiled natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DexToDexLevel {
    DontCompile,
    /// Only the rewrites needed for correctness.
    #[default]
    Required,
    Optimize,
}

/// Inputs and annotatable outputs of the skip-method decision.
///
/// A hook may rewrite `access_flags`, `class_def_idx` and `dex_to_dex_level`
/// whatever it decides; callers treat the rewritten values as best-effort.
pub struct MethodCompileRequest<'a> {
    pub code_item: Option<&'a dyn Any>,
    pub method_idx: u32,
    pub dex_file: &'a dyn Any,
    pub access_flags: u32,
    pub class_def_idx: u16,
    pub dex_to_dex_level: DexToDexLevel,
}

impl fmt::Debug for MethodCompileRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCompileRequest")
            .field("method_idx", &self.method_idx)
            .field("has_code_item", &self.code_item.is_some())
            .field("access_flags", &format_args!("{:#x}", self.access_flags))
            .field("class_def_idx", &self.class_def_idx)
            .field("dex_to_dex_level", &self.dex_to_dex_level)
            .finish()
    }
}

macro_rules! hook {
    ($(#[$doc:meta])* $name:ident: Fn($($arg:ident: $ty:ty),*) $(-> $ret:ty)?) => {
        $(#[$doc])*
        pub struct $name(Box<dyn Fn($($ty),*) $(-> $ret)? + Send + Sync>);

        impl $name {
            pub fn new<F>(hook: F) -> Self
            where
                F: Fn($($ty),*) $(-> $ret)? + Send + Sync + 'static,
            {
                Self(Box::new(hook))
            }

            fn call(&self, $($arg: $ty),*) $(-> $ret)? {
                (self.0)($($arg),*)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(stringify!($name))
            }
        }
    };
}

hook! {
    /// Whole-corpus decision taken once before per-class work starts.
    PreCompileSummaryHook: Fn(driver: &dyn Any, verification_results: &dyn Any) -> bool
}

hook! {
    /// Returns `true` to skip compiling a class.
    SkipClassHook: Fn(dex_file: &dyn Any, class_def: &dyn Any) -> bool
}

hook! {
    /// Returns `true` to skip compiling a method.
    SkipMethodHook: Fn(request: &mut MethodCompileRequest<'_>) -> bool
}

hook! {
    AnalyzeResolvedMethodHook: Fn(method: &dyn Any, dex_file: &dyn Any)
}

hook! {
    AnalyzeVerifiedMethodHook: Fn(verifier: &dyn Any)
}

hook! {
    DumpStatsHook: Fn()
}

hook! {
    /// Turns analysis on or off; `disable_passes` is the pass list the
    /// embedder wants removed while analysis runs.
    ToggleAnalysisHook: Fn(setting: bool, disable_passes: &str)
}

/// All extension points plus the recorded optimization levels.
#[derive(Debug, Default)]
pub struct SelectivityHooks {
    pre_compile_summary: Option<PreCompileSummaryHook>,
    skip_class: Option<SkipClassHook>,
    skip_method: Option<SkipMethodHook>,
    analyze_resolved_method: Option<AnalyzeResolvedMethodHook>,
    analyze_verified_method: Option<AnalyzeVerifiedMethodHook>,
    dump_stats: Option<DumpStatsHook>,
    toggle_analysis: Option<ToggleAnalysisHook>,
    original_level: OptimizationLevel,
    used_level: OptimizationLevel,
}

// `None` never clears an installed hook.
fn install<T>(slot: &mut Option<T>, hook: Option<T>) {
    if hook.is_some() {
        *slot = hook;
    }
}

impl SelectivityHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pre_compile_summary(&mut self, hook: Option<PreCompileSummaryHook>) {
        install(&mut self.pre_compile_summary, hook);
    }

    pub fn pre_compile_summary(&self, driver: &dyn Any, verification_results: &dyn Any) -> bool {
        match &self.pre_compile_summary {
            Some(hook) => hook.call(driver, verification_results),
            None => false,
        }
    }

    pub fn set_skip_class_compile(&mut self, hook: Option<SkipClassHook>) {
        install(&mut self.skip_class, hook);
    }

    pub fn skip_class_compile(&self, dex_file: &dyn Any, class_def: &dyn Any) -> bool {
        match &self.skip_class {
            Some(hook) => hook.call(dex_file, class_def),
            None => false,
        }
    }

    pub fn set_skip_method_compile(&mut self, hook: Option<SkipMethodHook>) {
        install(&mut self.skip_method, hook);
    }

    /// Ask whether to skip a method. Without a hook the request is untouched.
    pub fn skip_method_compile(&self, request: &mut MethodCompileRequest<'_>) -> bool {
        match &self.skip_method {
            Some(hook) => hook.call(request),
            None => false,
        }
    }

    pub fn set_analyze_resolved_method(&mut self, hook: Option<AnalyzeResolvedMethodHook>) {
        install(&mut self.analyze_resolved_method, hook);
    }

    pub fn analyze_resolved_method(&self, method: &dyn Any, dex_file: &dyn Any) {
        if let Some(hook) = &self.analyze_resolved_method {
            hook.call(method, dex_file);
        }
    }

    pub fn set_analyze_verified_method(&mut self, hook: Option<AnalyzeVerifiedMethodHook>) {
        install(&mut self.analyze_verified_method, hook);
    }

    pub fn analyze_verified_method(&self, verifier: &dyn Any) {
        if let Some(hook) = &self.analyze_verified_method {
            hook.call(verifier);
        }
    }

    pub fn set_dump_selectivity_stats(&mut self, hook: Option<DumpStatsHook>) {
        install(&mut self.dump_stats, hook);
    }

    pub fn dump_selectivity_stats(&self) {
        if let Some(hook) = &self.dump_stats {
            hook.call();
        }
    }

    pub fn set_toggle_analysis(&mut self, hook: Option<ToggleAnalysisHook>) {
        install(&mut self.toggle_analysis, hook);
    }

    pub fn toggle_analysis(&self, setting: bool, disable_passes: &str) {
        if let Some(hook) = &self.toggle_analysis {
            hook.call(setting, disable_passes);
        }
    }

    /// Level requested before selectivity adjusted it.
    pub fn original_optimization_level(&self) -> OptimizationLevel {
        self.original_level
    }

    pub fn set_original_optimization_level(&mut self, level: OptimizationLevel) {
        self.original_level = level;
    }

    /// Level selectivity settled on.
    pub fn used_optimization_level(&self) -> OptimizationLevel {
        self.used_level
    }

    pub fn set_used_optimization_level(&mut self, level: OptimizationLevel) {
        self.used_level = level;
    }
}
