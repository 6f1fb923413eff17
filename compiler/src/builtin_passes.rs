//! Built-in pass list
//!
//! The stages the default pipeline starts with, in execution order. The
//! optimizations themselves live in the backend; here each stage is a marker
//! that reports when it runs, so plugins have stable names to anchor edits on.

use std::sync::{Arc, OnceLock};

use crate::pass::{Pass, PassContext, PassHandle};

/// Names of the built-in stages in default order.
pub const STANDARD_PASS_NAMES: &[&str] = &[
    "CacheFieldLoweringInfo",
    "CacheMethodLoweringInfo",
    "SpecialMethodInliner",
    "CodeLayout",
    "NullCheckEliminationAndTypeInference",
    "ClassInitCheckElimination",
    "BBCombine",
    "BBOptimizations",
];

/// A backend stage known only by name.
#[derive(Debug)]
pub struct StagePass {
    name: &'static str,
}

impl Pass for StagePass {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, _ctx: &mut PassContext<'_>) {
        log::trace!("stage {}", self.name);
    }
}

/// The built-in stages. Every call returns the same instances.
pub fn standard_passes() -> Vec<PassHandle> {
    static PASSES: OnceLock<Vec<PassHandle>> = OnceLock::new();
    PASSES
        .get_or_init(|| {
            STANDARD_PASS_NAMES
                .iter()
                .map(|&name| Arc::new(StagePass { name }) as PassHandle)
                .collect()
        })
        .clone()
}
