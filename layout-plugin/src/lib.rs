//! Sample aotpipe plugin
//!
//! Ships as a cdylib. Copy it into the plugin directory under a name carrying
//! the host's flavor marker (`libaotpiped-layout.so` next to a debug host,
//! `libaotpipe-layout.so` next to a release one).
//!
//! On load it schedules [`LayoutHint`] right after `CodeLayout` and makes the
//! host skip class definition 0, which the sample treats as cold.

use std::any::Any;
use std::sync::Arc;

use aotpipe_plugin::declare_plugin_init;
use compiler::selectivity::SkipClassHook;
use compiler::{CompilerSetup, Pass, PassContext, PassEdit};

/// Name of the pass this plugin adds.
pub const LAYOUT_HINT: &str = "LayoutHint";

/// Anchor the plugin's pass is inserted after.
pub const ANCHOR: &str = "CodeLayout";

/// Class definition index treated as cold.
pub const COLD_CLASS_DEF: u16 = 0;

#[derive(Debug)]
pub struct LayoutHint;

impl Pass for LayoutHint {
    fn name(&self) -> &str {
        LAYOUT_HINT
    }

    fn run(&self, ctx: &mut PassContext<'_>) {
        if ctx.print_pass() {
            log::info!("layout hints applied");
        }
    }
}

/// Entry routine body; see [`declare_plugin_init!`].
pub fn init(setup: &mut CompilerSetup) -> bool {
    setup
        .hooks_mut()
        .set_skip_class_compile(Some(SkipClassHook::new(
            |_dex_file: &dyn Any, class_def: &dyn Any| {
                class_def.downcast_ref::<u16>() == Some(&COLD_CLASS_DEF)
            },
        )));

    setup.edit_pass_by_name(ANCHOR, PassEdit::InsertAfter(Arc::new(LayoutHint)), false)
}

declare_plugin_init!(compiler::CompilerSetup, init);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_inserts_after_anchor() {
        let mut setup = CompilerSetup::with_standard_passes();
        assert!(init(&mut setup));

        let names = setup.default_pipeline().names();
        let anchor = names.iter().position(|n| *n == ANCHOR).unwrap();
        assert_eq!(names[anchor + 1], LAYOUT_HINT);
        assert!(setup.hooks().skip_class_compile(&"classes.dex", &COLD_CLASS_DEF));
        assert!(!setup.hooks().skip_class_compile(&"classes.dex", &1u16));
    }

    #[test]
    fn test_init_fails_without_anchor() {
        let mut setup = CompilerSetup::new(compiler::Pipeline::new());
        assert!(!init(&mut setup));
        assert!(setup.default_pipeline().is_empty());
    }
}
