//! Plugin ABI shared by the aotpipe compiler and the native modules it loads.
//!
//! A plugin is a `cdylib` whose file name carries the build-flavor marker
//! (`libaotpiped-` for checked builds, `libaotpipe-` for release builds) and
//! which exports the [`PLUGIN_INIT_SYMBOL`] entry routine. The entry routine
//! receives the host's setup object and edits the default pass pipeline or
//! installs selectivity hooks before returning a success flag.
//!
//! # Declaring a plugin
//!
//! ```rust,ignore
//! use aotpipe_plugin::declare_plugin_init;
//! use compiler::{CompilerSetup, PassEdit};
//!
//! fn init(setup: &mut CompilerSetup) -> bool {
//!     setup.edit_pass_by_name("CodeLayout", PassEdit::InsertAfter(my_pass()), false)
//! }
//!
//! declare_plugin_init!(compiler::CompilerSetup, init);
//! ```
//!
//! The host and the plugin must be built by the same toolchain against the
//! same `compiler` revision; [`PLUGIN_LOADER_VERSION`] is exported next to the
//! entry routine so the loader can refuse modules built for another revision.

use std::ffi::c_void;

/// Loader/plugin compatibility revision.
///
/// Bumping this value makes every previously built plugin incompatible.
pub const PLUGIN_LOADER_VERSION: u32 = 1;

/// Required entry routine every plugin exports.
pub const PLUGIN_INIT_SYMBOL: &str = "aotpipe_plugin_init";

/// Optional routine reporting the loader revision a plugin was built against.
pub const PLUGIN_VERSION_SYMBOL: &str = "aotpipe_plugin_version";

/// File name marker for plugins built for release hosts.
pub const RELEASE_PLUGIN_MARKER: &str = "libaotpipe-";

/// File name marker for plugins built for checked (debug) hosts.
pub const CHECKED_PLUGIN_MARKER: &str = "libaotpiped-";

/// Signature of [`PLUGIN_INIT_SYMBOL`]. The argument is the host's setup object.
pub type PluginInitFn = unsafe extern "C" fn(host: *mut c_void) -> bool;

/// Signature of [`PLUGIN_VERSION_SYMBOL`].
pub type PluginVersionFn = unsafe extern "C" fn() -> u32;

/// Which host build a plugin targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildFlavor {
    /// Host built with debug assertions.
    Checked,
    /// Optimized host.
    Release,
}

impl BuildFlavor {
    /// Flavor of the running build.
    pub const fn current() -> Self {
        if cfg!(debug_assertions) {
            BuildFlavor::Checked
        } else {
            BuildFlavor::Release
        }
    }

    /// Substring a plugin file name must contain to be loaded by this flavor.
    pub const fn marker(self) -> &'static str {
        match self {
            BuildFlavor::Checked => CHECKED_PLUGIN_MARKER,
            BuildFlavor::Release => RELEASE_PLUGIN_MARKER,
        }
    }
}

/// Naming gate applied before a file is handed to the dynamic loader.
///
/// The two markers are disjoint: `libaotpiped-x.so` never passes the release
/// gate and `libaotpipe-x.so` never passes the checked gate.
pub fn is_plugin_candidate(file_name: &str, flavor: BuildFlavor) -> bool {
    file_name.contains(flavor.marker())
}

/// Whether a plugin reporting `reported` may be initialized by this loader.
pub fn is_compatible_version(reported: u32) -> bool {
    reported == PLUGIN_LOADER_VERSION
}

/// Export the plugin entry points for a Rust plugin crate.
///
/// `$host` is the host setup type the entry routine receives and `$init` a
/// `fn(&mut $host) -> bool`. Both [`PLUGIN_INIT_SYMBOL`] and
/// [`PLUGIN_VERSION_SYMBOL`] are generated.
#[macro_export]
macro_rules! declare_plugin_init {
    ($host:ty, $init:path) => {
        #[no_mangle]
        pub unsafe extern "C" fn aotpipe_plugin_init(host: *mut ::std::ffi::c_void) -> bool {
            if host.is_null() {
                return false;
            }
            // SAFETY: the loader passes a live, exclusively borrowed host object.
            let host: &mut $host = unsafe { &mut *(host as *mut $host) };
            $init(host)
        }

        #[no_mangle]
        pub unsafe extern "C" fn aotpipe_plugin_version() -> u32 {
            $crate::PLUGIN_LOADER_VERSION
        }
    };
}
