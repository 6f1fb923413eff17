//! Native plugin loading
//!
//! Every regular file in the plugin directory whose name carries the
//! build-flavor marker is opened as a shared library, and its
//! `aotpipe_plugin_init` routine is called with the [`CompilerSetup`]. What a
//! plugin does there (edit the default pipeline, install selectivity hooks)
//! is entirely up to the plugin.
//!
//! Loading never fails as a whole. Each module ends up in a [`PluginState`];
//! failures are logged and recorded and the loader moves on to the next file.
//! Nothing is rolled back: edits a module made before its init routine
//! returned `false` stay in place. Modules whose init routine ran are never
//! unloaded, since the pipeline may now hold passes whose code lives in them.

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};

use aotpipe_plugin::{
    is_compatible_version, is_plugin_candidate, BuildFlavor, PluginInitFn, PluginVersionFn,
    PLUGIN_INIT_SYMBOL, PLUGIN_LOADER_VERSION, PLUGIN_VERSION_SYMBOL,
};
use libloading::Library;

use crate::setup::CompilerSetup;

/// Outcome of loading one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    NotFound,
    LoadFailed,
    SymbolMissing,
    Incompatible,
    InitFailed,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    NotFound(PathBuf),
    /// The dynamic loader rejected the file; carries its diagnostic.
    LoadFailed(PathBuf, String),
    SymbolMissing(PathBuf),
    Incompatible { path: PathBuf, found: u32 },
    InitFailed(PathBuf),
}

impl PluginError {
    pub fn state(&self) -> PluginState {
        match self {
            PluginError::NotFound(_) => PluginState::NotFound,
            PluginError::LoadFailed(..) => PluginState::LoadFailed,
            PluginError::SymbolMissing(_) => PluginState::SymbolMissing,
            PluginError::Incompatible { .. } => PluginState::Incompatible,
            PluginError::InitFailed(_) => PluginState::InitFailed,
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::NotFound(path) => write!(f, "plugin {} does not exist", path.display()),
            PluginError::LoadFailed(path, e) => {
                write!(f, "problem opening plugin file {}: {}", path.display(), e)
            }
            PluginError::SymbolMissing(path) => write!(
                f,
                "problem with {}: cannot find {} function",
                path.display(),
                PLUGIN_INIT_SYMBOL
            ),
            PluginError::Incompatible { path, found } => write!(
                f,
                "plugin {} was built for loader version {}, this loader is version {}",
                path.display(),
                found,
                PLUGIN_LOADER_VERSION
            ),
            PluginError::InitFailed(path) => {
                write!(f, "initialization function in {} failed", path.display())
            }
        }
    }
}

impl std::error::Error for PluginError {}

/// What happened to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRecord {
    pub path: PathBuf,
    pub state: PluginState,
    pub error: Option<PluginError>,
}

/// Entry routine resolved from a module.
pub type PluginEntry = Box<dyn FnOnce(&mut CompilerSetup) -> bool>;

/// Backend that turns a file into an initialized module.
pub trait ModuleLoader {
    type Module;

    /// Open `path`. The error is the loader's diagnostic text.
    fn open(&self, path: &Path) -> Result<Self::Module, String>;

    /// Resolve the entry routine, if the module exports one.
    fn entry(&self, module: &Self::Module) -> Option<PluginEntry>;

    /// Loader revision the module reports, if it reports one.
    fn version(&self, module: &Self::Module) -> Option<u32>;

    /// Keep a module whose entry routine ran loaded for the rest of the
    /// process.
    fn keep_resident(&self, module: Self::Module);
}

/// Shared libraries through `libloading`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLoader;

impl ModuleLoader for NativeLoader {
    type Module = Library;

    fn open(&self, path: &Path) -> Result<Library, String> {
        open_library(path).map_err(|e| e.to_string())
    }

    fn entry(&self, library: &Library) -> Option<PluginEntry> {
        // SAFETY: the symbol is declared by `declare_plugin_init!` with this signature.
        let init: PluginInitFn = unsafe {
            let symbol: libloading::Symbol<PluginInitFn> =
                library.get(PLUGIN_INIT_SYMBOL.as_bytes()).ok()?;
            *symbol
        };
        Some(Box::new(move |setup: &mut CompilerSetup| {
            // SAFETY: the library stays loaded until `keep_resident` pins it.
            unsafe { init(setup as *mut CompilerSetup as *mut c_void) }
        }))
    }

    fn version(&self, library: &Library) -> Option<u32> {
        // SAFETY: see `entry`.
        unsafe {
            let symbol: libloading::Symbol<PluginVersionFn> =
                library.get(PLUGIN_VERSION_SYMBOL.as_bytes()).ok()?;
            Some(symbol())
        }
    }

    fn keep_resident(&self, library: Library) {
        std::mem::forget(library);
    }
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    // Resolve every symbol up front so a broken plugin fails here, not mid-compile.
    unsafe { libloading::os::unix::Library::open(Some(path), libc::RTLD_NOW) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}

/// Walks plugin directories and initializes what it finds.
pub struct PluginLoader<L = NativeLoader> {
    loader: L,
    flavor: BuildFlavor,
    records: Vec<PluginRecord>,
}

impl PluginLoader {
    /// Loader for shared libraries built for the running flavor.
    pub fn native() -> Self {
        Self::new(NativeLoader)
    }
}

impl<L: ModuleLoader> PluginLoader<L> {
    pub fn new(loader: L) -> Self {
        Self::with_flavor(loader, BuildFlavor::current())
    }

    pub fn with_flavor(loader: L, flavor: BuildFlavor) -> Self {
        Self {
            loader,
            flavor,
            records: Vec::new(),
        }
    }

    /// Every module attempted so far, in attempt order.
    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == PluginState::Active)
            .count()
    }

    /// Load every candidate module in `directory` (not recursive).
    ///
    /// Entries that cannot be inspected, directories, symbolic links and
    /// files without the flavor marker are skipped silently. Order follows
    /// directory enumeration.
    pub fn load_all(&mut self, setup: &mut CompilerSetup, directory: &Path) {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                log::info!(
                    "Error opening the directory: {}: {}",
                    directory.display(),
                    e
                );
                return;
            }
        };

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();

            let Ok(metadata) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if metadata.is_dir() || metadata.file_type().is_symlink() {
                continue;
            }

            let file_name = entry.file_name();
            if !is_plugin_candidate(&file_name.to_string_lossy(), self.flavor) {
                continue;
            }

            if !self.load_plugin(setup, &path) {
                log::info!("Error loading up {}", path.display());
            }
        }
    }

    /// Load a single module. Returns whether it became active.
    pub fn load_plugin(&mut self, setup: &mut CompilerSetup, path: &Path) -> bool {
        let outcome = if path.exists() {
            self.activate(setup, path)
        } else {
            Err(PluginError::NotFound(path.to_path_buf()))
        };

        let record = match outcome {
            Ok(()) => {
                log::info!("Loaded plugin {}", path.display());
                PluginRecord {
                    path: path.to_path_buf(),
                    state: PluginState::Active,
                    error: None,
                }
            }
            Err(e) => {
                log::info!("PLUGIN: {}", e);
                PluginRecord {
                    path: path.to_path_buf(),
                    state: e.state(),
                    error: Some(e),
                }
            }
        };
        let active = record.state == PluginState::Active;
        self.records.push(record);
        active
    }

    fn activate(&self, setup: &mut CompilerSetup, path: &Path) -> Result<(), PluginError> {
        let module = self
            .loader
            .open(path)
            .map_err(|e| PluginError::LoadFailed(path.to_path_buf(), e))?;

        let entry = self
            .loader
            .entry(&module)
            .ok_or_else(|| PluginError::SymbolMissing(path.to_path_buf()))?;

        if let Some(found) = self.loader.version(&module) {
            if !is_compatible_version(found) {
                return Err(PluginError::Incompatible {
                    path: path.to_path_buf(),
                    found,
                });
            }
        }

        let initialized = entry(setup);
        self.loader.keep_resident(module);

        if initialized {
            Ok(())
        } else {
            Err(PluginError::InitFailed(path.to_path_buf()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{FnPass, PassContext, PassHandle};
    use crate::pass_driver::{PassEdit, Pipeline};
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Arc;

    type Init = Arc<dyn Fn(&mut CompilerSetup) -> bool>;

    #[derive(Clone)]
    struct FakeModule {
        init: Option<Init>,
        version: Option<u32>,
    }

    /// Serves modules by file name instead of dlopen.
    #[derive(Default)]
    struct FakeLoader {
        modules: HashMap<String, FakeModule>,
    }

    impl FakeLoader {
        fn with(mut self, file: &str, init: Option<Init>, version: Option<u32>) -> Self {
            self.modules
                .insert(file.to_string(), FakeModule { init, version });
            self
        }
    }

    impl ModuleLoader for FakeLoader {
        type Module = FakeModule;

        fn open(&self, path: &Path) -> Result<FakeModule, String> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.modules
                .get(&name)
                .cloned()
                .ok_or_else(|| format!("{}: invalid ELF header", name))
        }

        fn entry(&self, module: &FakeModule) -> Option<PluginEntry> {
            let init = module.init.clone()?;
            Some(Box::new(move |setup: &mut CompilerSetup| init(setup)))
        }

        fn version(&self, module: &FakeModule) -> Option<u32> {
            module.version
        }

        fn keep_resident(&self, _module: FakeModule) {}
    }

    fn named(name: &str) -> PassHandle {
        FnPass::handle(name, |_: &mut PassContext<'_>| {})
    }

    fn base_setup() -> CompilerSetup {
        CompilerSetup::new(Pipeline::from_passes([named("A"), named("B"), named("C")]))
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"not really a shared object").unwrap();
        path
    }

    fn plugin(name: &str) -> String {
        format!("{}{}.so", BuildFlavor::Release.marker(), name)
    }

    #[test]
    fn test_valid_and_failing_modules_are_isolated() {
        crate::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &plugin("good"));
        touch(dir.path(), &plugin("bad"));

        let good: Init = Arc::new(|setup: &mut CompilerSetup| {
            setup.edit_pass_by_name("A", PassEdit::InsertAfter(named("Good")), false)
        });
        let bad: Init = Arc::new(|setup: &mut CompilerSetup| {
            setup.edit_pass_by_name("C", PassEdit::InsertAfter(named("Partial")), false);
            false
        });
        let fake = FakeLoader::default()
            .with(&plugin("good"), Some(good), Some(PLUGIN_LOADER_VERSION))
            .with(&plugin("bad"), Some(bad), None);

        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(fake, BuildFlavor::Release);
        loader.load_all(&mut setup, dir.path());

        assert_eq!(
            setup.default_pipeline().names(),
            ["A", "Good", "B", "C", "Partial"]
        );
        assert_eq!(loader.records().len(), 2);
        assert_eq!(loader.active_count(), 1);

        let bad_record = loader
            .records()
            .iter()
            .find(|r| r.path.ends_with(plugin("bad")))
            .unwrap();
        assert_eq!(bad_record.state, PluginState::InitFailed);
    }

    #[test]
    fn test_missing_symbol_and_load_failure_recorded() {
        crate::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &plugin("nosym"));
        touch(dir.path(), &plugin("garbage"));

        let fake = FakeLoader::default().with(&plugin("nosym"), None, None);
        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(fake, BuildFlavor::Release);
        loader.load_all(&mut setup, dir.path());

        let mut states: Vec<_> = loader.records().iter().map(|r| r.state).collect();
        states.sort_by_key(|s| *s as u8);
        assert_eq!(
            states,
            [PluginState::LoadFailed, PluginState::SymbolMissing]
        );
        assert_eq!(setup.default_pipeline().names(), ["A", "B", "C"]);

        let load_failed = loader
            .records()
            .iter()
            .find(|r| r.state == PluginState::LoadFailed)
            .unwrap();
        let message = load_failed.error.as_ref().unwrap().to_string();
        assert!(message.contains("invalid ELF header"), "{}", message);
    }

    #[test]
    fn test_incompatible_version_never_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), &plugin("old"));

        let init: Init = Arc::new(|setup: &mut CompilerSetup| {
            setup.edit_pass_by_name("A", PassEdit::Remove, false)
        });
        let fake = FakeLoader::default().with(
            &plugin("old"),
            Some(init),
            Some(PLUGIN_LOADER_VERSION + 1),
        );

        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(fake, BuildFlavor::Release);
        assert!(!loader.load_plugin(&mut setup, &path));
        assert_eq!(loader.records()[0].state, PluginState::Incompatible);
        assert_eq!(setup.default_pipeline().names(), ["A", "B", "C"]);
    }

    #[test]
    fn test_non_candidates_and_directories_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "libother.so");
        touch(
            dir.path(),
            &format!("{}wrongflavor.so", BuildFlavor::Checked.marker()),
        );
        fs::create_dir(dir.path().join(plugin("subdir"))).unwrap();

        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(FakeLoader::default(), BuildFlavor::Release);
        loader.load_all(&mut setup, dir.path());
        assert!(loader.records().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let target = touch(dir.path(), "real.so");
        std::os::unix::fs::symlink(&target, dir.path().join(plugin("link"))).unwrap();

        let init: Init = Arc::new(|_: &mut CompilerSetup| true);
        let fake = FakeLoader::default().with(&plugin("link"), Some(init), None);
        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(fake, BuildFlavor::Release);
        loader.load_all(&mut setup, dir.path());
        assert!(loader.records().is_empty());
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        crate::logging::init_test();
        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(FakeLoader::default(), BuildFlavor::Release);
        loader.load_all(&mut setup, Path::new("/nonexistent/aotpipe/plugins"));
        assert!(loader.records().is_empty());
    }

    #[test]
    fn test_missing_file_recorded_as_not_found() {
        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(FakeLoader::default(), BuildFlavor::Release);
        assert!(!loader.load_plugin(&mut setup, Path::new("/nonexistent/libaotpipe-x.so")));
        assert_eq!(loader.records()[0].state, PluginState::NotFound);
    }

    #[test]
    fn test_native_loader_rejects_non_library() {
        crate::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &plugin("text"));

        let mut setup = base_setup();
        let mut loader = PluginLoader::with_flavor(NativeLoader, BuildFlavor::Release);
        loader.load_all(&mut setup, dir.path());

        assert_eq!(loader.records().len(), 1);
        assert_eq!(loader.records()[0].state, PluginState::LoadFailed);
        assert_eq!(setup.default_pipeline().names(), ["A", "B", "C"]);
    }
}
