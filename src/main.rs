//! aotpipe - pass pipeline driver with native plugins
//!
//! # Usage
//!
//! ```bash
//! # Show the default pipeline after plugins and the disable list
//! aotpipe passes
//! aotpipe --disable-passes BBCombine,CodeLayout passes --json
//!
//! # Run the pipeline over 64 synthetic methods, timing every pass
//! aotpipe --print-passes CodeLayout run --units 64 --time
//!
//! # Report which plugins loaded
//! aotpipe --plugin-dir ./plugins plugins
//! ```

use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use compiler::config::DriverConfig;
use compiler::pass_driver::TimingDispatcher;
use compiler::plugin_handler::{PluginLoader, PluginRecord, PluginState};
use compiler::selectivity::{MethodCompileRequest, OptimizationLevel};
use compiler::{CompilationUnit, CompilerSetup, PassDriver, SharedSetup};

#[derive(Parser)]
#[command(name = "aotpipe")]
#[command(version = "0.1.0")]
#[command(about = "Ahead-of-time compiler pass pipeline with native plugins", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: DriverOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DriverOptions {
    /// TOML driver configuration; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory scanned for plugins
    #[arg(long, global = true)]
    plugin_dir: Option<PathBuf>,

    /// Do not load any plugin
    #[arg(long, global = true)]
    no_plugins: bool,

    /// Passes removed from the default pipeline (e.g. "BBCombine,CodeLayout")
    #[arg(long, global = true)]
    disable_passes: Option<String>,

    /// Log every pass as it is applied
    #[arg(long, global = true)]
    print_all_passes: bool,

    /// Log only these passes as they are applied
    #[arg(long, global = true)]
    print_passes: Option<String>,

    /// Dump the CFG after these passes
    #[arg(long, global = true)]
    dump_cfg_passes: Option<String>,

    /// Where CFG dumps are written
    #[arg(long, global = true)]
    dump_cfg_folder: Option<PathBuf>,

    /// Optimization level (O0-O3)
    #[arg(short = 'O', long, global = true)]
    optimization_level: Option<String>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the default pipeline
    Passes {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the pipeline over synthetic compilation units
    Run {
        /// Number of units
        #[arg(long, default_value = "16")]
        units: usize,

        /// Report time spent per pass
        #[arg(long)]
        time: bool,
    },

    /// Show the outcome of every plugin the loader tried
    Plugins,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.options.verbose);

    let result = match cli.command {
        Commands::Passes { json } => list_passes(&cli.options, json),
        Commands::Run { units, time } => run_units(&cli.options, units, time),
        Commands::Plugins => show_plugins(&cli.options),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => None,
        1 => Some(log::LevelFilter::Info),
        2 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    };
    match level {
        Some(level) => compiler::logging::init_with_level(level),
        None => compiler::logging::init_from_env(),
    };
}

/// Merge the configuration file with command line overrides.
fn resolve_config(options: &DriverOptions) -> Result<DriverConfig, String> {
    let mut config = match &options.config {
        Some(path) => DriverConfig::load(path).map_err(|e| e.to_string())?,
        None => DriverConfig::default(),
    };

    if let Some(dir) = &options.plugin_dir {
        config.plugin_dir = dir.clone();
    }
    if options.no_plugins {
        config.load_plugins = false;
    }
    if let Some(list) = &options.disable_passes {
        config.disable_passes = list.clone();
    }
    if options.print_all_passes {
        config.print_all_passes = true;
    }
    if let Some(list) = &options.print_passes {
        config.print_passes = list.clone();
    }
    if let Some(list) = &options.dump_cfg_passes {
        config.dump_cfg_passes = list.clone();
    }
    if let Some(folder) = &options.dump_cfg_folder {
        config.dump_cfg_folder = Some(folder.clone());
    }
    if let Some(level) = &options.optimization_level {
        config.optimization_level = parse_level(level)?;
    }

    Ok(config)
}

fn parse_level(text: &str) -> Result<OptimizationLevel, String> {
    match text.trim_start_matches(['O', 'o']) {
        "0" => Ok(OptimizationLevel::O0),
        "1" => Ok(OptimizationLevel::O1),
        "2" => Ok(OptimizationLevel::O2),
        "3" => Ok(OptimizationLevel::O3),
        _ => Err(format!("Unknown optimization level: {}", text)),
    }
}

/// Setup phase: plugins first, then the configuration.
fn prepare(options: &DriverOptions) -> Result<(CompilerSetup, Vec<PluginRecord>), String> {
    let config = resolve_config(options)?;
    let mut setup = CompilerSetup::with_standard_passes();

    let mut records = Vec::new();
    if config.load_plugins {
        let mut loader = PluginLoader::native();
        loader.load_all(&mut setup, &config.plugin_dir);
        records = loader.records().to_vec();
    }

    config.apply(&mut setup);
    setup.hooks().toggle_analysis(true, &config.disable_passes);
    Ok((setup, records))
}

#[derive(Serialize)]
struct PassListing<'a> {
    passes: Vec<&'a str>,
    optimization_level: OptimizationLevel,
}

fn list_passes(options: &DriverOptions, json: bool) -> Result<(), String> {
    let (setup, _) = prepare(options)?;

    if json {
        let listing = PassListing {
            passes: setup.default_pipeline().names(),
            optimization_level: setup.hooks().used_optimization_level(),
        };
        let text = serde_json::to_string_pretty(&listing)
            .map_err(|e| format!("Failed to serialize pass list: {}", e))?;
        println!("{}", text);
    } else {
        setup.print_pass_names();
        for (index, name) in setup.default_pipeline().names().iter().enumerate() {
            println!("{:3}  {}", index, name);
        }
    }
    Ok(())
}

fn show_plugins(options: &DriverOptions) -> Result<(), String> {
    let (_, records) = prepare(options)?;

    if records.is_empty() {
        println!("No plugins loaded");
        return Ok(());
    }

    for record in &records {
        match &record.error {
            Some(e) => println!("{:?}\t{}\t{}", record.state, record.path.display(), e),
            None => println!("{:?}\t{}", record.state, record.path.display()),
        }
    }

    let active = records.iter().filter(|r| r.state == PluginState::Active).count();
    println!("{} of {} plugins active", active, records.len());
    Ok(())
}

/// A synthetic method standing in for real dex input.
struct DemoUnit {
    method_idx: u32,
    class_def_idx: u16,
    dex_location: String,
}

impl DemoUnit {
    fn new(index: usize) -> Self {
        Self {
            method_idx: index as u32,
            class_def_idx: (index / 4) as u16,
            dex_location: "classes.dex".to_string(),
        }
    }
}

impl CompilationUnit for DemoUnit {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn dump_cfg(&self, folder: &Path, pass_name: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(folder)?;
        let file = folder.join(format!("method{}-{}.dot", self.method_idx, pass_name));
        let dot = format!(
            "digraph method{} {{\n  entry -> body -> exit;\n  label=\"after {}\";\n}}\n",
            self.method_idx, pass_name
        );
        std::fs::write(file, dot)
    }
}

struct UnitOutcome {
    compiled: bool,
    timings: Vec<(String, Duration)>,
}

fn compile_unit(setup: &SharedSetup, unit: &mut DemoUnit) -> UnitOutcome {
    let hooks = setup.hooks();
    let dex_location = unit.dex_location.clone();

    if hooks.skip_class_compile(&dex_location, &unit.class_def_idx) {
        log::debug!("class {} skipped", unit.class_def_idx);
        return UnitOutcome {
            compiled: false,
            timings: Vec::new(),
        };
    }

    let mut request = MethodCompileRequest {
        code_item: None,
        method_idx: unit.method_idx,
        dex_file: &dex_location,
        access_flags: 0x1,
        class_def_idx: unit.class_def_idx,
        dex_to_dex_level: Default::default(),
    };
    if hooks.skip_method_compile(&mut request) {
        log::debug!(
            "method {} skipped ({:?})",
            unit.method_idx,
            request.dex_to_dex_level
        );
        return UnitOutcome {
            compiled: false,
            timings: Vec::new(),
        };
    }

    hooks.analyze_resolved_method(&unit.method_idx, &dex_location);

    let mut driver = PassDriver::with_dispatcher(setup, unit, TimingDispatcher::new());
    driver.run_all();
    let timings = driver
        .into_dispatcher()
        .timings()
        .iter()
        .map(|t| (t.pass.clone(), t.elapsed))
        .collect();

    hooks.analyze_verified_method(&unit.method_idx);

    UnitOutcome {
        compiled: true,
        timings,
    }
}

fn run_units(options: &DriverOptions, count: usize, time: bool) -> Result<(), String> {
    let (setup, _) = prepare(options)?;
    let shared = setup.freeze();

    if shared.hooks().pre_compile_summary(&count, &()) {
        log::info!("Pre-compile summary requested a reduced compile");
    }

    let mut units: Vec<DemoUnit> = (0..count).map(DemoUnit::new).collect();
    let outcomes: Vec<UnitOutcome> = units
        .par_iter_mut()
        .map(|unit| compile_unit(&shared, unit))
        .collect();

    shared.hooks().dump_selectivity_stats();

    let compiled = outcomes.iter().filter(|o| o.compiled).count();
    println!(
        "Compiled {} of {} units with {} passes",
        compiled,
        count,
        shared.default_pipeline().len()
    );

    if time {
        let mut per_pass: BTreeMap<String, Duration> = BTreeMap::new();
        for (pass, elapsed) in outcomes.iter().flat_map(|o| o.timings.iter()) {
            *per_pass.entry(pass.clone()).or_default() += *elapsed;
        }
        for name in shared.default_pipeline().names() {
            let elapsed = per_pass.get(name).copied().unwrap_or_default();
            println!("{:>40}  {:?}", name, elapsed);
        }
    }

    Ok(())
}
