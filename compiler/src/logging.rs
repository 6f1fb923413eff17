//! Logging setup for the pass pipeline
//!
//! Diagnostics go through the `log` facade; the binary picks a backend once
//! at startup with one of the functions below.
//!
//! ```rust,ignore
//! use compiler::logging;
//!
//! logging::init_from_env();
//! // or
//! logging::init_with_level(log::LevelFilter::Info);
//! ```
//!
//! # Log Levels
//!
//! - `warn!` - CFG dumps that could not be written, bad configuration
//! - `info!` - plugin loading, skipped passes, edit targets not found,
//!   `Pass X applied` lines selected by the print list
//! - `debug!` - pipeline construction per compilation unit
//! - `trace!` - every stage as it runs
//!
//! `RUST_LOG=compiler::plugin_handler=info aotpipe run` shows only plugin
//! loading.

use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Install an env_logger at `level`.
///
/// Returns `false`, leaving the existing logger in place, when the process
/// already has one (an embedding host, or an earlier call).
pub fn init_with_level(level: LevelFilter) -> bool {
    install(Builder::new().filter_level(level))
}

/// Install an env_logger configured by `RUST_LOG`, falling back to Warn.
///
/// Same return value as [`init_with_level`].
pub fn init_from_env() -> bool {
    install(&mut Builder::from_env(Env::default().default_filter_or("warn")))
}

/// Initialize logging for tests; output is captured by the harness.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Info)
        .is_test(true)
        .try_init();
}

fn install(builder: &mut Builder) -> bool {
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{:5}] {}:{} - {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
    }

    #[test]
    fn test_existing_logger_is_kept() {
        init_test();
        assert!(!init_with_level(LevelFilter::Trace));
        assert!(!init_from_env());
        log::info!("still logging through the test logger");
    }
}
