use env_logger::{Builder as LogBuilder, Env as EnvLoggerEnv};
use log::LevelFilter;

/// Initializes the global logger from `RUST_LOG`, defaulting to `warn`.
///
/// The CDP transport modules of chromiumoxide are silenced because they log
/// every protocol message they cannot deserialize. Calling this more than
/// once is harmless.
pub fn init_logger() {
    let _ignore_result = LogBuilder::from_env(EnvLoggerEnv::default().filter_or("RUST_LOG", "warn"))
        .filter_module("chromiumoxide::conn", LevelFilter::Off)
        .filter_module("chromiumoxide::handler", LevelFilter::Off)
        .format_timestamp_millis()
        .try_init();
}
