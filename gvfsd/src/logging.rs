//! Logging bootstrap: one seam, called once from `main`, per spec.md §6.

use std::env;

/// Initialize the `log` facade via `env_logger`, defaulting to `info`
/// when `RUST_LOG` is not set.
pub fn init() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();
}
