//! CLI subcommand implementations for the weread-extract binary.

pub mod cache_cmd;
pub mod doctor;
pub mod download_cmd;
pub mod rewrite_cmd;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "weread_extract=debug"
    } else {
        "weread_extract=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
