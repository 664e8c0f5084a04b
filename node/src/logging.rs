//! Logging configuration: a single structured, leveled facade initialized
//! once at process start.
//!
//! Flattened into the binary's `Config` so `config.logging.init()` runs
//! before anything else, built directly on `tracing-subscriber`'s
//! env-filter.

use clap::Args;
use tracing_subscriber::EnvFilter;

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// `tracing-subscriber` filter directives, e.g. `replay_node=debug,info`.
    #[clap(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self { log_filter: "info".to_string() }
    }
}

impl Config {
    pub fn init(&self) {
        let filter = EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
