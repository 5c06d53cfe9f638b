//! Command-line front end for the lifeline decomposition pipeline.

pub mod bootstrap;
pub mod cli_args;
pub mod commands;
pub mod config;

pub use bootstrap::init_tracing;
pub use cli_args::{Cli, Command};
pub use commands::run;
pub use config::{load_file_config, DecomposeSettings, FileConfig, DEFAULT_OUTPUT_FILE};
