//! CLI command implementations.

use std::path::{Path, PathBuf};

use backupd::config::Config;

pub mod next_runs;
pub mod presets;
pub mod serve;

/// Data directory from the CLI override or the config file.
///
/// A relative override is taken as given, relative to the working directory.
pub fn data_dir(config: &Config, config_path: &str, data_dir_override: Option<&Path>) -> PathBuf {
    match data_dir_override {
        Some(dir) => dir.to_path_buf(),
        None => config.data_dir(Path::new(config_path)),
    }
}
