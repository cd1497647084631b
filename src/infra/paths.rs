// src/infra/paths.rs — Path management
//
// All paths respect the DELVE_HOME environment variable for isolation.
// When DELVE_HOME is set, the config file lives under that directory.
// When unset, config uses ~/.delve/.

use std::path::PathBuf;

/// Returns the DELVE_HOME override, if set.
fn delve_home() -> Option<PathBuf> {
    std::env::var_os("DELVE_HOME").map(PathBuf::from)
}

/// Home directory, or the current directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $DELVE_HOME/ or ~/.delve/
pub fn config_dir() -> PathBuf {
    if let Some(home) = delve_home() {
        return home;
    }
    dirs_home().join(".delve")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
