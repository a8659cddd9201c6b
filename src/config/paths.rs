//! Platform data and log directory resolution.
//!
//! Mirrors where the desktop shell keeps its files, so the voice core
//! reads the same `live_config.json` / `profile.json` the shell writes:
//!   Windows: %APPDATA%\skintracker-pro\
//!   macOS:   ~/Library/Application Support/skintracker-pro/
//!   Linux:   $XDG_CONFIG_HOME/skintracker-pro/ (default ~/.config)

use std::path::PathBuf;

const APP_DIR: &str = "skintracker-pro";

/// Directory holding config and collaborator JSON files.
pub fn get_data_dir() -> PathBuf {
    app_root().join("data")
}

/// Directory for rolling log files, a sibling of the data directory.
pub fn get_log_dir() -> PathBuf {
    app_root().join("logs")
}

fn app_root() -> PathBuf {
    platform_base().join(APP_DIR)
}

#[cfg(target_os = "windows")]
fn platform_base() -> PathBuf {
    // %APPDATA% is what the shell uses; dirs is the fallback.
    std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(target_os = "macos")]
fn platform_base() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("Library").join("Application Support"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn platform_base() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_and_log_dirs_share_the_app_root() {
        let data = get_data_dir();
        let logs = get_log_dir();
        assert_eq!(data.parent(), logs.parent());
        assert!(data.ends_with("skintracker-pro/data"));
    }
}
