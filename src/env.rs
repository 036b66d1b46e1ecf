//! Environment constants and path utilities for the sync client.
//!
//! This module centralizes the configuration file names, discovery paths and
//! protocol defaults used throughout the crate.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git)
pub const APP_DIR_NAME: &str = ".challenge-sync";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Stand-alone configuration file name in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "challenge-sync.toml";

/// System-wide configuration directory name
pub const SYSTEM_CONFIG_DIR_NAME: &str = "challenge-sync";

/// Default log filter when neither RUST_LOG nor the config sets one
pub const DEFAULT_LOG_FILTER: &str = "challenge_sync=info";

/// Protocol timing defaults
pub mod defaults {
    /// Timeout of the first start attempt; attempt `n` waits `n` times this
    pub const START_TIMEOUT_MS: u64 = 5_000;

    /// Start retries after the first attempt
    pub const START_RETRIES: u32 = 2;

    /// Wait for an end acknowledgment before closing locally
    pub const END_TIMEOUT_MS: u64 = 5_000;

    /// Delay before the presentation layer refreshes its history
    pub const HISTORY_REFRESH_DELAY_MS: u64 = 2_000;

    /// Server address used when no configuration is found
    pub const SERVER_URL: &str = "wss://localhost:3003/ws";

    /// Account name the simulation logs in with when none is configured
    pub const SIMULATION_USERNAME: &str = "alice";
}

/// Build the application directory path under `root`
pub fn app_dir_path(root: &Path) -> PathBuf {
    root.join(APP_DIR_NAME)
}

/// Build config file path in the user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    app_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build the hidden-directory config path in the current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    app_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the stand-alone config path in the current directory
pub fn local_standalone_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.challenge-sync/config.toml")
        );

        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.challenge-sync/config.toml")
        );

        assert_eq!(
            local_standalone_config_file_path(current_dir),
            Path::new("/current/project/challenge-sync.toml")
        );
    }

    #[test]
    fn test_backoff_defaults_are_sane() {
        assert!(defaults::START_TIMEOUT_MS > 0);
        assert!(defaults::END_TIMEOUT_MS > 0);
        assert!(defaults::START_RETRIES >= 1);
    }
}
