//! Filesystem locations used by Polychat

use std::path::PathBuf;

use crate::constants::fs;

/// Root config directory (`~/.polychat`)
///
/// Falls back to the current directory when no home directory can be resolved.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(fs::CONFIG_DIR_NAME)
}

/// Directory for log files
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Registry persistence file (model configs and custom models)
pub fn models_file() -> PathBuf {
    config_dir().join(fs::MODELS_FILE_NAME)
}

/// User settings file
pub fn settings_file() -> PathBuf {
    config_dir().join(fs::SETTINGS_FILE_NAME)
}
