use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::types::LabexecConfig;
use crate::error::{LabexecError, Result};

/// Default location of `config.toml`, e.g. `~/.config/labexec/config.toml`.
pub fn get_config_path() -> PathBuf {
    match directories::ProjectDirs::from("com", "labexec", "labexec") {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        // No home directory (containers, CI users): look next to the process
        None => PathBuf::from(".labexec").join("config.toml"),
    }
}

/// Load and validate the configuration. A missing file means defaults.
pub fn load_config(config_path: Option<&Path>) -> Result<LabexecConfig> {
    let path = config_path.map_or_else(get_config_path, Path::to_path_buf);

    let config = match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No configuration file, using defaults");
            LabexecConfig::default()
        }
        Err(e) => {
            return Err(LabexecError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    config.executor.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<LabexecConfig> {
    toml::from_str(content).map_err(|e| LabexecError::TomlParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.executor.timeout_seconds, 30);
    }

    #[test]
    fn test_loads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[executor]\nnamespace = \"lab-\"\ntimeout_seconds = 5\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.executor.namespace, "lab-");
        assert_eq!(config.executor.timeout_seconds, 5);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[executor]\ntimeout_seconds = 0\n").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(LabexecError::Config(_))
        ));
    }

    #[test]
    fn test_unreadable_path_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file
        assert!(matches!(
            load_config(Some(dir.path())),
            Err(LabexecError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            parse_config("[executor\n"),
            Err(LabexecError::TomlParse(_))
        ));
    }
}
