//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::time::Duration;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [executor] section
    if let Some(section) = ini.section(Some("executor")) {
        if let Some(v) = section.get("max_concurrent_operations") {
            config.executor.max_concurrent_operations = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(invalid(
                        "executor",
                        "max_concurrent_operations",
                        v,
                        "must be a positive integer",
                    ))
                }
            };
        }
        if let Some(v) = section.get("operation_timeout_ms") {
            let ms: u64 = v.trim().parse().map_err(|_| {
                invalid(
                    "executor",
                    "operation_timeout_ms",
                    v,
                    "must be a non-negative integer (milliseconds, 0 = no timeout)",
                )
            })?;
            config.executor.operation_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(v) = section.get("success_status") {
            config.executor.success_status = parse_status(v).ok_or_else(|| {
                invalid(
                    "executor",
                    "success_status",
                    v,
                    "must be an integer (decimal or 0x-prefixed hex)",
                )
            })?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let name = v.trim();
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(invalid(
                    "logging",
                    "file",
                    v,
                    "must be a plain file name (set the directory separately)",
                ));
            }
            config.logging.file = name.to_string();
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses a status code in decimal or `0x` hex.
fn parse_status(v: &str) -> Option<i32> {
    let v = v.trim();
    match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => i32::from_str_radix(hex, 16).ok(),
        None => v.parse().ok(),
    }
}

/// Expands a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_executor_section() {
        let config = parse(
            "[executor]\nmax_concurrent_operations = 4\noperation_timeout_ms = 1500\nsuccess_status = 0x01\n",
        )
        .unwrap();
        assert_eq!(config.executor.max_concurrent_operations, 4);
        assert_eq!(
            config.executor.operation_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.executor.success_status, 1);
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let config = parse("[executor]\noperation_timeout_ms = 0\n").unwrap();
        assert!(config.executor.operation_timeout.is_none());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = parse("[executor]\nmax_concurrent_operations = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "max_concurrent_operations"
        ));
    }

    #[test]
    fn test_bad_status_rejected() {
        let err = parse("[executor]\nsuccess_status = ok\n").unwrap_err();
        assert!(err.to_string().contains("executor.success_status"));
    }

    #[test]
    fn test_parse_status_forms() {
        assert_eq!(parse_status("133"), Some(133));
        assert_eq!(parse_status("0x85"), Some(133));
        assert_eq!(parse_status("-1"), Some(-1));
        assert_eq!(parse_status("nope"), None);
    }

    #[test]
    fn test_logging_section() {
        let config = parse("[logging]\ndirectory = ~/radio/logs\nfile = radio.log\n").unwrap();
        assert!(config.logging.directory.ends_with("radio/logs"));
        if dirs::home_dir().is_some() {
            assert!(!config.logging.directory.starts_with("~"));
        }
        assert_eq!(config.logging.file, "radio.log");
        assert!(config.logging.path().ends_with("radio/logs/radio.log"));
    }

    #[test]
    fn test_logging_file_with_path_rejected() {
        let err = parse("[logging]\nfile = logs/radio.log\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref section, .. } if section == "logging"
        ));
    }
}
