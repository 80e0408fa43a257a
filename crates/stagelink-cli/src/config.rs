//! Config file – reads/writes `~/.stagelink/config.toml`.
//!
//! The file holds a [`StationConfig`]; every section is optional.

use std::fs;
use std::path::{Path, PathBuf};

use stagelink_runtime::StationConfig;
use stagelink_types::LinkError;

/// Return the config path: `STAGELINK_CONFIG` if set, else
/// `~/.stagelink/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("STAGELINK_CONFIG")
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".stagelink").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.  Environment overrides are applied on top.
pub(crate) fn load_from(path: &Path) -> Result<Option<StationConfig>, LinkError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| LinkError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: StationConfig = toml::from_str(&raw)
        .map_err(|e| LinkError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `STAGELINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STAGELINK_SERVER_URL` | `server_url` |
/// | `STAGELINK_STATION_ID` | `station_id` |
/// | `STAGELINK_SIMULATE` | `simulate` (`1`/`true`/`yes` or `0`/`false`/`no`) |
pub fn apply_env_overrides(cfg: &mut StationConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut StationConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("STAGELINK_SERVER_URL") {
        cfg.server_url = v;
    }
    if let Some(v) = var("STAGELINK_STATION_ID")
        && !v.trim().is_empty()
    {
        cfg.station_id = v;
    }
    if let Some(v) = var("STAGELINK_SIMULATE")
        && let Some(simulate) = parse_flag(&v)
    {
        cfg.simulate = simulate;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to a specific path, creating the parent directory if
/// necessary.
pub(crate) fn save_to(cfg: &StationConfig, path: &Path) -> Result<(), LinkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| LinkError::Config(format!("failed to create config directory: {e}")))?;
        // Owner-only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                LinkError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| LinkError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| LinkError::Config(format!("failed to write {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| LinkError::Config(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}
