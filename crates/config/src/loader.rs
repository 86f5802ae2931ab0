use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::HubConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["agentim.toml", "agentim.yaml", "agentim.yml", "agentim.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<HubConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./agentim.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/agentim/agentim.{toml,yaml,yml,json}` (user-global)
///
/// Returns `HubConfig::default()` if no config file is found.
pub fn discover_and_load() -> HubConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    HubConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "agentim") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/agentim/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "agentim").map(|d| d.config_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentim.toml")
}

/// Serialize `config` to TOML and write it to the user-global config path.
///
/// Creates parent directories if needed. Returns the path written to.
pub fn save_config(config: &HubConfig) -> anyhow::Result<PathBuf> {
    let path = find_or_default_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(&path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<HubConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_toml_round_trips_through_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentim.toml");
        let cfg = HubConfig {
            bind: "0.0.0.0".into(),
            port: 9999,
            ..HubConfig::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.port, 9999);
        assert_eq!(loaded.bind, "0.0.0.0");
    }

    #[test]
    fn load_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentim.json");
        std::fs::write(&path, r#"{"port": 1234}"#).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.port, 1234);
    }

    #[test]
    fn missing_file_errors() {
        let path = PathBuf::from("/nonexistent/agentim.toml");
        assert!(load_config(&path).is_err());
    }
}
