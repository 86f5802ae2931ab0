//! The gateway's persisted state under `~/.agentim/` (§6, §10.3.2).
//!
//! This is a narrower, explicitly-versioned artifact distinct from the hub
//! server settings discovery in [`crate::loader`] — it is never searched for
//! project-locally and never falls back to defaults silently.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayStateError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, GatewayStateError>;

/// `~/.agentim/`, created with mode `0700` on first use.
pub fn state_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(GatewayStateError::NoHomeDir)?;
    Ok(home.join(".agentim"))
}

pub fn ensure_state_dir() -> Result<PathBuf> {
    let dir = state_dir()?;
    std::fs::create_dir_all(&dir)?;
    set_dir_mode(&dir, 0o700)?;
    Ok(dir)
}

fn config_path(dir: &Path) -> PathBuf {
    dir.join("config.json")
}

/// The legacy (v1) plaintext config format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigV1 {
    #[serde(rename = "serverUrl")]
    pub server_url: String,
    pub token: String,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "gatewayId")]
    pub gateway_id: String,
}

/// The current (v2) config format. `token`/`refresh_token` are opaque —
/// callers are responsible for encrypting/decrypting them (see
/// `agentim-vault`); this module never sees plaintext secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub version: u32,
    #[serde(rename = "serverUrl")]
    pub server_url: String,
    #[serde(rename = "serverBaseUrl")]
    pub server_base_url: String,
    pub token: String,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "gatewayId")]
    pub gateway_id: String,
}

pub const CURRENT_VERSION: u32 = 2;

/// Load `~/.agentim/config.json`, migrating a v1 file in place if needed.
///
/// `encrypt` is applied to each plaintext secret found in a v1 file before
/// it is written back out as v2. Returns `Ok(None)` if no config exists yet.
pub fn load_or_migrate(encrypt: impl Fn(&str) -> String) -> Result<Option<GatewayConfig>> {
    let dir = state_dir()?;
    let path = config_path(&dir);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;

    let version = value.get("version").and_then(serde_json::Value::as_u64);
    if version == Some(u64::from(CURRENT_VERSION)) {
        return Ok(Some(serde_json::from_value(value)?));
    }

    // No `version` field (or an older one) — treat as v1.
    let v1: ConfigV1 = serde_json::from_value(value)?;
    let migrated = GatewayConfig {
        version: CURRENT_VERSION,
        server_base_url: v1.server_url.clone(),
        server_url: v1.server_url,
        token: encrypt(&v1.token),
        refresh_token: v1.refresh_token.as_deref().map(&encrypt),
        gateway_id: v1.gateway_id,
    };
    save_gateway_config(&migrated)?;
    Ok(Some(migrated))
}

pub fn save_gateway_config(config: &GatewayConfig) -> Result<()> {
    let dir = ensure_state_dir()?;
    let path = config_path(&dir);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    set_file_mode(&path, 0o600)?;
    Ok(())
}

/// A locally-spawned gateway daemon's liveness record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRecord {
    pub pid: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "workDir")]
    pub work_dir: String,
    #[serde(rename = "startedAtMs")]
    pub started_at_ms: u64,
    #[serde(rename = "gatewayId")]
    pub gateway_id: String,
}

fn daemons_dir(state: &Path) -> PathBuf {
    state.join("daemons")
}

fn daemon_path(state: &Path, name: &str) -> PathBuf {
    daemons_dir(state).join(format!("{name}.json"))
}

pub fn save_daemon_record(record: &DaemonRecord) -> Result<()> {
    let dir = ensure_state_dir()?;
    let daemons = daemons_dir(&dir);
    std::fs::create_dir_all(&daemons)?;
    set_dir_mode(&daemons, 0o700)?;
    let path = daemon_path(&dir, &record.name);
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&path, json)?;
    set_file_mode(&path, 0o600)?;
    Ok(())
}

pub fn load_daemon_record(name: &str) -> Result<Option<DaemonRecord>> {
    let dir = state_dir()?;
    let path = daemon_path(&dir, name);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn remove_daemon_record(name: &str) -> Result<()> {
    let dir = state_dir()?;
    let path = daemon_path(&dir, name);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Verifies the PID in `record` both exists and belongs to an agentim
/// process, so a stale record never causes killing an unrelated PID that
/// happens to be reused by the OS.
#[cfg(target_os = "linux")]
pub fn is_daemon_alive(record: &DaemonRecord) -> bool {
    let cmdline_path = format!("/proc/{}/cmdline", record.pid);
    match std::fs::read_to_string(cmdline_path) {
        Ok(cmdline) => cmdline.contains("agentim"),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
pub fn is_daemon_alive(_record: &DaemonRecord) -> bool {
    // Conservative default off Linux: treat as dead rather than risk acting
    // on an unverified PID.
    false
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests that touch $HOME since state_dir() reads it process-wide.
    static HOME_LOCK: Mutex<()> = Mutex::new(());

    fn with_temp_home<T>(f: impl FnOnce(&Path) -> T) -> T {
        let _guard = HOME_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::var_os("HOME");
        std::env::set_var("HOME", dir.path());
        let result = f(dir.path());
        match prev {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }
        result
    }

    #[test]
    fn migrates_v1_to_v2_and_encrypts_tokens() {
        with_temp_home(|home| {
            let agentim_dir = home.join(".agentim");
            std::fs::create_dir_all(&agentim_dir).unwrap();
            let v1 = serde_json::json!({
                "serverUrl": "wss://hub.example.com",
                "token": "plain-access",
                "refreshToken": "plain-refresh",
                "gatewayId": "gw-1",
            });
            std::fs::write(agentim_dir.join("config.json"), v1.to_string()).unwrap();

            let loaded = load_or_migrate(|s| format!("enc({s})")).unwrap().unwrap();
            assert_eq!(loaded.version, CURRENT_VERSION);
            assert_eq!(loaded.token, "enc(plain-access)");
            assert_eq!(loaded.refresh_token.as_deref(), Some("enc(plain-refresh)"));

            // Second load sees the already-migrated v2 file and does not re-encrypt.
            let reloaded = load_or_migrate(|s| format!("enc({s})")).unwrap().unwrap();
            assert_eq!(reloaded.token, "enc(plain-access)");
        });
    }

    #[test]
    fn missing_config_returns_none() {
        with_temp_home(|_| {
            let result = load_or_migrate(|s| s.to_string()).unwrap();
            assert!(result.is_none());
        });
    }

    #[test]
    fn daemon_record_round_trips() {
        with_temp_home(|_| {
            let record = DaemonRecord {
                pid: std::process::id(),
                name: "claude-code".into(),
                kind: "spawn".into(),
                work_dir: "/tmp".into(),
                started_at_ms: 1_700_000_000_000,
                gateway_id: "gw-1".into(),
            };
            save_daemon_record(&record).unwrap();
            let loaded = load_daemon_record("claude-code").unwrap().unwrap();
            assert_eq!(loaded.pid, record.pid);
            remove_daemon_record("claude-code").unwrap();
            assert!(load_daemon_record("claude-code").unwrap().is_none());
        });
    }

    #[test]
    fn unverified_pid_is_not_considered_alive() {
        let record = DaemonRecord {
            pid: u32::MAX,
            name: "ghost".into(),
            kind: "spawn".into(),
            work_dir: "/tmp".into(),
            started_at_ms: 0,
            gateway_id: "gw-1".into(),
        };
        assert!(!is_daemon_alive(&record));
    }
}
