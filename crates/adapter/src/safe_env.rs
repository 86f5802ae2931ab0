//! Sensitive-environment scrubbing for spawned child processes (§4.6, I6).
//!
//! `SafeEnv(passEnv)` strips (a) exact keys in [`SENSITIVE_ENV_KEYS`], (b)
//! any key prefixed by an entry in [`SENSITIVE_ENV_PREFIXES`], and (c)
//! always strips [`NEVER_PASSABLE_KEYS`] regardless of any whitelist — that
//! last set is not overridable by a caller-supplied allowlist.

/// Exact environment variable names never passed through to a child unless
/// explicitly re-added by adapter-specific env (which still cannot restore
/// a `NEVER_PASSABLE_KEYS` entry — see [`filter`]).
pub const SENSITIVE_ENV_KEYS: &[&str] = &[
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "NPM_TOKEN",
    "DOCKER_PASSWORD",
    "DATABASE_URL",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
];

/// Any key with one of these prefixes is stripped.
pub const SENSITIVE_ENV_PREFIXES: &[&str] = &["AGENTIM_SECRET_", "AGENTIM_TOKEN_", "_AWS_"];

/// Stripped unconditionally — not overridable by any allowlist (§4.6, I6).
pub const NEVER_PASSABLE_KEYS: &[&str] = &["AGENTIM_HUB_SECRET", "AGENTIM_REVOCATION_HMAC_SECRET"];

/// Builds the child environment as `SafeEnv(pass_env) ⊕ adapter_env`.
///
/// `pass_env` is whatever the caller intended to whitelist through from the
/// gateway process's own environment; `adapter_env` is appended afterward
/// (and can override a passed-through key) but can never reintroduce a
/// `NEVER_PASSABLE_KEYS` entry.
#[must_use]
pub fn build_child_env(pass_env: &[(String, String)], adapter_env: &[(String, String)]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = pass_env.iter().filter(|(k, _)| is_passable(k)).cloned().collect();

    for (k, v) in adapter_env {
        if !is_passable(k) {
            continue;
        }
        if let Some(existing) = merged.iter_mut().find(|(ek, _)| ek == k) {
            existing.1 = v.clone();
        } else {
            merged.push((k.clone(), v.clone()));
        }
    }
    merged
}

fn is_passable(key: &str) -> bool {
    if NEVER_PASSABLE_KEYS.contains(&key) {
        return false;
    }
    if SENSITIVE_ENV_KEYS.contains(&key) {
        return false;
    }
    if SENSITIVE_ENV_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_exact_sensitive_keys() {
        let pass = vec![("HOME".to_string(), "/home/u".to_string()), ("GITHUB_TOKEN".to_string(), "gh_xxx".to_string())];
        let env = build_child_env(&pass, &[]);
        assert!(env.iter().any(|(k, _)| k == "HOME"));
        assert!(!env.iter().any(|(k, _)| k == "GITHUB_TOKEN"));
    }

    #[test]
    fn strips_prefixed_keys() {
        let pass = vec![("AGENTIM_SECRET_FOO".to_string(), "x".to_string())];
        let env = build_child_env(&pass, &[]);
        assert!(env.is_empty());
    }

    #[test]
    fn never_passable_key_cannot_be_reintroduced_via_adapter_env() {
        let adapter_env = vec![("AGENTIM_HUB_SECRET".to_string(), "leak-attempt".to_string())];
        let env = build_child_env(&[], &adapter_env);
        assert!(env.is_empty());
    }

    #[test]
    fn adapter_env_overrides_passed_through_value() {
        let pass = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let adapter_env = vec![("PATH".to_string(), "/opt/bin:/usr/bin".to_string())];
        let env = build_child_env(&pass, &adapter_env);
        assert_eq!(env.iter().find(|(k, _)| k == "PATH").map(|(_, v)| v.as_str()), Some("/opt/bin:/usr/bin"));
    }

    #[test]
    fn non_sensitive_key_passes_through_unchanged() {
        let pass = vec![("LANG".to_string(), "en_US.UTF-8".to_string())];
        let env = build_child_env(&pass, &[]);
        assert_eq!(env, pass);
    }
}
