//! Parses the `--agent name:type[:workdir]` CLI surface (§6) into the
//! registration metadata and spawn config the gateway session needs.

use std::time::Duration;

use agentim_adapter::SpawnAdapterConfig;

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub working_dir: Option<String>,
}

impl AgentSpec {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut parts = raw.splitn(3, ':');
        let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| anyhow::anyhow!("--agent must start with a name, got {raw:?}"))?;
        let agent_type = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| anyhow::anyhow!("--agent {raw:?} is missing a type (expected name:type[:workdir])"))?;
        let working_dir = parts.next().map(str::to_string);

        Ok(Self { id: uuid::Uuid::new_v4().to_string(), name: name.to_string(), agent_type: agent_type.to_string(), working_dir })
    }
}

/// Maps a known agent type to the CLI program that implements it. Unknown
/// types are passed through verbatim as the program name, so an operator
/// can point `--agent foo:some-custom-cli` at anything on `PATH`.
fn program_for_type(agent_type: &str) -> &str {
    match agent_type {
        "claude" | "claude-code" => "claude",
        "codex" => "codex",
        "gemini" => "gemini",
        "cursor" => "cursor-agent",
        other => other,
    }
}

impl AgentSpec {
    pub fn registration(&self) -> agentim_protocol::AgentRegistration {
        agentim_protocol::AgentRegistration {
            id: self.id.clone(),
            name: self.name.clone(),
            agent_type: self.agent_type.clone(),
            working_dir: self.working_dir.clone(),
        }
    }

    pub fn spawn_config(&self) -> SpawnAdapterConfig {
        let mut config = SpawnAdapterConfig::new(self.name.clone(), program_for_type(&self.agent_type))
            .with_idle_timeout(Duration::from_secs(5 * 60))
            .with_absolute_timeout(Duration::from_secs(15 * 60));
        config.pass_env = std::env::vars().collect();
        if let Some(dir) = &self.working_dir {
            config.working_dir = Some(dir.into());
        }
        config
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_type_workdir() {
        let spec = AgentSpec::parse("TestBot:claude:/home/ops/proj").unwrap();
        assert_eq!(spec.name, "TestBot");
        assert_eq!(spec.agent_type, "claude");
        assert_eq!(spec.working_dir.as_deref(), Some("/home/ops/proj"));
    }

    #[test]
    fn parses_name_type_without_workdir() {
        let spec = AgentSpec::parse("TestBot:codex").unwrap();
        assert_eq!(spec.working_dir, None);
    }

    #[test]
    fn rejects_missing_type() {
        assert!(AgentSpec::parse("TestBot").is_err());
    }

    #[test]
    fn unknown_type_passes_through_as_program() {
        let spec = AgentSpec::parse("Bot:my-custom-cli").unwrap();
        assert_eq!(spec.spawn_config().program, "my-custom-cli");
    }
}
