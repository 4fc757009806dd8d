//! Agent configuration record — read-only from the dialog core's
//! point of view. The CRUD layer that creates/lists/edits these records is
//! out of scope; `AgentStore` is the narrow seam the core reads
//! through, analogous to how `voice::tts`/`voice::stt` expose a registry
//! that some other layer populates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One agent's immutable-for-the-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub voice_id: String,
    pub speaking_speed: f32,
    pub initial_greeting: String,
    pub system_prompt: String,
    pub tone_preset: String,
    pub llm_model: String,
    pub knowledge_text: Option<String>,
    /// Restrict answers to `knowledge_text` only.
    pub guardrail_knowledge_only: bool,
    pub inject_current_time: bool,
    pub inject_caller_info: bool,
    pub timezone: String,
}

impl AgentConfig {
    /// Render the system message actually sent to the LLM: the configured
    /// prompt plus whatever dynamic context and guardrails this agent has
    /// opted into. `caller_id` is whatever the session learned from the
    /// `call_started` frame, if anything.
    pub fn render_system_prompt(&self, caller_id: Option<&str>) -> String {
        let mut sections = vec![self.system_prompt.clone()];

        if let Some(knowledge) = &self.knowledge_text {
            if self.guardrail_knowledge_only {
                sections.push(format!(
                    "Answer only using the following knowledge. If the answer isn't in it, say you don't know:\n{knowledge}"
                ));
            } else {
                sections.push(format!("Reference knowledge:\n{knowledge}"));
            }
        }

        if self.inject_current_time {
            sections.push(format!(
                "Current time: {} (agent timezone: {}).",
                chrono::Utc::now().to_rfc3339(),
                self.timezone
            ));
        }

        if self.inject_caller_info {
            if let Some(caller_id) = caller_id {
                sections.push(format!("Caller id: {caller_id}."));
            }
        }

        sections.join("\n\n")
    }

    /// A minimal agent usable in tests and as a fallback default.
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "Assistant".to_string(),
            voice_id: "default".to_string(),
            speaking_speed: 1.0,
            initial_greeting: "Hello!".to_string(),
            system_prompt: "You are a helpful voice assistant.".to_string(),
            tone_preset: "neutral".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            knowledge_text: None,
            guardrail_knowledge_only: false,
            inject_current_time: false,
            inject_caller_info: false,
            timezone: "UTC".to_string(),
        }
    }
}

/// Read-only lookup of agent configuration records.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get(&self, agent_id: &str) -> Option<AgentConfig>;
}

/// In-memory store, standing in for the external agent-CRUD layer.
#[derive(Default)]
pub struct InMemoryAgentStore {
    agents: RwLock<HashMap<String, AgentConfig>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, agent: AgentConfig) {
        self.agents.write().unwrap().insert(agent.id.clone(), agent);
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn get(&self, agent_id: &str) -> Option<AgentConfig> {
        self.agents.read().unwrap().get(agent_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_roundtrips() {
        let store = InMemoryAgentStore::new();
        store.insert(AgentConfig::stub("a1"));

        let found = store.get("a1").await.unwrap();
        assert_eq!(found.initial_greeting, "Hello!");
        assert!(store.get("missing").await.is_none());
    }

    #[test]
    fn bare_prompt_when_no_dynamic_context_enabled() {
        let agent = AgentConfig::stub("a1");
        assert_eq!(agent.render_system_prompt(Some("caller-1")), agent.system_prompt);
    }

    #[test]
    fn guardrail_restricts_to_knowledge_text() {
        let mut agent = AgentConfig::stub("a1");
        agent.knowledge_text = Some("store hours are 9 to 5".into());
        agent.guardrail_knowledge_only = true;
        let rendered = agent.render_system_prompt(None);
        assert!(rendered.contains("Answer only using the following knowledge"));
        assert!(rendered.contains("store hours are 9 to 5"));
    }

    #[test]
    fn caller_info_only_injected_when_enabled_and_present() {
        let mut agent = AgentConfig::stub("a1");
        agent.inject_caller_info = true;
        assert!(!agent.render_system_prompt(None).contains("Caller id"));
        assert!(agent.render_system_prompt(Some("+15551234567")).contains("+15551234567"));

        agent.inject_caller_info = false;
        assert!(!agent.render_system_prompt(Some("+15551234567")).contains("Caller id"));
    }

    #[test]
    fn current_time_only_injected_when_enabled() {
        let mut agent = AgentConfig::stub("a1");
        assert!(!agent.render_system_prompt(None).contains("Current time"));
        agent.inject_current_time = true;
        assert!(agent.render_system_prompt(None).contains("Current time"));
    }
}
