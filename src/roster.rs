use tracing::warn;

use crate::{
    api::ApiClient,
    types::{newest_first, Agent},
};

/// Read-only listing of the provider's agents.
#[derive(Debug, Clone, Default)]
pub struct AgentRoster {
    agents: Vec<Agent>,
    banner: Option<String>,
}

impl AgentRoster {
    pub fn from_agents(agents: Vec<Agent>) -> Self {
        Self {
            agents,
            banner: None,
        }
    }

    /// Fetches the roster. A failure is kept as the banner message and leaves
    /// the roster empty.
    pub async fn load(api: &ApiClient) -> Self {
        match api.list_agents().await {
            Ok(agents) => Self::from_agents(agents),
            Err(error) => {
                warn!(%error, "failed to load agents");
                Self {
                    agents: Vec::new(),
                    banner: Some(format!("Failed to load agents: {}", error.message)),
                }
            }
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents whose name or id contains `query` (case-insensitive) and whose
    /// publication status equals `status` when given, most recently modified
    /// first.
    pub fn filtered(&self, query: &str, status: Option<&str>) -> Vec<&Agent> {
        let query = query.trim().to_lowercase();
        let status = status
            .map(|status| status.trim().to_lowercase())
            .filter(|status| !status.is_empty() && status != "all");

        let mut matches: Vec<&Agent> = self
            .agents
            .iter()
            .filter(|agent| {
                query.is_empty()
                    || agent.agent_id.to_lowercase().contains(&query)
                    || agent
                        .agent_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&query))
            })
            .filter(|agent| {
                status
                    .as_deref()
                    .map_or(true, |status| agent.publication_status() == status)
            })
            .collect();

        matches.sort_by(|a, b| {
            newest_first(a.last_modification_timestamp, b.last_modification_timestamp)
        });
        matches
    }

    pub fn find(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.agent_id == agent_id)
    }
}
