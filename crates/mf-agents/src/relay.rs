use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Body posted to `<relay>/agents` when a worker comes up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,
    pub agent_index: usize,
    pub registered_at: DateTime<Utc>,
}

impl AgentRegistration {
    pub fn new(name: impl Into<String>, agent_index: usize) -> Self {
        Self {
            name: name.into(),
            agent_index,
            registered_at: Utc::now(),
        }
    }
}

/// Announces workers to an optional message relay.
///
/// The relay is advisory: a failed registration is logged and the worker
/// carries on.
pub struct RelayClient {
    client: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn agents_url(&self) -> String {
        format!("{}/agents", self.base_url)
    }

    /// Returns whether the relay accepted the registration.
    pub async fn register(&self, registration: &AgentRegistration) -> bool {
        let url = self.agents_url();
        match self.client.post(&url).json(registration).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(name = %registration.name, %url, "registered with relay");
                true
            }
            Ok(resp) => {
                warn!(name = %registration.name, status = %resp.status(), "relay refused registration");
                false
            }
            Err(err) => {
                warn!(name = %registration.name, error = %err, "relay unreachable");
                false
            }
        }
    }
}
