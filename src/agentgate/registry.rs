//! Process-wide agent registry.
//!
//! Maps agent names to live agent handles, preserving registration order.
//! Registration happens at startup; the registry is read-mostly afterwards,
//! so a single `RwLock` over the map plus the order list is enough.

use crate::agentgate::agent::{AgentCapability, GatewayAgent};
use crate::agentgate::error::GatewayError;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct RegistryInner {
    agents: HashMap<String, Arc<dyn GatewayAgent>>,
    /// Agent names in registration order; determines listing order and the
    /// classifier's stable tie-break sequence.
    order: Vec<String>,
}

/// Mapping from agent name to agent handle.
///
/// The registry exclusively owns each agent for its registered lifetime;
/// callers get shared handles that stay valid until unregistration.
///
/// # Example
///
/// ```rust,no_run
/// use agentgate::agent::LlmAgent;
/// use agentgate::clients::openai::OpenAiCompatClient;
/// use agentgate::registry::AgentRegistry;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let registry = AgentRegistry::new();
/// let client = Arc::new(OpenAiCompatClient::new("key", "gpt-4o-mini"));
/// registry
///     .register(Arc::new(LlmAgent::new("gmail", "Reads the mailbox", client)))
///     .await
///     .unwrap();
/// assert_eq!(registry.list().await, vec!["gmail".to_string()]);
/// # });
/// ```
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        AgentRegistry {
            inner: RwLock::new(RegistryInner {
                agents: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Register an agent under its own name.
    ///
    /// Fails if the name is empty or already present.
    pub async fn register(&self, agent: Arc<dyn GatewayAgent>) -> Result<(), GatewayError> {
        let name = agent.name().to_string();
        if name.trim().is_empty() {
            return Err(GatewayError::Config(
                "agent name must be a non-empty token".to_string(),
            ));
        }
        let mut inner = self.inner.write().await;
        if inner.agents.contains_key(&name) {
            return Err(GatewayError::Config(format!(
                "agent '{}' is already registered",
                name
            )));
        }
        inner.order.push(name.clone());
        inner.agents.insert(name, agent);
        Ok(())
    }

    /// Remove and return an agent by name.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn GatewayAgent>> {
        let mut inner = self.inner.write().await;
        inner.order.retain(|n| n != name);
        inner.agents.remove(name)
    }

    /// Borrow a registered agent handle by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn GatewayAgent>> {
        self.inner.read().await.agents.get(name).cloned()
    }

    /// Whether an agent with this name is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.agents.contains_key(name)
    }

    /// Agent names in registration order.
    pub async fn list(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Registered agent handles in registration order.
    pub async fn agents(&self) -> Vec<Arc<dyn GatewayAgent>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|name| inner.agents.get(name).cloned())
            .collect()
    }

    /// Flattened capability list, each paired with its owning agent's name.
    pub async fn all_capabilities(&self) -> Vec<(String, AgentCapability)> {
        let mut out = Vec::new();
        for agent in self.agents().await {
            for capability in agent.capabilities() {
                out.push((agent.name().to_string(), capability.clone()));
            }
        }
        out
    }

    /// Probe every agent in parallel, best-effort.
    ///
    /// A probe that panics counts as unhealthy; the agent stays registered
    /// and usable.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let agents = self.agents().await;
        let probes = agents.iter().map(|agent| {
            let agent = Arc::clone(agent);
            tokio::spawn(async move { (agent.name().to_string(), agent.health_check().await) })
        });
        let mut report = HashMap::new();
        for (agent, joined) in agents.iter().zip(join_all(probes).await) {
            match joined {
                Ok((name, healthy)) => {
                    report.insert(name, healthy);
                }
                Err(_) => {
                    report.insert(agent.name().to_string(), false);
                }
            }
        }
        report
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    /// Whether no agents are registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.order.is_empty()
    }

    /// Drop every registration. Intended for test reset.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.agents.clear();
        inner.order.clear();
    }
}
