use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use rapport_core::domain::event::EventType;

use crate::handler::AgentHandler;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent name must not be empty")]
    EmptyAgentName,
    #[error("agent `{agent_name}` must subscribe to at least one event type")]
    NoEventTypes { agent_name: String },
    #[error("agent `{agent_name}` subscribed to unknown event type `{event_type}`")]
    UnknownEventType { agent_name: String, event_type: String },
}

#[derive(Clone)]
pub struct AgentSubscription {
    pub agent_name: String,
    pub event_types: BTreeSet<EventType>,
    pub handler: Arc<dyn AgentHandler>,
}

impl std::fmt::Debug for AgentSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSubscription")
            .field("agent_name", &self.agent_name)
            .field("event_types", &self.event_types)
            .finish_non_exhaustive()
    }
}

/// Subscriptions keyed by agent name. Registering a name again replaces the
/// previous subscription.
#[derive(Default)]
pub struct AgentRegistry {
    subscriptions: RwLock<BTreeMap<String, AgentSubscription>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_agent<I>(
        &self,
        agent_name: &str,
        event_types: I,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = EventType>,
    {
        let agent_name = agent_name.trim();
        if agent_name.is_empty() {
            return Err(RegistryError::EmptyAgentName);
        }

        let event_types = event_types.into_iter().collect::<BTreeSet<_>>();
        if event_types.is_empty() {
            return Err(RegistryError::NoEventTypes { agent_name: agent_name.to_string() });
        }

        let subscribed = event_types.iter().map(EventType::as_str).collect::<Vec<_>>().join(",");
        let replaced = self
            .subscriptions
            .write()
            .await
            .insert(
                agent_name.to_string(),
                AgentSubscription { agent_name: agent_name.to_string(), event_types, handler },
            )
            .is_some();

        info!(
            event_name = "registry.agent.registered",
            correlation_id = "startup",
            agent_name,
            event_types = %subscribed,
            replaced,
            "agent subscription registered"
        );

        Ok(())
    }

    /// Same as [`AgentRegistry::register_agent`] for wire type names, failing
    /// on the first name that is not a known event type.
    pub async fn register_agent_by_names(
        &self,
        agent_name: &str,
        event_types: &[&str],
        handler: Arc<dyn AgentHandler>,
    ) -> Result<(), RegistryError> {
        let parsed = event_types
            .iter()
            .map(|name| {
                EventType::parse(name).ok_or_else(|| RegistryError::UnknownEventType {
                    agent_name: agent_name.trim().to_string(),
                    event_type: (*name).to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.register_agent(agent_name, parsed, handler).await
    }

    /// Subscriptions for `event_type`, in agent-name order.
    pub async fn subscribers(&self, event_type: EventType) -> Vec<AgentSubscription> {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|subscription| subscription.event_types.contains(&event_type))
            .cloned()
            .collect()
    }

    pub async fn agents(&self) -> Vec<String> {
        self.subscriptions.read().await.keys().cloned().collect()
    }
}
