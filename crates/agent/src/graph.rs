//! Context graph service: the single write path for causal audit data.
//!
//! Nodes are created lazily on first reference and are unique per
//! `(node_type, entity_id)`. Edges and traces are append-only. Reads never
//! create nodes.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use rapport_core::config::GraphConfig;
use rapport_core::domain::action::ActionId;
use rapport_core::domain::event::EventId;
use rapport_core::domain::graph::{
    ContextEdge, ContextNode, DecisionRecord, DecisionTrace, EdgeId, EntityRef,
};
use rapport_core::domain::person::PersonId;
use rapport_core::reasoning::{connected_nodes, ReasoningChain};
use rapport_db::{ContextGraphRepository, RepositoryError};

pub fn event_entity(id: &EventId) -> EntityRef {
    EntityRef::new("system_event", id.0.clone())
}

pub fn action_entity(id: &ActionId) -> EntityRef {
    EntityRef::new("agent_action", id.0.clone())
}

pub fn person_entity(id: &PersonId) -> EntityRef {
    EntityRef::new("person", id.0.clone())
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A directed edge request between two possibly not-yet-known entities.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityLink {
    pub from: EntityRef,
    pub from_label: String,
    pub to: EntityRef,
    pub to_label: String,
    pub edge_type: String,
    pub reasoning: Option<String>,
    pub weight: f64,
}

impl EntityLink {
    pub fn new(
        from: EntityRef,
        from_label: impl Into<String>,
        to: EntityRef,
        to_label: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            from,
            from_label: from_label.into(),
            to,
            to_label: to_label.into(),
            edge_type: edge_type.into(),
            reasoning: None,
            weight: 1.0,
        }
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

pub struct ContextGraph {
    repo: Arc<dyn ContextGraphRepository>,
    trace_limit: u32,
    max_depth: u32,
}

impl ContextGraph {
    pub fn new(repo: Arc<dyn ContextGraphRepository>, config: &GraphConfig) -> Self {
        Self { repo, trace_limit: config.trace_limit, max_depth: config.max_depth }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub async fn ensure_entity_node(
        &self,
        entity: &EntityRef,
        label: &str,
    ) -> Result<ContextNode, GraphError> {
        Ok(self.repo.get_or_create_node(&ContextNode::new(entity, label)).await?)
    }

    /// Writes an immutable trace, attaching it to the entity's node when the
    /// record names one.
    pub async fn record_decision(
        &self,
        record: DecisionRecord,
    ) -> Result<DecisionTrace, GraphError> {
        let context_node_id = match (&record.entity, &record.entity_label) {
            (Some(entity), label) => {
                let label = label.as_deref().unwrap_or(entity.entity_id.as_str());
                Some(self.ensure_entity_node(entity, label).await?.id)
            }
            (None, _) => None,
        };

        let trace = record.into_trace(context_node_id);
        self.repo.insert_trace(&trace).await?;
        Ok(trace)
    }

    pub async fn link_entities(&self, link: EntityLink) -> Result<ContextEdge, GraphError> {
        let from = self.ensure_entity_node(&link.from, &link.from_label).await?;
        let to = self.ensure_entity_node(&link.to, &link.to_label).await?;

        let edge = ContextEdge {
            id: EdgeId::generate(),
            from_node_id: from.id,
            to_node_id: to.id,
            edge_type: link.edge_type,
            reasoning: link.reasoning,
            weight: link.weight,
            created_at: Utc::now(),
        };
        self.repo.insert_edge(&edge).await?;
        Ok(edge)
    }

    pub async fn latest_trace(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<DecisionTrace>, GraphError> {
        Ok(self.repo.traces_for_entity(entity, 1).await?.into_iter().next())
    }

    /// Traces attached to the entity (most recent first, bounded) plus every
    /// node within `depth` hops. `depth` is clamped to the configured maximum.
    pub async fn get_reasoning_chain(
        &self,
        entity: &EntityRef,
        depth: u32,
    ) -> Result<ReasoningChain, GraphError> {
        let Some(root) = self.repo.node_by_entity(entity).await? else {
            return Ok(ReasoningChain::default());
        };

        let depth = depth.min(self.max_depth) as usize;
        let traces = self.repo.traces_for_entity(entity, self.trace_limit).await?;
        let connected = connected_nodes(self.repo.as_ref(), &root.id, depth).await?;

        Ok(ReasoningChain { root: Some(root), traces, connected_nodes: connected })
    }
}
