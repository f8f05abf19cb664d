use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(node_type, entity_id)` key of a graph vertex.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), entity_id: entity_id.into() }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextNode {
    pub id: NodeId,
    pub node_type: String,
    pub entity_id: String,
    pub label: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContextNode {
    pub fn new(entity: &EntityRef, label: impl Into<String>) -> Self {
        Self {
            id: NodeId::generate(),
            node_type: entity.entity_type.clone(),
            entity_id: entity.entity_id.clone(),
            label: label.into(),
            summary: None,
            created_at: Utc::now(),
        }
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.node_type.clone(), self.entity_id.clone())
    }
}

pub mod edge_types {
    pub const REFERENCES: &str = "references";
    pub const TRIGGERED: &str = "triggered";
    pub const RESULTED_IN: &str = "resulted_in";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEdge {
    pub id: EdgeId,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub edge_type: String,
    pub reasoning: Option<String>,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

impl ContextEdge {
    /// The endpoint opposite `node`, or `None` when the edge does not touch it.
    pub fn other_end(&self, node: &NodeId) -> Option<&NodeId> {
        if &self.from_node_id == node {
            Some(&self.to_node_id)
        } else if &self.to_node_id == node {
            Some(&self.from_node_id)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceType {
    UserAction,
    AiAction,
    SystemEvent,
}

impl TraceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserAction => "user_action",
            Self::AiAction => "ai_action",
            Self::SystemEvent => "system_event",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user_action" => Some(Self::UserAction),
            "ai_action" => Some(Self::AiAction),
            "system_event" => Some(Self::SystemEvent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceInputs {
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_state: Option<String>,
}

impl TraceInputs {
    pub fn evidence<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { evidence: items.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn with_prior_state(mut self, prior_state: impl Into<String>) -> Self {
        self.prior_state = Some(prior_state.into());
        self
    }

    pub fn with_constraints<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints = Some(items.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TraceOutcome {
    pub fn success(new_state: impl Into<String>) -> Self {
        Self {
            success: true,
            new_state: Some(new_state.into()),
            side_effects: None,
            error_message: None,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            new_state: None,
            side_effects: None,
            error_message: Some(error_message.into()),
        }
    }

    pub fn with_side_effect(mut self, side_effect: impl Into<String>) -> Self {
        self.side_effects.get_or_insert_with(Vec::new).push(side_effect.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub id: TraceId,
    pub trace_type: TraceType,
    pub actor: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub context_node_id: Option<NodeId>,
    pub inputs: Option<TraceInputs>,
    pub reasoning: Option<String>,
    pub outcome: Option<TraceOutcome>,
    pub confidence: Option<u8>,
    pub reversible: bool,
    pub linked_trace_id: Option<TraceId>,
    pub created_at: DateTime<Utc>,
}

/// Everything `record_decision` accepts besides the node it resolves itself.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionRecord {
    pub trace_type: TraceType,
    pub actor: String,
    pub action: String,
    pub entity: Option<EntityRef>,
    pub entity_label: Option<String>,
    pub inputs: Option<TraceInputs>,
    pub reasoning: Option<String>,
    pub outcome: Option<TraceOutcome>,
    pub confidence: Option<u8>,
    pub reversible: bool,
    pub linked_trace_id: Option<TraceId>,
}

impl DecisionRecord {
    pub fn new(trace_type: TraceType, actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            trace_type,
            actor: actor.into(),
            action: action.into(),
            entity: None,
            entity_label: None,
            inputs: None,
            reasoning: None,
            outcome: None,
            confidence: None,
            reversible: false,
            linked_trace_id: None,
        }
    }

    pub fn entity(mut self, entity: EntityRef, label: impl Into<String>) -> Self {
        self.entity = Some(entity);
        self.entity_label = Some(label.into());
        self
    }

    pub fn inputs(mut self, inputs: TraceInputs) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn outcome(mut self, outcome: TraceOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Clamped to 0..=100.
    pub fn confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence.min(100));
        self
    }

    pub fn reversible(mut self, reversible: bool) -> Self {
        self.reversible = reversible;
        self
    }

    pub fn linked_to(mut self, trace_id: Option<TraceId>) -> Self {
        self.linked_trace_id = trace_id;
        self
    }

    pub fn into_trace(self, context_node_id: Option<NodeId>) -> DecisionTrace {
        let (entity_type, entity_id) = match self.entity {
            Some(entity) => (Some(entity.entity_type), Some(entity.entity_id)),
            None => (None, None),
        };

        DecisionTrace {
            id: TraceId::generate(),
            trace_type: self.trace_type,
            actor: self.actor,
            action: self.action,
            entity_type,
            entity_id,
            context_node_id,
            inputs: self.inputs,
            reasoning: self.reasoning,
            outcome: self.outcome,
            confidence: self.confidence,
            reversible: self.reversible,
            linked_trace_id: self.linked_trace_id,
            created_at: Utc::now(),
        }
    }
}
