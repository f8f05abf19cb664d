pub mod config;
pub mod domain;
pub mod errors;
pub mod reasoning;
pub mod workflow;

pub use chrono;

pub use domain::action::{ActionId, ActionProposal, ActionStatus, AgentAction, RiskLevel};
pub use domain::event::{
    EventCategory, EventId, EventPayload, EventType, SourceEntity, SystemEvent,
};
pub use domain::graph::{
    ContextEdge, ContextNode, DecisionRecord, DecisionTrace, EntityRef, NodeId, TraceId,
    TraceInputs, TraceOutcome, TraceType,
};
pub use domain::person::{Person, PersonId, Segment};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use reasoning::{ConnectedNode, GraphReader, ReasoningChain};
pub use workflow::{
    ActionTransition, ActionWorkflowEngine, TransitionResult, WorkflowConfig, WorkflowError,
};
