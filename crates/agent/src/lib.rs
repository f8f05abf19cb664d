//! Agent orchestration for rapport.
//!
//! Producers emit typed events on the [`EventBus`]. The bus stores each
//! event and fans it out to the agents registered in the [`AgentRegistry`].
//! Agents only propose; the [`ActionWorkflow`] persists proposals and gates
//! them behind approval before the [`ActionExecutor`] runs any side effect.
//! Every significant decision is written to the [`ContextGraph`] so the
//! reasoning behind an entity's state can be reconstructed later.
//!
//! # Key Types
//!
//! - `AgentRuntime` - Wires the pieces together over one set of repositories
//! - `AgentHandler` - Contract implemented by policy modules such as `NurtureAgent`
//! - `ExecutionPolicy` - Decides whether a proposal may skip human approval
//!
//! # Safety Principle
//!
//! Agents never act directly. Nothing reaches the executor without passing
//! through the workflow state machine.

pub mod agents;
pub mod bus;
pub mod executor;
pub mod graph;
pub mod guardrails;
pub mod handler;
pub mod registry;
pub mod runtime;
pub mod workflow;

pub use agents::{NurtureAgent, NURTURE_AGENT};
pub use bus::{AgentOutcome, BusError, DispatchReport, Emitted, EventBus, HandlerStatus};
pub use executor::{ActionExecutor, ExecutionFailure, ExecutionOutcome, LoggingExecutor};
pub use graph::{ContextGraph, EntityLink, GraphError};
pub use guardrails::{ExecutionDecision, ExecutionPolicy, AUTO_APPROVER};
pub use handler::{AgentHandler, HandlerError};
pub use registry::{AgentRegistry, AgentSubscription, RegistryError};
pub use runtime::{AgentRuntime, RuntimeRepositories};
pub use workflow::{ActionWorkflow, ActionWorkflowError};
