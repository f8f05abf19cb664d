use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use rapport_core::domain::action::AgentAction;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Id of whatever the side effect created, if anything.
    pub target_entity_id: Option<String>,
    pub side_effects: Vec<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionFailure {
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Side-effect port behind `execute`. Implementations must not retry on
/// their own; a failure is surfaced on the action for a human to retry.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &AgentAction,
        target_entity_id: Option<String>,
    ) -> Result<ExecutionOutcome, ExecutionFailure>;
}

/// Records the execution in the log and reports the supplied target id, or
/// a fresh one when none was given.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn execute(
        &self,
        action: &AgentAction,
        target_entity_id: Option<String>,
    ) -> Result<ExecutionOutcome, ExecutionFailure> {
        let target_entity_id = target_entity_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            event_name = "workflow.executor.logged",
            correlation_id = %action.event_id,
            action_id = %action.id.0,
            action_type = %action.action_type,
            target_entity_id = %target_entity_id,
            "action executed by logging executor"
        );

        Ok(ExecutionOutcome {
            target_entity_id: Some(target_entity_id),
            side_effects: vec![format!("logged {}", action.action_type)],
        })
    }
}
