use async_trait::async_trait;
use thiserror::Error;

use rapport_core::domain::action::ActionProposal;
use rapport_core::domain::event::SystemEvent;
use rapport_db::RepositoryError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("repository failure: {0}")]
    Repository(#[from] RepositoryError),
    #[error("handler failed: {0}")]
    Failed(String),
}

/// A policy module reacting to bus events.
///
/// Handlers only propose. The bus persists the returned proposals after the
/// handler returns successfully, so a failing handler never leaves a partial
/// set of actions behind. A subject that cannot be resolved is an empty
/// result, not an error.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, event: &SystemEvent) -> Result<Vec<ActionProposal>, HandlerError>;
}
