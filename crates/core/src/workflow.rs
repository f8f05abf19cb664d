//! Agent Action Workflow Engine
//!
//! Deterministic state machine for agent-proposed actions:
//!
//! ```text
//! proposed ──approve──▶ approved ──execute──▶ executed
//!     │                    │
//!     └──reject──▶ rejected
//! ```
//!
//! `approved` and `rejected` may be reverted to `proposed` by an undo issued
//! within the configured window after resolution. Every accepted transition
//! bumps `state_version`, which persistence uses as its compare-and-set token.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::action::{ActionId, ActionProposal, ActionStatus, AgentAction};
use crate::domain::event::EventId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// How long after approve/reject an undo is still accepted
    pub undo_window_seconds: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { undo_window_seconds: 30 }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid action transition from {from} to {to}: {reason}")]
    InvalidTransition { from: ActionStatus, to: ActionStatus, reason: String },
    #[error(
        "undo window of {window_seconds}s for action {action_id} expired \
         (resolved at {resolved_at})"
    )]
    UndoWindowExpired { action_id: ActionId, resolved_at: DateTime<Utc>, window_seconds: i64 },
    #[error("approver identity is required")]
    MissingApprover,
}

/// Audit-friendly description of one accepted transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionTransition {
    pub action_id: ActionId,
    pub from_status: Option<ActionStatus>,
    pub to_status: ActionStatus,
    pub reason: &'static str,
    pub actor: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransitionResult {
    pub action: AgentAction,
    pub transition: ActionTransition,
}

#[derive(Clone, Debug, Default)]
pub struct ActionWorkflowEngine {
    config: WorkflowConfig,
}

impl ActionWorkflowEngine {
    pub fn new() -> Self {
        Self::with_config(WorkflowConfig::default())
    }

    pub fn with_config(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Creates the initial `proposed` action for a handler proposal.
    pub fn propose(
        &self,
        event_id: EventId,
        agent_name: impl Into<String>,
        proposal: ActionProposal,
    ) -> TransitionResult {
        let now = Utc::now();
        let agent_name = agent_name.into();

        let action = AgentAction {
            id: ActionId::generate(),
            event_id,
            agent_name: agent_name.clone(),
            action_type: proposal.action_type,
            person_id: proposal.person_id,
            target_entity: proposal.target_entity,
            proposed_content: proposal.proposed_content,
            risk_level: proposal.risk_level,
            reasoning: proposal.reasoning,
            status: ActionStatus::Proposed,
            approved_by: None,
            approved_at: None,
            rejected_at: None,
            executed_at: None,
            target_entity_id: None,
            error_message: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        };

        let transition = ActionTransition {
            action_id: action.id.clone(),
            from_status: None,
            to_status: ActionStatus::Proposed,
            reason: "action_proposed",
            actor: format!("ai:{agent_name}"),
            state_version: action.state_version,
            occurred_at: now,
        };

        TransitionResult { action, transition }
    }

    /// Transitions `proposed -> approved`, stamping approver and time together.
    pub fn approve(
        &self,
        mut action: AgentAction,
        approver_id: impl Into<String>,
    ) -> Result<TransitionResult, WorkflowError> {
        let approver_id = approver_id.into();
        if approver_id.trim().is_empty() {
            return Err(WorkflowError::MissingApprover);
        }
        self.validate_transition(&action, ActionStatus::Approved)?;

        let now = Utc::now();
        let from = action.status;
        action.status = ActionStatus::Approved;
        action.approved_by = Some(approver_id.clone());
        action.approved_at = Some(now);
        Self::bump(&mut action, now);

        Ok(Self::result(action, from, "action_approved", approver_id, now))
    }

    /// Transitions `proposed -> rejected`.
    pub fn reject(
        &self,
        mut action: AgentAction,
        actor: impl Into<String>,
    ) -> Result<TransitionResult, WorkflowError> {
        self.validate_transition(&action, ActionStatus::Rejected)?;

        let now = Utc::now();
        let from = action.status;
        action.status = ActionStatus::Rejected;
        action.rejected_at = Some(now);
        Self::bump(&mut action, now);

        Ok(Self::result(action, from, "action_rejected", actor.into(), now))
    }

    /// Reserves an approved action for execution without changing its status.
    ///
    /// The version bump makes a concurrent second claim lose its
    /// compare-and-set, so the side effect runs at most once per claim.
    pub fn claim_execution(&self, mut action: AgentAction) -> Result<AgentAction, WorkflowError> {
        self.validate_transition(&action, ActionStatus::Executed)?;
        Self::bump(&mut action, Utc::now());
        Ok(action)
    }

    /// Transitions `approved -> executed` after the side effect succeeded.
    pub fn complete_execution(
        &self,
        mut action: AgentAction,
        target_entity_id: Option<String>,
        actor: impl Into<String>,
    ) -> Result<TransitionResult, WorkflowError> {
        self.validate_transition(&action, ActionStatus::Executed)?;

        let now = Utc::now();
        let from = action.status;
        action.status = ActionStatus::Executed;
        action.executed_at = Some(now);
        action.target_entity_id = target_entity_id;
        action.error_message = None;
        Self::bump(&mut action, now);

        Ok(Self::result(action, from, "action_executed", actor.into(), now))
    }

    /// Records a failed side effect. The action stays `approved` so a human can retry.
    pub fn fail_execution(
        &self,
        mut action: AgentAction,
        error: impl Into<String>,
        actor: impl Into<String>,
    ) -> Result<TransitionResult, WorkflowError> {
        if action.status != ActionStatus::Approved {
            return Err(WorkflowError::InvalidTransition {
                from: action.status,
                to: ActionStatus::Approved,
                reason: "only approved actions can record execution failures".to_string(),
            });
        }

        let now = Utc::now();
        action.error_message = Some(error.into());
        Self::bump(&mut action, now);

        Ok(Self::result(
            action,
            ActionStatus::Approved,
            "action_execution_failed",
            actor.into(),
            now,
        ))
    }

    /// Reverts `approved`/`rejected` to `proposed` if `reference_time` falls
    /// inside the undo window, clearing every resolution field.
    pub fn undo(
        &self,
        mut action: AgentAction,
        actor: impl Into<String>,
        reference_time: DateTime<Utc>,
    ) -> Result<TransitionResult, WorkflowError> {
        let resolved_at = match (action.status, action.resolved_at()) {
            (ActionStatus::Approved | ActionStatus::Rejected, Some(resolved_at)) => resolved_at,
            (status, _) => {
                return Err(WorkflowError::InvalidTransition {
                    from: status,
                    to: ActionStatus::Proposed,
                    reason: match status {
                        ActionStatus::Executed => "executed actions cannot be undone".to_string(),
                        ActionStatus::Proposed => "action has not been resolved".to_string(),
                        _ => "resolution timestamp is missing".to_string(),
                    },
                });
            }
        };

        let deadline = resolved_at + Duration::seconds(self.config.undo_window_seconds);
        if reference_time > deadline {
            return Err(WorkflowError::UndoWindowExpired {
                action_id: action.id.clone(),
                resolved_at,
                window_seconds: self.config.undo_window_seconds,
            });
        }

        let from = action.status;
        action.status = ActionStatus::Proposed;
        action.approved_by = None;
        action.approved_at = None;
        action.rejected_at = None;
        action.error_message = None;
        Self::bump(&mut action, reference_time);

        Ok(Self::result(action, from, "action_undone", actor.into(), reference_time))
    }

    fn validate_transition(
        &self,
        action: &AgentAction,
        to_status: ActionStatus,
    ) -> Result<(), WorkflowError> {
        let valid = matches!(
            (action.status, to_status),
            (ActionStatus::Proposed, ActionStatus::Approved)
                | (ActionStatus::Proposed, ActionStatus::Rejected)
                | (ActionStatus::Approved, ActionStatus::Executed)
        );

        if valid {
            return Ok(());
        }

        let reason = match (action.status, to_status) {
            (from, to) if from == to => format!("action already {from}"),
            (ActionStatus::Proposed, ActionStatus::Executed) => {
                "action must be approved before execution".to_string()
            }
            (from, _) if from.is_terminal() => format!("action is {from}, which is terminal"),
            (from, to) => format!("cannot transition from {from} to {to}"),
        };

        Err(WorkflowError::InvalidTransition { from: action.status, to: to_status, reason })
    }

    fn bump(action: &mut AgentAction, now: DateTime<Utc>) {
        action.state_version += 1;
        action.updated_at = now;
    }

    fn result(
        action: AgentAction,
        from: ActionStatus,
        reason: &'static str,
        actor: String,
        occurred_at: DateTime<Utc>,
    ) -> TransitionResult {
        let transition = ActionTransition {
            action_id: action.id.clone(),
            from_status: Some(from),
            to_status: action.status,
            reason,
            actor,
            state_version: action.state_version,
            occurred_at,
        };
        TransitionResult { action, transition }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::RiskLevel;
    use crate::domain::person::PersonId;

    fn proposal() -> ActionProposal {
        ActionProposal {
            action_type: "suggest_call".to_string(),
            person_id: Some(PersonId("p-1".to_string())),
            target_entity: Some("person".to_string()),
            proposed_content: serde_json::json!({ "channel": "call" }),
            risk_level: RiskLevel::Medium,
            reasoning: "Ada is 40 days overdue".to_string(),
            confidence: Some(80),
        }
    }

    fn proposed() -> AgentAction {
        ActionWorkflowEngine::new()
            .propose(EventId("evt-1".to_string()), "nurture_agent", proposal())
            .action
    }

    #[test]
    fn propose_initializes_proposed_state() {
        let result = ActionWorkflowEngine::new().propose(
            EventId("evt-1".to_string()),
            "nurture_agent",
            proposal(),
        );

        assert_eq!(result.action.status, ActionStatus::Proposed);
        assert_eq!(result.action.event_id, EventId("evt-1".to_string()));
        assert_eq!(result.action.state_version, 1);
        assert_eq!(result.transition.from_status, None);
        assert_eq!(result.transition.actor, "ai:nurture_agent");
    }

    #[test]
    fn approve_sets_approver_and_timestamp_together() {
        let engine = ActionWorkflowEngine::new();
        let approved = engine.approve(proposed(), "user-7").unwrap();

        assert_eq!(approved.action.status, ActionStatus::Approved);
        assert_eq!(approved.action.approved_by.as_deref(), Some("user-7"));
        assert!(approved.action.approved_at.is_some());
        assert_eq!(approved.action.state_version, 2);
        assert_eq!(approved.transition.from_status, Some(ActionStatus::Proposed));
    }

    #[test]
    fn approve_twice_is_rejected() {
        let engine = ActionWorkflowEngine::new();
        let approved = engine.approve(proposed(), "user-7").unwrap();
        let second = engine.approve(approved.action, "user-8");

        assert!(matches!(
            second,
            Err(WorkflowError::InvalidTransition {
                from: ActionStatus::Approved,
                to: ActionStatus::Approved,
                ..
            })
        ));
    }

    #[test]
    fn approve_requires_approver_identity() {
        let result = ActionWorkflowEngine::new().approve(proposed(), "  ");
        assert_eq!(result.unwrap_err(), WorkflowError::MissingApprover);
    }

    #[test]
    fn execute_from_proposed_is_rejected() {
        let engine = ActionWorkflowEngine::new();
        let claim = engine.claim_execution(proposed());

        assert!(matches!(
            claim,
            Err(WorkflowError::InvalidTransition { ref reason, .. })
                if reason == "action must be approved before execution"
        ));
    }

    #[test]
    fn execution_completes_from_approved() {
        let engine = ActionWorkflowEngine::new();
        let approved = engine.approve(proposed(), "user-7").unwrap();
        let claimed = engine.claim_execution(approved.action).unwrap();
        assert_eq!(claimed.status, ActionStatus::Approved);
        assert_eq!(claimed.state_version, 3);

        let executed =
            engine.complete_execution(claimed, Some("task-9".to_string()), "system").unwrap();
        assert_eq!(executed.action.status, ActionStatus::Executed);
        assert!(executed.action.executed_at.is_some());
        assert_eq!(executed.action.target_entity_id.as_deref(), Some("task-9"));
    }

    #[test]
    fn failed_execution_keeps_action_approved_with_error() {
        let engine = ActionWorkflowEngine::new();
        let approved = engine.approve(proposed(), "user-7").unwrap();
        let failed = engine.fail_execution(approved.action, "smtp unavailable", "system").unwrap();

        assert_eq!(failed.action.status, ActionStatus::Approved);
        assert_eq!(failed.action.error_message.as_deref(), Some("smtp unavailable"));
        assert!(failed.action.executed_at.is_none());

        let retried = engine.complete_execution(failed.action, None, "system").unwrap();
        assert_eq!(retried.action.error_message, None);
    }

    #[test]
    fn reject_is_terminal_for_approval() {
        let engine = ActionWorkflowEngine::new();
        let rejected = engine.reject(proposed(), "user-7").unwrap();
        assert_eq!(rejected.action.status, ActionStatus::Rejected);
        assert!(rejected.action.rejected_at.is_some());

        assert!(engine.approve(rejected.action, "user-7").is_err());
    }

    #[test]
    fn undo_within_window_reverts_approval() {
        let engine = ActionWorkflowEngine::new();
        let approved = engine.approve(proposed(), "user-7").unwrap();
        let approved_at = approved.action.approved_at.unwrap();

        let undone =
            engine.undo(approved.action, "user-7", approved_at + Duration::seconds(10)).unwrap();

        assert_eq!(undone.action.status, ActionStatus::Proposed);
        assert_eq!(undone.action.approved_by, None);
        assert_eq!(undone.action.approved_at, None);
        assert_eq!(undone.transition.from_status, Some(ActionStatus::Approved));
    }

    #[test]
    fn undo_after_window_is_rejected() {
        let engine = ActionWorkflowEngine::new();
        let rejected = engine.reject(proposed(), "user-7").unwrap();
        let rejected_at = rejected.action.rejected_at.unwrap();

        let result = engine.undo(rejected.action, "user-7", rejected_at + Duration::seconds(31));
        assert!(matches!(result, Err(WorkflowError::UndoWindowExpired { window_seconds: 30, .. })));
    }

    #[test]
    fn undo_of_executed_action_is_rejected() {
        let engine = ActionWorkflowEngine::new();
        let approved = engine.approve(proposed(), "user-7").unwrap();
        let executed = engine.complete_execution(approved.action, None, "system").unwrap();

        let result = engine.undo(executed.action, "user-7", Utc::now());
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidTransition { from: ActionStatus::Executed, .. })
        ));
    }

    #[test]
    fn undo_window_is_configurable() {
        let engine = ActionWorkflowEngine::with_config(WorkflowConfig { undo_window_seconds: 120 });
        let approved = engine.approve(proposed(), "user-7").unwrap();
        let approved_at = approved.action.approved_at.unwrap();

        let late = approved_at + Duration::seconds(90);
        assert!(engine.undo(approved.action, "user-7", late).is_ok());
    }
}
