//! Persistent side of the action workflow.
//!
//! Every transition is computed by [`ActionWorkflowEngine`] and applied with a
//! compare-and-set on `state_version`, so a racing caller loses with
//! [`ActionWorkflowError::Conflict`] instead of overwriting state. Each
//! accepted transition is mirrored into the context graph as one decision
//! trace, chained to the previous trace of the same action. Graph writes are
//! best-effort and never fail the transition.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use rapport_core::config::WorkflowSettings;
use rapport_core::domain::action::{ActionId, ActionProposal, ActionStatus, AgentAction};
use rapport_core::domain::event::{EventId, SystemEvent};
use rapport_core::domain::graph::{
    edge_types, DecisionRecord, EntityRef, TraceId, TraceInputs, TraceOutcome, TraceType,
};
use rapport_core::errors::{ApplicationError, DomainError};
use rapport_core::workflow::{ActionWorkflowEngine, TransitionResult, WorkflowError};
use rapport_db::{ActionRepository, RepositoryError};

use crate::executor::ActionExecutor;
use crate::graph::{action_entity, event_entity, person_entity, ContextGraph, EntityLink};
use crate::guardrails::{ExecutionDecision, ExecutionPolicy, AUTO_APPROVER};

#[derive(Debug, Error)]
pub enum ActionWorkflowError {
    #[error("action {0} not found")]
    NotFound(ActionId),
    #[error(transparent)]
    Transition(#[from] WorkflowError),
    #[error("action {0} was modified concurrently")]
    Conflict(ActionId),
    #[error("execution of action {action_id} failed: {message}")]
    ExecutionFailed { action_id: ActionId, message: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ActionWorkflowError {
    pub fn into_application(self) -> ApplicationError {
        match self {
            Self::NotFound(id) => ApplicationError::NotFound(format!("action {id}")),
            Self::Transition(error) => ApplicationError::Domain(DomainError::Workflow(error)),
            Self::Conflict(id) => ApplicationError::Conflict(format!("action {id}")),
            Self::ExecutionFailed { action_id, message } => {
                ApplicationError::Integration(format!("action {action_id}: {message}"))
            }
            Self::Repository(error) => ApplicationError::Persistence(error.to_string()),
        }
    }
}

pub struct ActionWorkflow {
    actions: Arc<dyn ActionRepository>,
    graph: Arc<ContextGraph>,
    executor: Arc<dyn ActionExecutor>,
    engine: ActionWorkflowEngine,
    policy: ExecutionPolicy,
    in_flight: Mutex<HashSet<ActionId>>,
}

impl ActionWorkflow {
    pub fn new(
        actions: Arc<dyn ActionRepository>,
        graph: Arc<ContextGraph>,
        executor: Arc<dyn ActionExecutor>,
        settings: &WorkflowSettings,
    ) -> Self {
        Self {
            actions,
            graph,
            executor,
            engine: ActionWorkflowEngine::with_config(settings.engine_config()),
            policy: ExecutionPolicy::from_settings(settings),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub async fn get(&self, id: &ActionId) -> Result<Option<AgentAction>, ActionWorkflowError> {
        Ok(self.actions.find_by_id(id).await?)
    }

    /// Proposed actions, most recent first.
    pub async fn list_pending(&self, limit: u32) -> Result<Vec<AgentAction>, ActionWorkflowError> {
        Ok(self.actions.list_by_status(ActionStatus::Proposed, limit).await?)
    }

    pub async fn list_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<AgentAction>, ActionWorkflowError> {
        Ok(self.actions.list_for_event(event_id).await?)
    }

    /// Persists a handler proposal as a `proposed` action owned by `event`.
    ///
    /// When the execution policy allows it, the action is approved by
    /// [`AUTO_APPROVER`] and executed right away. A failing auto-execution
    /// leaves the action `approved` with its error recorded and is not
    /// reported as a propose failure.
    pub async fn propose(
        &self,
        event: &SystemEvent,
        agent_name: &str,
        proposal: ActionProposal,
    ) -> Result<AgentAction, ActionWorkflowError> {
        let confidence = proposal.confidence;
        let TransitionResult { action, transition } =
            self.engine.propose(event.id.clone(), agent_name, proposal);
        self.actions.insert(&action).await?;

        info!(
            event_name = "workflow.action.proposed",
            correlation_id = %event.id,
            action_id = %action.id,
            agent_name,
            action_type = %action.action_type,
            risk_level = action.risk_level.as_str(),
            "agent action proposed"
        );

        let arrival = self.latest_trace_id(&event_entity(&event.id)).await;
        let mut record = DecisionRecord::new(TraceType::AiAction, transition.actor, "propose")
            .inputs(TraceInputs::evidence([
                format!("event:{}", event.id),
                format!("event_type:{}", event.event_type),
            ]))
            .reasoning(action.reasoning.clone())
            .outcome(TraceOutcome::success(ActionStatus::Proposed.as_str()))
            .reversible(false)
            .linked_to(arrival);
        if let Some(confidence) = confidence {
            record = record.confidence(confidence);
        }
        self.write_trace(&action, record).await;

        self.write_link(
            EntityLink::new(
                event_entity(&event.id),
                event.event_type.as_str(),
                action_entity(&action.id),
                action.action_type.clone(),
                edge_types::TRIGGERED,
            )
            .reasoning(format!("{agent_name} proposed {}", action.action_type)),
        )
        .await;
        if let Some(person_id) = &action.person_id {
            self.write_link(EntityLink::new(
                action_entity(&action.id),
                action.action_type.clone(),
                person_entity(person_id),
                person_id.0.clone(),
                edge_types::REFERENCES,
            ))
            .await;
        }

        match self.policy.evaluate(&action) {
            ExecutionDecision::AutoExecute { reason_code } => {
                Ok(self.auto_execute(action, reason_code).await)
            }
            ExecutionDecision::RequireApproval { .. } => Ok(action),
        }
    }

    /// `proposed -> approved`. Approving twice is rejected without change.
    pub async fn approve(
        &self,
        id: &ActionId,
        approver_id: &str,
    ) -> Result<AgentAction, ActionWorkflowError> {
        let current = self.load(id).await?;
        let expected = current.state_version;
        let TransitionResult { action, transition } = self.engine.approve(current, approver_id)?;
        self.persist(expected, &action).await?;

        info!(
            event_name = "workflow.action.approved",
            correlation_id = %action.event_id,
            action_id = %action.id,
            approver = %transition.actor,
            state_version = action.state_version,
            "agent action approved"
        );

        let record = DecisionRecord::new(actor_trace_type(approver_id), approver_id, "approve")
            .inputs(
                TraceInputs::evidence([format!("risk_level:{}", action.risk_level.as_str())])
                    .with_prior_state(ActionStatus::Proposed.as_str()),
            )
            .outcome(TraceOutcome::success(ActionStatus::Approved.as_str()))
            .reversible(true);
        self.write_chained_trace(&action, record).await;

        Ok(action)
    }

    /// `proposed -> rejected`.
    pub async fn reject(
        &self,
        id: &ActionId,
        actor: &str,
    ) -> Result<AgentAction, ActionWorkflowError> {
        let current = self.load(id).await?;
        let expected = current.state_version;
        let TransitionResult { action, .. } = self.engine.reject(current, actor)?;
        self.persist(expected, &action).await?;

        info!(
            event_name = "workflow.action.rejected",
            correlation_id = %action.event_id,
            action_id = %action.id,
            actor,
            state_version = action.state_version,
            "agent action rejected"
        );

        let record = DecisionRecord::new(actor_trace_type(actor), actor, "reject")
            .inputs(TraceInputs::default().with_prior_state(ActionStatus::Proposed.as_str()))
            .outcome(TraceOutcome::success(ActionStatus::Rejected.as_str()))
            .reversible(true);
        self.write_chained_trace(&action, record).await;

        Ok(action)
    }

    /// `approved -> executed` through the executor port.
    ///
    /// The action is claimed first, so at most one caller runs the side
    /// effect; every other concurrent `execute` or `undo` gets `Conflict`
    /// until the side effect has settled. A failing side
    /// effect leaves the action `approved` with `error_message` set and is
    /// never retried here.
    pub async fn execute(
        &self,
        id: &ActionId,
        target_entity_id: Option<String>,
    ) -> Result<AgentAction, ActionWorkflowError> {
        let _claim = self.claim_in_flight(id)?;

        let current = self.load(id).await?;
        let expected = current.state_version;
        let claimed = self.engine.claim_execution(current)?;
        self.persist(expected, &claimed).await?;

        let actor = format!("ai:{}", claimed.agent_name);
        match self.executor.execute(&claimed, target_entity_id).await {
            Ok(outcome) => {
                let TransitionResult { action, .. } = self.engine.complete_execution(
                    claimed.clone(),
                    outcome.target_entity_id,
                    actor.as_str(),
                )?;
                self.persist(claimed.state_version, &action).await?;

                info!(
                    event_name = "workflow.action.executed",
                    correlation_id = %action.event_id,
                    action_id = %action.id,
                    target_entity_id = action.target_entity_id.as_deref().unwrap_or(""),
                    state_version = action.state_version,
                    "agent action executed"
                );

                let mut result = TraceOutcome::success(ActionStatus::Executed.as_str());
                for side_effect in outcome.side_effects {
                    result = result.with_side_effect(side_effect);
                }
                let evidence =
                    action.approved_by.iter().map(|approver| format!("approved_by:{approver}"));
                let record = DecisionRecord::new(TraceType::AiAction, actor, "execute")
                    .inputs(
                        TraceInputs::evidence(evidence)
                            .with_prior_state(ActionStatus::Approved.as_str()),
                    )
                    .outcome(result)
                    .reversible(false);
                self.write_chained_trace(&action, record).await;

                Ok(action)
            }
            Err(failure) => {
                let TransitionResult { action, .. } = self.engine.fail_execution(
                    claimed.clone(),
                    failure.message.clone(),
                    actor.as_str(),
                )?;
                self.persist(claimed.state_version, &action).await?;

                warn!(
                    event_name = "workflow.action.execution_failed",
                    correlation_id = %action.event_id,
                    action_id = %action.id,
                    error = %failure,
                    "agent action execution failed; action stays approved"
                );

                let record = DecisionRecord::new(TraceType::AiAction, actor, "execute")
                    .inputs(
                        TraceInputs::default().with_prior_state(ActionStatus::Approved.as_str()),
                    )
                    .outcome(TraceOutcome::failure(failure.message.clone()))
                    .reversible(false);
                self.write_chained_trace(&action, record).await;

                Err(ActionWorkflowError::ExecutionFailed {
                    action_id: action.id,
                    message: failure.message,
                })
            }
        }
    }

    /// Reverts `approved`/`rejected` to `proposed` within the undo window.
    /// An action whose execution is in flight cannot be undone.
    pub async fn undo(
        &self,
        id: &ActionId,
        actor: &str,
    ) -> Result<AgentAction, ActionWorkflowError> {
        let _claim = self.claim_in_flight(id)?;

        let current = self.load(id).await?;
        let expected = current.state_version;
        let prior_state = current.status;
        let TransitionResult { action, .. } = self.engine.undo(current, actor, Utc::now())?;
        self.persist(expected, &action).await?;

        info!(
            event_name = "workflow.action.undone",
            correlation_id = %action.event_id,
            action_id = %action.id,
            actor,
            prior_state = prior_state.as_str(),
            state_version = action.state_version,
            "agent action resolution undone"
        );

        let record = DecisionRecord::new(actor_trace_type(actor), actor, "undo")
            .inputs(TraceInputs::default().with_prior_state(prior_state.as_str()))
            .outcome(TraceOutcome::success(ActionStatus::Proposed.as_str()))
            .reversible(false);
        self.write_chained_trace(&action, record).await;

        Ok(action)
    }

    async fn auto_execute(&self, action: AgentAction, reason_code: &'static str) -> AgentAction {
        info!(
            event_name = "workflow.action.auto_execute",
            correlation_id = %action.event_id,
            action_id = %action.id,
            reason_code,
            "policy allows execution without human approval"
        );

        let outcome = match self.approve(&action.id, AUTO_APPROVER).await {
            Ok(_) => self.execute(&action.id, None).await,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(executed) => executed,
            Err(error) => {
                warn!(
                    event_name = "workflow.action.auto_execute_failed",
                    correlation_id = %action.event_id,
                    action_id = %action.id,
                    error = %error,
                    "automatic execution did not complete"
                );
                match self.actions.find_by_id(&action.id).await {
                    Ok(Some(latest)) => latest,
                    _ => action,
                }
            }
        }
    }

    async fn load(&self, id: &ActionId) -> Result<AgentAction, ActionWorkflowError> {
        self.actions
            .find_by_id(id)
            .await?
            .ok_or_else(|| ActionWorkflowError::NotFound(id.clone()))
    }

    async fn persist(
        &self,
        expected_version: u32,
        action: &AgentAction,
    ) -> Result<(), ActionWorkflowError> {
        if self.actions.compare_and_swap(expected_version, action).await? {
            Ok(())
        } else {
            Err(ActionWorkflowError::Conflict(action.id.clone()))
        }
    }

    fn claim_in_flight(&self, id: &ActionId) -> Result<InFlightClaim<'_>, ActionWorkflowError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(id.clone()) {
            return Err(ActionWorkflowError::Conflict(id.clone()));
        }
        Ok(InFlightClaim { set: &self.in_flight, id: id.clone() })
    }

    async fn latest_trace_id(&self, entity: &EntityRef) -> Option<TraceId> {
        match self.graph.latest_trace(entity).await {
            Ok(trace) => trace.map(|trace| trace.id),
            Err(error) => {
                warn!(
                    event_name = "graph.read.failed",
                    correlation_id = "workflow",
                    entity = %entity,
                    error = %error,
                    "could not resolve previous decision trace"
                );
                None
            }
        }
    }

    async fn write_chained_trace(&self, action: &AgentAction, record: DecisionRecord) {
        let previous = self.latest_trace_id(&action_entity(&action.id)).await;
        self.write_trace(action, record.linked_to(previous)).await;
    }

    async fn write_trace(&self, action: &AgentAction, record: DecisionRecord) {
        let record = record.entity(action_entity(&action.id), action.action_type.clone());
        let verb = record.action.clone();
        if let Err(error) = self.graph.record_decision(record).await {
            warn!(
                event_name = "graph.write.failed",
                correlation_id = %action.event_id,
                action_id = %action.id,
                trace_action = %verb,
                error = %error,
                "decision trace write failed"
            );
        }
    }

    async fn write_link(&self, link: EntityLink) {
        let (from, to) = (link.from.clone(), link.to.clone());
        if let Err(error) = self.graph.link_entities(link).await {
            warn!(
                event_name = "graph.write.failed",
                correlation_id = "workflow",
                from = %from,
                to = %to,
                error = %error,
                "context edge write failed"
            );
        }
    }
}

/// Releases the in-process execute/undo claim on drop.
struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<ActionId>>,
    id: ActionId,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

fn actor_trace_type(actor: &str) -> TraceType {
    if actor.starts_with("system:") {
        TraceType::SystemEvent
    } else if actor.starts_with("ai:") {
        TraceType::AiAction
    } else {
        TraceType::UserAction
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use rapport_core::config::{GraphConfig, WorkflowSettings};
    use rapport_core::domain::action::{ActionProposal, ActionStatus, AgentAction, RiskLevel};
    use rapport_core::domain::event::{ContactDuePayload, EventPayload, SourceEntity, SystemEvent};
    use rapport_core::domain::graph::TraceType;
    use rapport_core::domain::person::PersonId;
    use rapport_core::workflow::WorkflowError;
    use rapport_db::repositories::{InMemoryActionRepository, InMemoryContextGraphRepository};
    use rapport_db::ContextGraphRepository;

    use super::{ActionWorkflow, ActionWorkflowError};
    use crate::executor::{ActionExecutor, ExecutionFailure, ExecutionOutcome, LoggingExecutor};
    use crate::graph::{action_entity, ContextGraph};
    use crate::guardrails::AUTO_APPROVER;

    struct Harness {
        workflow: ActionWorkflow,
        graph_repo: Arc<InMemoryContextGraphRepository>,
    }

    fn harness(executor: Arc<dyn ActionExecutor>, settings: WorkflowSettings) -> Harness {
        let graph_repo = Arc::new(InMemoryContextGraphRepository::default());
        let graph = Arc::new(ContextGraph::new(
            graph_repo.clone(),
            &GraphConfig { trace_limit: 50, default_depth: 2, max_depth: 5 },
        ));
        let workflow = ActionWorkflow::new(
            Arc::new(InMemoryActionRepository::default()),
            graph,
            executor,
            &settings,
        );
        Harness { workflow, graph_repo }
    }

    fn default_harness() -> Harness {
        harness(
            Arc::new(LoggingExecutor),
            WorkflowSettings { undo_window_secs: 30, auto_execute_low_risk: false },
        )
    }

    fn event() -> SystemEvent {
        SystemEvent::new(
            EventPayload::ContactDue(ContactDuePayload {
                due_reason: "monthly cadence".to_string(),
                days_since_contact: 70,
                days_overdue: 40,
            }),
            SourceEntity::new("cadence_scheduler", "daily"),
            Some(PersonId("p-ada".to_string())),
        )
        .expect("valid event")
    }

    fn proposal(risk_level: RiskLevel) -> ActionProposal {
        ActionProposal {
            action_type: "suggest_call".to_string(),
            person_id: Some(PersonId("p-ada".to_string())),
            target_entity: Some("person".to_string()),
            proposed_content: serde_json::json!({ "channel": "call", "personName": "Ada" }),
            risk_level,
            reasoning: "Ada is 40 days overdue".to_string(),
            confidence: Some(80),
        }
    }

    async fn proposed(harness: &Harness) -> AgentAction {
        harness
            .workflow
            .propose(&event(), "nurture_agent", proposal(RiskLevel::Medium))
            .await
            .expect("propose")
    }

    async fn trace_verbs(harness: &Harness, action: &AgentAction) -> Vec<String> {
        let mut traces = harness
            .graph_repo
            .traces_for_entity(&action_entity(&action.id), 50)
            .await
            .expect("traces");
        traces.reverse();
        traces.into_iter().map(|trace| trace.action).collect()
    }

    struct FailingExecutor;

    #[async_trait]
    impl ActionExecutor for FailingExecutor {
        async fn execute(
            &self,
            _action: &AgentAction,
            _target_entity_id: Option<String>,
        ) -> Result<ExecutionOutcome, ExecutionFailure> {
            Err(ExecutionFailure::new("mail provider unavailable"))
        }
    }

    #[derive(Default)]
    struct SlowCountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionExecutor for SlowCountingExecutor {
        async fn execute(
            &self,
            _action: &AgentAction,
            target_entity_id: Option<String>,
        ) -> Result<ExecutionOutcome, ExecutionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(ExecutionOutcome { target_entity_id, side_effects: Vec::new() })
        }
    }

    #[tokio::test]
    async fn propose_persists_and_leaves_action_pending() {
        let harness = default_harness();

        let action = proposed(&harness).await;

        assert_eq!(action.status, ActionStatus::Proposed);
        assert_eq!(action.state_version, 1);
        let pending = harness.workflow.list_pending(10).await.expect("pending");
        assert_eq!(pending, vec![action.clone()]);
        assert_eq!(trace_verbs(&harness, &action).await, vec!["propose"]);
    }

    #[tokio::test]
    async fn approving_twice_is_rejected_without_state_change() {
        let harness = default_harness();
        let action = proposed(&harness).await;

        let approved = harness.workflow.approve(&action.id, "user-7").await.expect("approve");
        assert_eq!(approved.status, ActionStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("user-7"));
        assert!(approved.approved_at.is_some());

        let second = harness.workflow.approve(&action.id, "user-8").await;
        assert!(matches!(
            second,
            Err(ActionWorkflowError::Transition(WorkflowError::InvalidTransition { .. }))
        ));

        let stored = harness.workflow.get(&action.id).await.expect("get").expect("exists");
        assert_eq!(stored, approved);
    }

    #[tokio::test]
    async fn executing_an_unapproved_action_is_rejected() {
        let harness = default_harness();
        let action = proposed(&harness).await;

        let result = harness.workflow.execute(&action.id, None).await;

        assert!(matches!(result, Err(ActionWorkflowError::Transition(_))));
        let stored = harness.workflow.get(&action.id).await.expect("get").expect("exists");
        assert_eq!(stored.status, ActionStatus::Proposed);
        assert_eq!(stored.state_version, 1);
    }

    #[tokio::test]
    async fn approve_then_execute_records_one_chained_trace_per_transition() {
        let harness = default_harness();
        let action = proposed(&harness).await;

        harness.workflow.approve(&action.id, "user-7").await.expect("approve");
        let executed = harness
            .workflow
            .execute(&action.id, Some("int-42".to_string()))
            .await
            .expect("execute");

        assert_eq!(executed.status, ActionStatus::Executed);
        assert_eq!(executed.target_entity_id.as_deref(), Some("int-42"));
        assert!(executed.executed_at.is_some());
        assert_eq!(trace_verbs(&harness, &action).await, vec!["propose", "approve", "execute"]);

        let traces = harness
            .graph_repo
            .traces_for_entity(&action_entity(&action.id), 50)
            .await
            .expect("traces");
        let (execute, approve, propose) = (&traces[0], &traces[1], &traces[2]);
        assert_eq!(execute.linked_trace_id.as_ref(), Some(&approve.id));
        assert_eq!(approve.linked_trace_id.as_ref(), Some(&propose.id));
        assert_eq!(approve.trace_type, TraceType::UserAction);
        assert_eq!(execute.trace_type, TraceType::AiAction);
    }

    #[tokio::test]
    async fn execution_failure_keeps_action_approved_with_error() {
        let harness = harness(
            Arc::new(FailingExecutor),
            WorkflowSettings { undo_window_secs: 30, auto_execute_low_risk: false },
        );
        let action = proposed(&harness).await;
        harness.workflow.approve(&action.id, "user-7").await.expect("approve");

        let result = harness.workflow.execute(&action.id, None).await;

        assert!(matches!(result, Err(ActionWorkflowError::ExecutionFailed { .. })));
        let stored = harness.workflow.get(&action.id).await.expect("get").expect("exists");
        assert_eq!(stored.status, ActionStatus::Approved);
        assert_eq!(stored.error_message.as_deref(), Some("mail provider unavailable"));
        assert_eq!(stored.executed_at, None);

        let traces = harness
            .graph_repo
            .traces_for_entity(&action_entity(&action.id), 1)
            .await
            .expect("traces");
        let outcome = traces[0].outcome.as_ref().expect("outcome");
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn concurrent_execute_runs_side_effect_once() {
        let executor = Arc::new(SlowCountingExecutor::default());
        let harness = Arc::new(harness(
            executor.clone(),
            WorkflowSettings { undo_window_secs: 30, auto_execute_low_risk: false },
        ));
        let action = proposed(&harness).await;
        harness.workflow.approve(&action.id, "user-7").await.expect("approve");

        let first = {
            let harness = harness.clone();
            let id = action.id.clone();
            tokio::spawn(async move { harness.workflow.execute(&id, None).await })
        };
        let second = {
            let harness = harness.clone();
            let id = action.id.clone();
            tokio::spawn(async move { harness.workflow.execute(&id, None).await })
        };

        let results = [first.await.expect("join"), second.await.expect("join")];
        let succeeded = results.iter().filter(|result| result.is_ok()).count();
        let conflicted = results
            .iter()
            .filter(|result| matches!(result, Err(ActionWorkflowError::Conflict(_))))
            .count();

        assert_eq!(succeeded, 1);
        assert_eq!(conflicted, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undo_while_executing_conflicts_and_side_effect_runs_once() {
        let executor = Arc::new(SlowCountingExecutor::default());
        let harness = Arc::new(harness(
            executor.clone(),
            WorkflowSettings { undo_window_secs: 30, auto_execute_low_risk: false },
        ));
        let action = proposed(&harness).await;
        harness.workflow.approve(&action.id, "user-7").await.expect("approve");

        let execution = {
            let harness = harness.clone();
            let id = action.id.clone();
            tokio::spawn(async move { harness.workflow.execute(&id, None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let undo = harness.workflow.undo(&action.id, "user-7").await;
        assert!(matches!(undo, Err(ActionWorkflowError::Conflict(_))));

        let executed = execution.await.expect("join").expect("execute");
        assert_eq!(executed.status, ActionStatus::Executed);
        assert!(executed.executed_at.is_some());

        let stored = harness.workflow.get(&action.id).await.expect("get").expect("exists");
        assert_eq!(stored.status, ActionStatus::Executed);
        assert!(harness.workflow.undo(&action.id, "user-7").await.is_err());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undo_within_window_reverts_and_clears_approval() {
        let harness = default_harness();
        let action = proposed(&harness).await;
        harness.workflow.approve(&action.id, "user-7").await.expect("approve");

        let undone = harness.workflow.undo(&action.id, "user-7").await.expect("undo");

        assert_eq!(undone.status, ActionStatus::Proposed);
        assert_eq!(undone.approved_by, None);
        assert_eq!(undone.approved_at, None);
        assert_eq!(trace_verbs(&harness, &action).await, vec!["propose", "approve", "undo"]);
    }

    #[tokio::test]
    async fn undo_after_window_is_rejected() {
        let harness = harness(
            Arc::new(LoggingExecutor),
            WorkflowSettings { undo_window_secs: 0, auto_execute_low_risk: false },
        );
        let action = proposed(&harness).await;
        harness.workflow.reject(&action.id, "user-7").await.expect("reject");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = harness.workflow.undo(&action.id, "user-7").await;

        assert!(matches!(
            result,
            Err(ActionWorkflowError::Transition(WorkflowError::UndoWindowExpired { .. }))
        ));
        let stored = harness.workflow.get(&action.id).await.expect("get").expect("exists");
        assert_eq!(stored.status, ActionStatus::Rejected);
    }

    #[tokio::test]
    async fn low_risk_auto_execution_when_enabled() {
        let harness = harness(
            Arc::new(LoggingExecutor),
            WorkflowSettings { undo_window_secs: 30, auto_execute_low_risk: true },
        );

        let low = harness
            .workflow
            .propose(&event(), "nurture_agent", proposal(RiskLevel::Low))
            .await
            .expect("propose");
        assert_eq!(low.status, ActionStatus::Executed);
        assert_eq!(low.approved_by.as_deref(), Some(AUTO_APPROVER));

        let medium = harness
            .workflow
            .propose(&event(), "nurture_agent", proposal(RiskLevel::Medium))
            .await
            .expect("propose");
        assert_eq!(medium.status, ActionStatus::Proposed);
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let harness = default_harness();
        let missing = rapport_core::domain::action::ActionId("missing".to_string());

        let result = harness.workflow.approve(&missing, "user-7").await;

        assert!(matches!(result, Err(ActionWorkflowError::NotFound(_))));
    }
}
