//! Event bus: persists events and fans them out to subscribed agents.
//!
//! `emit` returns as soon as the event is stored. Dispatch runs on a detached
//! task: every subscriber runs as its own task under a per-handler timeout,
//! proposals are persisted through the action workflow, and the event is
//! marked processed once every handler finished, failed or timed out.
//! A timed-out handler is not cancelled; its late result is discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use rapport_core::config::BusConfig;
use rapport_core::domain::action::ActionId;
use rapport_core::domain::event::{EventId, EventPayload, SourceEntity, SystemEvent};
use rapport_core::domain::graph::{
    edge_types, DecisionRecord, TraceInputs, TraceOutcome, TraceType,
};
use rapport_core::domain::person::PersonId;
use rapport_core::errors::DomainError;
use rapport_db::{EventRepository, EventStats, RepositoryError};

use crate::graph::{event_entity, person_entity, ContextGraph, EntityLink};
use crate::registry::{AgentRegistry, AgentSubscription};
use crate::workflow::ActionWorkflow;

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    InvalidEvent(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("dispatch task aborted: {0}")]
    DispatchAborted(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HandlerStatus {
    Completed { proposed: Vec<ActionId> },
    Failed { error: String },
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    pub agent_name: String,
    #[serde(flatten)]
    pub status: HandlerStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub event_id: EventId,
    /// One entry per subscribed agent, in agent-name order.
    pub outcomes: Vec<AgentOutcome>,
    pub processed: bool,
}

impl DispatchReport {
    pub fn outcome(&self, agent_name: &str) -> Option<&HandlerStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.agent_name == agent_name)
            .map(|outcome| &outcome.status)
    }
}

/// A stored event plus the handle of its detached dispatch.
///
/// Dropping `dispatch` does not cancel it.
#[derive(Debug)]
pub struct Emitted {
    pub event: SystemEvent,
    pub dispatch: JoinHandle<DispatchReport>,
}

impl Emitted {
    pub async fn wait(self) -> Result<DispatchReport, BusError> {
        self.dispatch.await.map_err(|error| BusError::DispatchAborted(error.to_string()))
    }
}

#[derive(Clone)]
pub struct EventBus {
    events: Arc<dyn EventRepository>,
    registry: Arc<AgentRegistry>,
    workflow: Arc<ActionWorkflow>,
    graph: Arc<ContextGraph>,
    handler_timeout: Duration,
}

impl EventBus {
    pub fn new(
        events: Arc<dyn EventRepository>,
        registry: Arc<AgentRegistry>,
        workflow: Arc<ActionWorkflow>,
        graph: Arc<ContextGraph>,
        config: &BusConfig,
    ) -> Self {
        Self {
            events,
            registry,
            workflow,
            graph,
            handler_timeout: Duration::from_millis(config.handler_timeout_ms),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Validates and stores the event, then starts dispatch without waiting
    /// for it.
    pub async fn emit(
        &self,
        payload: EventPayload,
        source: SourceEntity,
        person_id: Option<PersonId>,
    ) -> Result<Emitted, BusError> {
        let event = SystemEvent::new(payload, source, person_id)?;
        self.events.insert(&event).await?;

        info!(
            event_name = "bus.event.emitted",
            correlation_id = %event.id,
            event_type = %event.event_type,
            source = %format!("{}:{}", event.source.entity_type, event.source.entity_id),
            "event stored"
        );

        let bus = self.clone();
        let dispatched = event.clone();
        let dispatch = tokio::spawn(async move { bus.dispatch(dispatched).await });

        Ok(Emitted { event, dispatch })
    }

    /// Entry point for untyped producers. The payload is decoded against the
    /// schema of `event_type` before anything is stored.
    pub async fn emit_raw(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        source: SourceEntity,
        person_id: Option<PersonId>,
    ) -> Result<Emitted, BusError> {
        let payload = EventPayload::from_raw(event_type, payload)?;
        self.emit(payload, source, person_id).await
    }

    pub async fn stats(&self) -> Result<EventStats, BusError> {
        Ok(self.events.stats().await?)
    }

    /// Deletes processed events created before `cutoff`. Unprocessed events
    /// are kept regardless of age.
    pub async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, BusError> {
        let purged = self.events.purge_processed_before(cutoff).await?;
        info!(
            event_name = "bus.retention.purged",
            correlation_id = "retention",
            cutoff = %cutoff.to_rfc3339(),
            purged,
            "processed events purged"
        );
        Ok(purged)
    }

    /// An age beyond the representable date range purges nothing.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64, BusError> {
        let cutoff = Utc::now()
            .checked_sub_signed(chrono::Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_processed_before(cutoff).await
    }

    async fn dispatch(&self, event: SystemEvent) -> DispatchReport {
        self.record_arrival(&event).await;

        let subscribers = self.registry.subscribers(event.event_type).await;
        if subscribers.is_empty() {
            debug!(
                event_name = "bus.dispatch.no_subscribers",
                correlation_id = %event.id,
                event_type = %event.event_type,
                "no agent subscribed to event type"
            );
        }

        let event = Arc::new(event);
        let mut handlers = JoinSet::new();
        for subscription in subscribers {
            let bus = self.clone();
            let event = Arc::clone(&event);
            handlers.spawn(async move { bus.run_handler(subscription, event).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = handlers.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => error!(
                    event_name = "bus.dispatch.supervisor_failed",
                    correlation_id = %event.id,
                    error = %join_error,
                    "handler supervisor task did not complete"
                ),
            }
        }
        outcomes.sort_by(|left, right| left.agent_name.cmp(&right.agent_name));

        let processed = match self.events.mark_processed(&event.id).await {
            Ok(processed) => processed,
            Err(repository_error) => {
                error!(
                    event_name = "bus.event.mark_processed_failed",
                    correlation_id = %event.id,
                    error = %repository_error,
                    "could not mark event processed"
                );
                false
            }
        };

        info!(
            event_name = "bus.dispatch.completed",
            correlation_id = %event.id,
            event_type = %event.event_type,
            handlers = outcomes.len(),
            processed,
            "event dispatch finished"
        );

        DispatchReport { event_id: event.id.clone(), outcomes, processed }
    }

    async fn run_handler(
        &self,
        subscription: AgentSubscription,
        event: Arc<SystemEvent>,
    ) -> AgentOutcome {
        let agent_name = subscription.agent_name;
        let handler = subscription.handler;
        let handler_event = Arc::clone(&event);
        let task = tokio::spawn(async move { handler.handle(&handler_event).await });

        let status = match tokio::time::timeout(self.handler_timeout, task).await {
            Err(_elapsed) => {
                warn!(
                    event_name = "bus.handler.timed_out",
                    correlation_id = %event.id,
                    agent_name = %agent_name,
                    timeout_ms = self.handler_timeout.as_millis() as u64,
                    "agent handler exceeded its timeout"
                );
                HandlerStatus::TimedOut
            }
            Ok(Err(join_error)) => {
                error!(
                    event_name = "bus.handler.panicked",
                    correlation_id = %event.id,
                    agent_name = %agent_name,
                    error = %join_error,
                    "agent handler panicked"
                );
                HandlerStatus::Failed { error: format!("handler panicked: {join_error}") }
            }
            Ok(Ok(Err(handler_error))) => {
                warn!(
                    event_name = "bus.handler.failed",
                    correlation_id = %event.id,
                    agent_name = %agent_name,
                    error = %handler_error,
                    "agent handler failed"
                );
                HandlerStatus::Failed { error: handler_error.to_string() }
            }
            Ok(Ok(Ok(proposals))) => {
                let mut proposed = Vec::with_capacity(proposals.len());
                let mut failure = None;
                for proposal in proposals {
                    match self.workflow.propose(&event, &agent_name, proposal).await {
                        Ok(action) => proposed.push(action.id),
                        Err(workflow_error) => {
                            error!(
                                event_name = "bus.proposal.persist_failed",
                                correlation_id = %event.id,
                                agent_name = %agent_name,
                                error = %workflow_error,
                                "could not persist agent proposal"
                            );
                            failure = Some(workflow_error.to_string());
                            break;
                        }
                    }
                }

                match failure {
                    Some(error) => HandlerStatus::Failed { error },
                    None => {
                        debug!(
                            event_name = "bus.handler.completed",
                            correlation_id = %event.id,
                            agent_name = %agent_name,
                            proposed = proposed.len(),
                            "agent handler completed"
                        );
                        HandlerStatus::Completed { proposed }
                    }
                }
            }
        };

        AgentOutcome { agent_name, status }
    }

    async fn record_arrival(&self, event: &SystemEvent) {
        let record = DecisionRecord::new(
            TraceType::SystemEvent,
            format!("system:{}", event.source.entity_type),
            event.event_type.as_str(),
        )
        .entity(event_entity(&event.id), event.event_type.as_str())
        .inputs(TraceInputs::evidence([format!(
            "source:{}:{}",
            event.source.entity_type, event.source.entity_id
        )]))
        .outcome(TraceOutcome::success("received"));

        if let Err(graph_error) = self.graph.record_decision(record).await {
            warn!(
                event_name = "graph.write.failed",
                correlation_id = %event.id,
                error = %graph_error,
                "event arrival trace write failed"
            );
        }

        if let Some(person_id) = &event.person_id {
            let link = EntityLink::new(
                event_entity(&event.id),
                event.event_type.as_str(),
                person_entity(person_id),
                person_id.0.clone(),
                edge_types::REFERENCES,
            );
            if let Err(graph_error) = self.graph.link_entities(link).await {
                warn!(
                    event_name = "graph.write.failed",
                    correlation_id = %event.id,
                    error = %graph_error,
                    "event to person edge write failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use rapport_core::config::{BusConfig, GraphConfig, WorkflowSettings};
    use rapport_core::domain::action::{ActionProposal, RiskLevel};
    use rapport_core::domain::event::{
        ContactDuePayload, EventPayload, EventType, SourceEntity, SystemEvent,
    };
    use rapport_core::domain::person::PersonId;
    use rapport_core::errors::DomainError;
    use rapport_db::repositories::{
        InMemoryActionRepository, InMemoryContextGraphRepository, InMemoryEventRepository,
    };
    use rapport_db::EventRepository;

    use super::{BusError, EventBus, HandlerStatus};
    use crate::executor::LoggingExecutor;
    use crate::graph::{person_entity, ContextGraph};
    use crate::handler::{AgentHandler, HandlerError};
    use crate::registry::AgentRegistry;
    use crate::workflow::ActionWorkflow;

    struct Harness {
        bus: EventBus,
        events: Arc<InMemoryEventRepository>,
        graph: Arc<ContextGraph>,
        workflow: Arc<ActionWorkflow>,
    }

    fn harness(handler_timeout_ms: u64) -> Harness {
        let events = Arc::new(InMemoryEventRepository::default());
        let graph = Arc::new(ContextGraph::new(
            Arc::new(InMemoryContextGraphRepository::default()),
            &GraphConfig { trace_limit: 50, default_depth: 2, max_depth: 5 },
        ));
        let workflow = Arc::new(ActionWorkflow::new(
            Arc::new(InMemoryActionRepository::default()),
            graph.clone(),
            Arc::new(LoggingExecutor),
            &WorkflowSettings { undo_window_secs: 30, auto_execute_low_risk: false },
        ));
        let bus = EventBus::new(
            events.clone(),
            Arc::new(AgentRegistry::new()),
            workflow.clone(),
            graph.clone(),
            &BusConfig { handler_timeout_ms, retention_days: 90, retention_sweep_secs: 3600 },
        );
        Harness { bus, events, graph, workflow }
    }

    fn contact_due() -> EventPayload {
        EventPayload::ContactDue(ContactDuePayload {
            due_reason: "monthly cadence".to_string(),
            days_since_contact: 50,
            days_overdue: 20,
        })
    }

    fn source() -> SourceEntity {
        SourceEntity::new("cadence_scheduler", "daily")
    }

    fn ada() -> Option<PersonId> {
        Some(PersonId("p-ada".to_string()))
    }

    struct Proposing;

    #[async_trait]
    impl AgentHandler for Proposing {
        async fn handle(&self, event: &SystemEvent) -> Result<Vec<ActionProposal>, HandlerError> {
            Ok(vec![ActionProposal {
                action_type: "suggest_email".to_string(),
                person_id: event.person_id.clone(),
                target_entity: Some("person".to_string()),
                proposed_content: serde_json::json!({ "channel": "email" }),
                risk_level: RiskLevel::Low,
                reasoning: "overdue".to_string(),
                confidence: None,
            }])
        }
    }

    struct Failing;

    #[async_trait]
    impl AgentHandler for Failing {
        async fn handle(&self, _event: &SystemEvent) -> Result<Vec<ActionProposal>, HandlerError> {
            Err(HandlerError::Failed("scoring model offline".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl AgentHandler for Panicking {
        async fn handle(&self, _event: &SystemEvent) -> Result<Vec<ActionProposal>, HandlerError> {
            panic!("handler bug");
        }
    }

    struct Hanging;

    #[async_trait]
    impl AgentHandler for Hanging {
        async fn handle(&self, _event: &SystemEvent) -> Result<Vec<ActionProposal>, HandlerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    struct Gated {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl AgentHandler for Gated {
        async fn handle(&self, _event: &SystemEvent) -> Result<Vec<ActionProposal>, HandlerError> {
            self.gate.notified().await;
            Ok(Vec::new())
        }
    }

    async fn register(harness: &Harness, name: &str, handler: Arc<dyn AgentHandler>) {
        harness
            .bus
            .registry()
            .register_agent(name, [EventType::ContactDue], handler)
            .await
            .expect("register agent");
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_do_not_block_siblings() {
        let harness = harness(1_000);
        register(&harness, "a_failing", Arc::new(Failing)).await;
        register(&harness, "b_panicking", Arc::new(Panicking)).await;
        register(&harness, "c_proposing", Arc::new(Proposing)).await;

        let emitted = harness.bus.emit(contact_due(), source(), ada()).await.expect("emit");
        let report = emitted.wait().await.expect("dispatch");

        assert!(matches!(report.outcome("a_failing"), Some(HandlerStatus::Failed { .. })));
        assert!(matches!(report.outcome("b_panicking"), Some(HandlerStatus::Failed { .. })));
        match report.outcome("c_proposing") {
            Some(HandlerStatus::Completed { proposed }) => assert_eq!(proposed.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(report.processed);

        let pending = harness.workflow.list_pending(10).await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, report.event_id);
    }

    #[tokio::test]
    async fn hanging_handler_times_out_and_event_is_still_processed() {
        let harness = harness(50);
        register(&harness, "hanging", Arc::new(Hanging)).await;
        register(&harness, "proposing", Arc::new(Proposing)).await;

        let emitted = harness.bus.emit(contact_due(), source(), ada()).await.expect("emit");
        let event_id = emitted.event.id.clone();
        let report = emitted.wait().await.expect("dispatch");

        assert_eq!(report.outcome("hanging"), Some(&HandlerStatus::TimedOut));
        assert!(matches!(report.outcome("proposing"), Some(HandlerStatus::Completed { .. })));
        let stored = harness.events.find_by_id(&event_id).await.expect("find").expect("exists");
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn emit_returns_before_handlers_finish() {
        let harness = harness(5_000);
        let gate = Arc::new(Notify::new());
        register(&harness, "gated", Arc::new(Gated { gate: gate.clone() })).await;

        let emitted = harness.bus.emit(contact_due(), source(), ada()).await.expect("emit");

        let stored = harness.events.find_by_id(&emitted.event.id).await.expect("find");
        assert_eq!(stored.map(|event| event.processed), Some(false));

        gate.notify_one();
        let report = emitted.wait().await.expect("dispatch");
        assert!(report.processed);
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected_before_storage() {
        let harness = harness(1_000);

        let result = harness
            .bus
            .emit_raw("contact.lost", serde_json::json!({}), source(), ada())
            .await;

        match result {
            Err(BusError::InvalidEvent(DomainError::UnknownEventType(name))) => {
                assert_eq!(name, "contact.lost");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(harness.bus.stats().await.expect("stats").total, 0);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_at_emit() {
        let harness = harness(1_000);

        let result = harness
            .bus
            .emit_raw(
                "contact.due",
                serde_json::json!({ "dueReason": "cadence", "daysSinceContact": 3 }),
                source(),
                ada(),
            )
            .await;

        assert!(matches!(
            result,
            Err(BusError::InvalidEvent(DomainError::InvalidEventPayload { .. }))
        ));
    }

    #[tokio::test]
    async fn arrival_is_traced_and_linked_to_person() {
        let harness = harness(1_000);
        register(&harness, "proposing", Arc::new(Proposing)).await;

        let emitted = harness
            .bus
            .emit_raw(
                "contact.due",
                serde_json::json!({
                    "dueReason": "monthly cadence",
                    "daysSinceContact": 45,
                    "daysOverdue": 15,
                }),
                source(),
                ada(),
            )
            .await
            .expect("emit");
        emitted.wait().await.expect("dispatch");

        let chain = harness
            .graph
            .get_reasoning_chain(&person_entity(&PersonId("p-ada".to_string())), 1)
            .await
            .expect("chain");
        let node_types = chain
            .connected_nodes
            .iter()
            .map(|connected| connected.node.node_type.as_str())
            .collect::<Vec<_>>();
        assert_eq!(node_types[0], "person");
        assert!(node_types.contains(&"system_event"));
        assert!(node_types.contains(&"agent_action"));
    }

    #[tokio::test]
    async fn stats_and_retention_only_touch_processed_events() {
        let harness = harness(1_000);

        let first = harness.bus.emit(contact_due(), source(), ada()).await.expect("emit");
        first.wait().await.expect("dispatch");
        let second = harness.bus.emit(contact_due(), source(), None).await.expect("emit");
        second.wait().await.expect("dispatch");

        let stats = harness.bus.stats().await.expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unprocessed, 0);
        assert_eq!(stats.by_type.get("contact.due"), Some(&2));

        let purged = harness
            .bus
            .purge_processed_before(chrono::Utc::now() + chrono::Duration::seconds(1))
            .await
            .expect("purge");
        assert_eq!(purged, 2);
        assert_eq!(harness.bus.purge_older_than(90).await.expect("purge"), 0);
    }

    #[tokio::test]
    async fn purge_with_out_of_range_age_keeps_everything() {
        let harness = harness(1_000);
        let emitted = harness.bus.emit(contact_due(), source(), None).await.expect("emit");
        emitted.wait().await.expect("dispatch");

        let purged = harness.bus.purge_older_than(u32::MAX).await.expect("purge");

        assert_eq!(purged, 0);
        assert_eq!(harness.bus.stats().await.expect("stats").total, 1);
    }
}
