use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use rapport_core::domain::action::{ActionId, ActionStatus, AgentAction};
use rapport_core::domain::event::{EventId, SystemEvent};
use rapport_core::domain::graph::{ContextEdge, ContextNode, DecisionTrace, EntityRef, NodeId};
use rapport_core::domain::person::{Person, PersonId};
use rapport_core::reasoning::GraphReader;

use super::{
    ActionRepository, ContextGraphRepository, EventRepository, EventStats, PersonRepository,
    RepositoryError,
};

#[derive(Default)]
pub struct InMemoryPersonRepository {
    people: RwLock<HashMap<String, Person>>,
}

#[async_trait::async_trait]
impl PersonRepository for InMemoryPersonRepository {
    async fn find_by_id(&self, id: &PersonId) -> Result<Option<Person>, RepositoryError> {
        let people = self.people.read().await;
        Ok(people.get(&id.0).cloned())
    }

    async fn save(&self, person: Person) -> Result<(), RepositoryError> {
        let mut people = self.people.write().await;
        people.insert(person.id.0.clone(), person);
        Ok(())
    }
}

/// Events kept in insertion order.
#[derive(Default)]
pub struct InMemoryEventRepository {
    events: RwLock<Vec<SystemEvent>>,
}

#[async_trait::async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn insert(&self, event: &SystemEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        if events.iter().any(|existing| existing.id == event.id) {
            return Err(RepositoryError::Encode(format!("duplicate event id `{}`", event.id)));
        }
        events.push(event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &EventId) -> Result<Option<SystemEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().find(|event| &event.id == id).cloned())
    }

    async fn mark_processed(&self, id: &EventId) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events.iter_mut().find(|event| &event.id == id) {
            Some(event) => {
                event.processed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stats(&self) -> Result<EventStats, RepositoryError> {
        let events = self.events.read().await;
        let mut stats = EventStats::default();
        for event in events.iter() {
            stats.total += 1;
            if !event.processed {
                stats.unprocessed += 1;
            }
            *stats.by_type.entry(event.event_type.as_str().to_string()).or_default() += 1;
            *stats.by_category.entry(event.event_category.as_str().to_string()).or_default() += 1;
        }
        Ok(stats)
    }

    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|event| !(event.processed && event.created_at < cutoff));
        Ok((before - events.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryActionRepository {
    actions: RwLock<Vec<AgentAction>>,
}

#[async_trait::async_trait]
impl ActionRepository for InMemoryActionRepository {
    async fn insert(&self, action: &AgentAction) -> Result<(), RepositoryError> {
        let mut actions = self.actions.write().await;
        if actions.iter().any(|existing| existing.id == action.id) {
            return Err(RepositoryError::Encode(format!("duplicate action id `{}`", action.id.0)));
        }
        actions.push(action.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ActionId) -> Result<Option<AgentAction>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(actions.iter().find(|action| &action.id == id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u32,
        action: &AgentAction,
    ) -> Result<bool, RepositoryError> {
        let mut actions = self.actions.write().await;
        match actions.iter_mut().find(|stored| stored.id == action.id) {
            Some(stored) if stored.state_version == expected_version => {
                *stored = action.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_status(
        &self,
        status: ActionStatus,
        limit: u32,
    ) -> Result<Vec<AgentAction>, RepositoryError> {
        let actions = self.actions.read().await;
        let mut matching =
            actions.iter().filter(|action| action.status == status).cloned().collect::<Vec<_>>();
        // Stable sort keeps insertion order as the tie-break, reversed below.
        matching.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        matching.reverse();
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn list_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<AgentAction>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(actions.iter().filter(|action| &action.event_id == event_id).cloned().collect())
    }
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, ContextNode>,
    by_entity: HashMap<EntityRef, NodeId>,
    edges: Vec<ContextEdge>,
    traces: Vec<DecisionTrace>,
}

#[derive(Default)]
pub struct InMemoryContextGraphRepository {
    state: RwLock<GraphState>,
}

#[async_trait::async_trait]
impl GraphReader for InMemoryContextGraphRepository {
    type Error = RepositoryError;

    async fn node_by_id(&self, id: &NodeId) -> Result<Option<ContextNode>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.nodes.get(id).cloned())
    }

    async fn node_by_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ContextNode>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.by_entity.get(entity).and_then(|id| state.nodes.get(id)).cloned())
    }

    async fn edges_from(&self, id: &NodeId) -> Result<Vec<ContextEdge>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.edges.iter().filter(|edge| &edge.from_node_id == id).cloned().collect())
    }

    async fn edges_to(&self, id: &NodeId) -> Result<Vec<ContextEdge>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.edges.iter().filter(|edge| &edge.to_node_id == id).cloned().collect())
    }
}

#[async_trait::async_trait]
impl ContextGraphRepository for InMemoryContextGraphRepository {
    async fn get_or_create_node(&self, node: &ContextNode) -> Result<ContextNode, RepositoryError> {
        let mut state = self.state.write().await;
        let entity = node.entity();

        if let Some(existing) = state.by_entity.get(&entity).and_then(|id| state.nodes.get(id)) {
            return Ok(existing.clone());
        }

        state.by_entity.insert(entity, node.id.clone());
        state.nodes.insert(node.id.clone(), node.clone());
        Ok(node.clone())
    }

    async fn insert_edge(&self, edge: &ContextEdge) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let known = |id: &NodeId| state.nodes.contains_key(id);
        if !known(&edge.from_node_id) || !known(&edge.to_node_id) {
            return Err(RepositoryError::Encode(format!(
                "edge `{}` references an unknown node",
                edge.id.0
            )));
        }
        state.edges.push(edge.clone());
        Ok(())
    }

    async fn insert_trace(&self, trace: &DecisionTrace) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.traces.push(trace.clone());
        Ok(())
    }

    async fn traces_for_entity(
        &self,
        entity: &EntityRef,
        limit: u32,
    ) -> Result<Vec<DecisionTrace>, RepositoryError> {
        let state = self.state.read().await;
        let mut traces = state
            .traces
            .iter()
            .filter(|trace| {
                trace.entity_type.as_deref() == Some(entity.entity_type.as_str())
                    && trace.entity_id.as_deref() == Some(entity.entity_id.as_str())
            })
            .cloned()
            .collect::<Vec<_>>();
        traces.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        traces.reverse();
        traces.truncate(limit as usize);
        Ok(traces)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use rapport_core::domain::action::{ActionId, ActionStatus, AgentAction, RiskLevel};
    use rapport_core::domain::event::{
        ContactDuePayload, EventId, EventPayload, SourceEntity, SystemEvent,
    };
    use rapport_core::domain::graph::{ContextNode, EntityRef};
    use rapport_core::domain::person::{Person, PersonId};

    use crate::repositories::{
        ActionRepository, ContextGraphRepository, EventRepository, InMemoryActionRepository,
        InMemoryContextGraphRepository, InMemoryEventRepository, InMemoryPersonRepository,
        PersonRepository,
    };

    #[tokio::test]
    async fn in_memory_person_repo_round_trip() {
        let repo = InMemoryPersonRepository::default();
        let person = Person {
            id: PersonId("p-ada".to_string()),
            name: "Ada".to_string(),
            segment: None,
            relationship_score: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        repo.save(person.clone()).await.expect("save person");
        assert_eq!(repo.find_by_id(&person.id).await.expect("find"), Some(person));
    }

    #[tokio::test]
    async fn in_memory_event_repo_purges_only_processed() {
        let repo = InMemoryEventRepository::default();
        let mut old = SystemEvent::new(
            EventPayload::ContactDue(ContactDuePayload {
                due_reason: "cadence".to_string(),
                days_since_contact: 40,
                days_overdue: 10,
            }),
            SourceEntity::new("person", "p-ada"),
            None,
        )
        .expect("valid event");
        old.created_at = Utc::now() - Duration::days(100);
        let mut pending = old.clone();
        pending.id = EventId("pending".to_string());

        repo.insert(&old).await.expect("insert");
        repo.insert(&pending).await.expect("insert");
        repo.mark_processed(&old.id).await.expect("mark");

        let purged = repo.purge_processed_before(Utc::now()).await.expect("purge");
        assert_eq!(purged, 1);
        assert_eq!(repo.stats().await.expect("stats").total, 1);
        assert_eq!(repo.stats().await.expect("stats").unprocessed, 1);
    }

    #[tokio::test]
    async fn in_memory_action_repo_compare_and_swap() {
        let repo = InMemoryActionRepository::default();
        let now = Utc::now();
        let action = AgentAction {
            id: ActionId("act-1".to_string()),
            event_id: EventId("evt-1".to_string()),
            agent_name: "nurture_agent".to_string(),
            action_type: "suggest_text".to_string(),
            person_id: None,
            target_entity: None,
            proposed_content: serde_json::json!({}),
            risk_level: RiskLevel::Low,
            reasoning: "check in".to_string(),
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
        repo.insert(&action).await.expect("insert");

        let mut rejected = action.clone();
        rejected.status = ActionStatus::Rejected;
        rejected.state_version = 2;

        assert!(repo.compare_and_swap(1, &rejected).await.expect("swap"));
        assert!(!repo.compare_and_swap(1, &rejected).await.expect("stale swap"));
        assert!(repo.list_by_status(ActionStatus::Proposed, 10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_a_single_node() {
        let repo = Arc::new(InMemoryContextGraphRepository::default());
        let entity = EntityRef::new("person", "p-ada");

        let mut handles = Vec::new();
        for attempt in 0..8 {
            let repo = repo.clone();
            let entity = entity.clone();
            handles.push(tokio::spawn(async move {
                repo.get_or_create_node(&ContextNode::new(&entity, format!("Ada #{attempt}")))
                    .await
                    .expect("get or create")
                    .id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join"));
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}
