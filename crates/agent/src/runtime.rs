use std::sync::Arc;

use rapport_core::config::AppConfig;
use rapport_core::domain::action::{ActionId, AgentAction};
use rapport_core::domain::event::{EventPayload, SourceEntity};
use rapport_core::domain::graph::EntityRef;
use rapport_core::domain::person::PersonId;
use rapport_core::reasoning::ReasoningChain;
use rapport_db::repositories::{
    InMemoryActionRepository, InMemoryContextGraphRepository, InMemoryEventRepository,
    InMemoryPersonRepository, SqlActionRepository, SqlContextGraphRepository, SqlEventRepository,
    SqlPersonRepository,
};
use rapport_db::{
    ActionRepository, ContextGraphRepository, DbPool, EventRepository, PersonRepository,
};

use crate::agents::nurture::{NurtureAgent, NURTURE_AGENT, SUBSCRIBED_EVENTS};
use crate::bus::{BusError, Emitted, EventBus};
use crate::executor::ActionExecutor;
use crate::graph::{ContextGraph, GraphError};
use crate::registry::{AgentRegistry, RegistryError};
use crate::workflow::{ActionWorkflow, ActionWorkflowError};

/// Storage collaborators the runtime is wired against.
#[derive(Clone)]
pub struct RuntimeRepositories {
    pub people: Arc<dyn PersonRepository>,
    pub events: Arc<dyn EventRepository>,
    pub actions: Arc<dyn ActionRepository>,
    pub graph: Arc<dyn ContextGraphRepository>,
}

impl RuntimeRepositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            people: Arc::new(SqlPersonRepository::new(pool.clone())),
            events: Arc::new(SqlEventRepository::new(pool.clone())),
            actions: Arc::new(SqlActionRepository::new(pool.clone())),
            graph: Arc::new(SqlContextGraphRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            people: Arc::new(InMemoryPersonRepository::default()),
            events: Arc::new(InMemoryEventRepository::default()),
            actions: Arc::new(InMemoryActionRepository::default()),
            graph: Arc::new(InMemoryContextGraphRepository::default()),
        }
    }
}

/// One explicitly constructed orchestration core: bus, registry, workflow and
/// graph sharing the same storage. Hand clones of the `Arc` to producers
/// instead of reaching for global state.
pub struct AgentRuntime {
    repositories: RuntimeRepositories,
    registry: Arc<AgentRegistry>,
    graph: Arc<ContextGraph>,
    workflow: Arc<ActionWorkflow>,
    bus: EventBus,
    default_depth: u32,
}

impl AgentRuntime {
    pub fn new(
        repositories: RuntimeRepositories,
        executor: Arc<dyn ActionExecutor>,
        config: &AppConfig,
    ) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let graph = Arc::new(ContextGraph::new(repositories.graph.clone(), &config.graph));
        let workflow = Arc::new(ActionWorkflow::new(
            repositories.actions.clone(),
            graph.clone(),
            executor,
            &config.workflow,
        ));
        let bus = EventBus::new(
            repositories.events.clone(),
            registry.clone(),
            workflow.clone(),
            graph.clone(),
            &config.bus,
        );

        Self {
            repositories,
            registry,
            graph,
            workflow,
            bus,
            default_depth: config.graph.default_depth,
        }
    }

    /// Registers the built-in agents. Safe to call more than once.
    pub async fn register_default_agents(&self) -> Result<(), RegistryError> {
        let nurture = Arc::new(NurtureAgent::new(self.repositories.people.clone()));
        self.registry.register_agent(NURTURE_AGENT, SUBSCRIBED_EVENTS, nurture).await
    }

    pub fn repositories(&self) -> &RuntimeRepositories {
        &self.repositories
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn workflow(&self) -> &Arc<ActionWorkflow> {
        &self.workflow
    }

    pub fn graph(&self) -> &Arc<ContextGraph> {
        &self.graph
    }

    pub async fn emit(
        &self,
        payload: EventPayload,
        source: SourceEntity,
        person_id: Option<PersonId>,
    ) -> Result<Emitted, BusError> {
        self.bus.emit(payload, source, person_id).await
    }

    pub async fn pending_actions(
        &self,
        limit: u32,
    ) -> Result<Vec<AgentAction>, ActionWorkflowError> {
        self.workflow.list_pending(limit).await
    }

    pub async fn approve(
        &self,
        id: &ActionId,
        approver_id: &str,
    ) -> Result<AgentAction, ActionWorkflowError> {
        self.workflow.approve(id, approver_id).await
    }

    pub async fn reject(
        &self,
        id: &ActionId,
        actor: &str,
    ) -> Result<AgentAction, ActionWorkflowError> {
        self.workflow.reject(id, actor).await
    }

    pub async fn execute(
        &self,
        id: &ActionId,
        target_entity_id: Option<String>,
    ) -> Result<AgentAction, ActionWorkflowError> {
        self.workflow.execute(id, target_entity_id).await
    }

    pub async fn undo(
        &self,
        id: &ActionId,
        actor: &str,
    ) -> Result<AgentAction, ActionWorkflowError> {
        self.workflow.undo(id, actor).await
    }

    /// `depth` falls back to the configured default and is clamped to the
    /// configured maximum.
    pub async fn reasoning_chain(
        &self,
        entity: &EntityRef,
        depth: Option<u32>,
    ) -> Result<ReasoningChain, GraphError> {
        self.graph.get_reasoning_chain(entity, depth.unwrap_or(self.default_depth)).await
    }
}
