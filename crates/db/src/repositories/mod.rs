use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use rapport_core::domain::action::{ActionId, ActionStatus, AgentAction};
use rapport_core::domain::event::{EventId, SystemEvent};
use rapport_core::domain::graph::{ContextEdge, ContextNode, DecisionTrace, EntityRef};
use rapport_core::domain::person::{Person, PersonId};
use rapport_core::reasoning::GraphReader;

pub mod action;
pub mod event;
pub mod graph;
pub mod memory;
pub mod person;

pub use action::SqlActionRepository;
pub use event::SqlEventRepository;
pub use graph::SqlContextGraphRepository;
pub use memory::{
    InMemoryActionRepository, InMemoryContextGraphRepository, InMemoryEventRepository,
    InMemoryPersonRepository,
};
pub use person::SqlPersonRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
    pub unprocessed: u64,
}

#[async_trait]
pub trait PersonRepository: Send + Sync {
    async fn find_by_id(&self, id: &PersonId) -> Result<Option<Person>, RepositoryError>;
    async fn save(&self, person: Person) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn insert(&self, event: &SystemEvent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &EventId) -> Result<Option<SystemEvent>, RepositoryError>;

    /// Returns `false` when no such event exists.
    async fn mark_processed(&self, id: &EventId) -> Result<bool, RepositoryError>;

    async fn stats(&self) -> Result<EventStats, RepositoryError>;

    /// Deletes processed events created strictly before `cutoff`. Unprocessed
    /// events are kept regardless of age.
    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ActionRepository: Send + Sync {
    async fn insert(&self, action: &AgentAction) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &ActionId) -> Result<Option<AgentAction>, RepositoryError>;

    /// Writes `action` only if the stored row still carries `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(
        &self,
        expected_version: u32,
        action: &AgentAction,
    ) -> Result<bool, RepositoryError>;

    /// Most recent first.
    async fn list_by_status(
        &self,
        status: ActionStatus,
        limit: u32,
    ) -> Result<Vec<AgentAction>, RepositoryError>;

    /// Oldest first.
    async fn list_for_event(&self, event_id: &EventId)
        -> Result<Vec<AgentAction>, RepositoryError>;
}

#[async_trait]
pub trait ContextGraphRepository: GraphReader<Error = RepositoryError> {
    /// Inserts `node` unless a node with the same `(node_type, entity_id)`
    /// exists, then returns whichever node is stored. Atomic per key.
    async fn get_or_create_node(&self, node: &ContextNode) -> Result<ContextNode, RepositoryError>;

    async fn insert_edge(&self, edge: &ContextEdge) -> Result<(), RepositoryError>;

    async fn insert_trace(&self, trace: &DecisionTrace) -> Result<(), RepositoryError>;

    /// Most recent first, at most `limit` rows.
    async fn traces_for_entity(
        &self,
        entity: &EntityRef,
        limit: u32,
    ) -> Result<Vec<DecisionTrace>, RepositoryError>;
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_json<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn to_json<T>(column: &str, value: &T) -> Result<String, RepositoryError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Encode(format!("could not encode `{column}`: {error}")))
}


#[cfg(test)]
mod tests {
    use super::{format_timestamp, parse_timestamp, test_support::parse_ts};

    #[test]
    fn timestamps_round_trip_and_sort_lexically() {
        let earlier = parse_ts("2026-03-01T09:00:00Z");
        let later = parse_ts("2026-03-01T09:00:00.5Z");

        let earlier_text = format_timestamp(&earlier);
        let later_text = format_timestamp(&later);

        assert!(earlier_text < later_text);
        assert_eq!(parse_timestamp("created_at", later_text).expect("parse"), later);
    }
}
