use sqlx::{sqlite::SqliteRow, Row};

use rapport_core::domain::action::{ActionId, ActionStatus, AgentAction, RiskLevel};
use rapport_core::domain::event::EventId;
use rapport_core::domain::person::PersonId;

use super::{
    format_timestamp, parse_json, parse_optional_timestamp, parse_timestamp, parse_u32, to_json,
    ActionRepository, RepositoryError,
};
use crate::DbPool;

const ACTION_COLUMNS: &str = "
    id,
    event_id,
    agent_name,
    action_type,
    person_id,
    target_entity,
    proposed_content_json,
    risk_level,
    reasoning,
    status,
    approved_by,
    approved_at,
    rejected_at,
    executed_at,
    target_entity_id,
    error_message,
    state_version,
    created_at,
    updated_at";

pub struct SqlActionRepository {
    pool: DbPool,
}

impl SqlActionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActionRepository for SqlActionRepository {
    async fn insert(&self, action: &AgentAction) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO agent_action ({ACTION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&action.id.0)
        .bind(&action.event_id.0)
        .bind(&action.agent_name)
        .bind(&action.action_type)
        .bind(action.person_id.as_ref().map(|id| id.0.as_str()))
        .bind(action.target_entity.as_deref())
        .bind(to_json("proposed_content_json", &action.proposed_content)?)
        .bind(action.risk_level.as_str())
        .bind(&action.reasoning)
        .bind(action.status.as_str())
        .bind(action.approved_by.as_deref())
        .bind(action.approved_at.as_ref().map(format_timestamp))
        .bind(action.rejected_at.as_ref().map(format_timestamp))
        .bind(action.executed_at.as_ref().map(format_timestamp))
        .bind(action.target_entity_id.as_deref())
        .bind(action.error_message.as_deref())
        .bind(i64::from(action.state_version))
        .bind(format_timestamp(&action.created_at))
        .bind(format_timestamp(&action.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &ActionId) -> Result<Option<AgentAction>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ACTION_COLUMNS} FROM agent_action WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(action_from_row).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected_version: u32,
        action: &AgentAction,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE agent_action SET
                status = ?,
                approved_by = ?,
                approved_at = ?,
                rejected_at = ?,
                executed_at = ?,
                target_entity_id = ?,
                error_message = ?,
                state_version = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(action.status.as_str())
        .bind(action.approved_by.as_deref())
        .bind(action.approved_at.as_ref().map(format_timestamp))
        .bind(action.rejected_at.as_ref().map(format_timestamp))
        .bind(action.executed_at.as_ref().map(format_timestamp))
        .bind(action.target_entity_id.as_deref())
        .bind(action.error_message.as_deref())
        .bind(i64::from(action.state_version))
        .bind(format_timestamp(&action.updated_at))
        .bind(&action.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        status: ActionStatus,
        limit: u32,
    ) -> Result<Vec<AgentAction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS}
             FROM agent_action
             WHERE status = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(action_from_row).collect()
    }

    async fn list_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<AgentAction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS}
             FROM agent_action
             WHERE event_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&event_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(action_from_row).collect()
    }
}

fn action_from_row(row: SqliteRow) -> Result<AgentAction, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ActionStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action status `{status_raw}`")))?;

    let risk_raw = row.try_get::<String, _>("risk_level")?;
    let risk_level = RiskLevel::parse(&risk_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown risk level `{risk_raw}`")))?;

    let content_raw = row.try_get::<String, _>("proposed_content_json")?;

    Ok(AgentAction {
        id: ActionId(row.try_get("id")?),
        event_id: EventId(row.try_get("event_id")?),
        agent_name: row.try_get("agent_name")?,
        action_type: row.try_get("action_type")?,
        person_id: row.try_get::<Option<String>, _>("person_id")?.map(PersonId),
        target_entity: row.try_get("target_entity")?,
        proposed_content: parse_json("proposed_content_json", &content_raw)?,
        risk_level,
        reasoning: row.try_get("reasoning")?,
        status,
        approved_by: row.try_get("approved_by")?,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        rejected_at: parse_optional_timestamp("rejected_at", row.try_get("rejected_at")?)?,
        executed_at: parse_optional_timestamp("executed_at", row.try_get("executed_at")?)?,
        target_entity_id: row.try_get("target_entity_id")?,
        error_message: row.try_get("error_message")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
