use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use rapport_core::domain::event::{
    EventCategory, EventId, EventPayload, EventType, SourceEntity, SystemEvent,
};
use rapport_core::domain::person::PersonId;

use super::{
    format_timestamp, parse_json, parse_timestamp, to_json, EventRepository, EventStats,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlEventRepository {
    pool: DbPool,
}

impl SqlEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EventRepository for SqlEventRepository {
    async fn insert(&self, event: &SystemEvent) -> Result<(), RepositoryError> {
        let payload = event
            .payload
            .to_raw()
            .map_err(|error| RepositoryError::Encode(format!("event payload: {error}")))?;

        sqlx::query(
            "INSERT INTO system_event (
                id,
                event_type,
                event_category,
                source_entity_type,
                source_entity_id,
                person_id,
                payload_json,
                processed,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id.0)
        .bind(event.event_type.as_str())
        .bind(event.event_category.as_str())
        .bind(&event.source.entity_type)
        .bind(&event.source.entity_id)
        .bind(event.person_id.as_ref().map(|id| id.0.as_str()))
        .bind(to_json("payload_json", &payload)?)
        .bind(event.processed)
        .bind(format_timestamp(&event.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &EventId) -> Result<Option<SystemEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                event_type,
                event_category,
                source_entity_type,
                source_entity_id,
                person_id,
                payload_json,
                processed,
                created_at
             FROM system_event
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(event_from_row).transpose()
    }

    async fn mark_processed(&self, id: &EventId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE system_event SET processed = 1 WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<EventStats, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                event_type,
                event_category,
                COUNT(*) AS total,
                SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END) AS unprocessed
             FROM system_event
             GROUP BY event_type, event_category",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = EventStats::default();
        for row in rows {
            let total = count("total", row.try_get("total")?)?;
            let unprocessed = count("unprocessed", row.try_get("unprocessed")?)?;

            stats.total += total;
            stats.unprocessed += unprocessed;
            *stats.by_type.entry(row.try_get("event_type")?).or_default() += total;
            *stats.by_category.entry(row.try_get("event_category")?).or_default() += total;
        }

        Ok(stats)
    }

    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM system_event WHERE processed = 1 AND created_at < ?")
            .bind(format_timestamp(&cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn count(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative count in `{column}`: {value}")))
}

fn event_from_row(row: SqliteRow) -> Result<SystemEvent, RepositoryError> {
    let event_type_raw = row.try_get::<String, _>("event_type")?;
    let event_type = EventType::parse(&event_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown event type `{event_type_raw}`")))?;

    let category_raw = row.try_get::<String, _>("event_category")?;
    let event_category = EventCategory::parse(&category_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown event category `{category_raw}`"))
    })?;

    let payload_raw = row.try_get::<String, _>("payload_json")?;
    let payload = EventPayload::from_raw(
        event_type.as_str(),
        parse_json::<serde_json::Value>("payload_json", &payload_raw)?,
    )
    .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(SystemEvent {
        id: EventId(row.try_get("id")?),
        event_type,
        event_category,
        source: SourceEntity::new(
            row.try_get::<String, _>("source_entity_type")?,
            row.try_get::<String, _>("source_entity_id")?,
        ),
        person_id: row.try_get::<Option<String>, _>("person_id")?.map(PersonId),
        payload,
        processed: row.try_get("processed")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
