use sqlx::{sqlite::SqliteRow, Row};

use rapport_core::domain::graph::{
    ContextEdge, ContextNode, DecisionTrace, EdgeId, EntityRef, NodeId, TraceId, TraceInputs,
    TraceOutcome, TraceType,
};
use rapport_core::reasoning::GraphReader;

use super::{
    format_timestamp, parse_json, parse_timestamp, to_json, ContextGraphRepository,
    RepositoryError,
};
use crate::DbPool;

const TRACE_COLUMNS: &str = "
    id,
    trace_type,
    actor,
    action,
    entity_type,
    entity_id,
    context_node_id,
    inputs_json,
    reasoning,
    outcome_json,
    confidence,
    reversible,
    linked_trace_id,
    created_at";

pub struct SqlContextGraphRepository {
    pool: DbPool,
}

impl SqlContextGraphRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GraphReader for SqlContextGraphRepository {
    type Error = RepositoryError;

    async fn node_by_id(&self, id: &NodeId) -> Result<Option<ContextNode>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, node_type, entity_id, label, summary, created_at
             FROM context_node
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(node_from_row).transpose()
    }

    async fn node_by_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ContextNode>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, node_type, entity_id, label, summary, created_at
             FROM context_node
             WHERE node_type = ? AND entity_id = ?",
        )
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(node_from_row).transpose()
    }

    async fn edges_from(&self, id: &NodeId) -> Result<Vec<ContextEdge>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, from_node_id, to_node_id, edge_type, reasoning, weight, created_at
             FROM context_edge
             WHERE from_node_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(edge_from_row).collect()
    }

    async fn edges_to(&self, id: &NodeId) -> Result<Vec<ContextEdge>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, from_node_id, to_node_id, edge_type, reasoning, weight, created_at
             FROM context_edge
             WHERE to_node_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(edge_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ContextGraphRepository for SqlContextGraphRepository {
    async fn get_or_create_node(&self, node: &ContextNode) -> Result<ContextNode, RepositoryError> {
        sqlx::query(
            "INSERT INTO context_node (id, node_type, entity_id, label, summary, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(node_type, entity_id) DO NOTHING",
        )
        .bind(&node.id.0)
        .bind(&node.node_type)
        .bind(&node.entity_id)
        .bind(&node.label)
        .bind(node.summary.as_deref())
        .bind(format_timestamp(&node.created_at))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, node_type, entity_id, label, summary, created_at
             FROM context_node
             WHERE node_type = ? AND entity_id = ?",
        )
        .bind(&node.node_type)
        .bind(&node.entity_id)
        .fetch_one(&self.pool)
        .await?;

        node_from_row(row)
    }

    async fn insert_edge(&self, edge: &ContextEdge) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO context_edge (
                id, from_node_id, to_node_id, edge_type, reasoning, weight, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&edge.id.0)
        .bind(&edge.from_node_id.0)
        .bind(&edge.to_node_id.0)
        .bind(&edge.edge_type)
        .bind(edge.reasoning.as_deref())
        .bind(edge.weight)
        .bind(format_timestamp(&edge.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_trace(&self, trace: &DecisionTrace) -> Result<(), RepositoryError> {
        let inputs_json = trace.inputs.as_ref().map(|inputs| to_json("inputs_json", inputs));
        let outcome_json = trace.outcome.as_ref().map(|outcome| to_json("outcome_json", outcome));

        sqlx::query(&format!(
            "INSERT INTO decision_trace ({TRACE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&trace.id.0)
        .bind(trace.trace_type.as_str())
        .bind(&trace.actor)
        .bind(&trace.action)
        .bind(trace.entity_type.as_deref())
        .bind(trace.entity_id.as_deref())
        .bind(trace.context_node_id.as_ref().map(|id| id.0.as_str()))
        .bind(inputs_json.transpose()?)
        .bind(trace.reasoning.as_deref())
        .bind(outcome_json.transpose()?)
        .bind(trace.confidence.map(i64::from))
        .bind(trace.reversible)
        .bind(trace.linked_trace_id.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(&trace.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn traces_for_entity(
        &self,
        entity: &EntityRef,
        limit: u32,
    ) -> Result<Vec<DecisionTrace>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRACE_COLUMNS}
             FROM decision_trace
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        ))
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trace_from_row).collect()
    }
}

fn node_from_row(row: SqliteRow) -> Result<ContextNode, RepositoryError> {
    Ok(ContextNode {
        id: NodeId(row.try_get("id")?),
        node_type: row.try_get("node_type")?,
        entity_id: row.try_get("entity_id")?,
        label: row.try_get("label")?,
        summary: row.try_get("summary")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn edge_from_row(row: SqliteRow) -> Result<ContextEdge, RepositoryError> {
    Ok(ContextEdge {
        id: EdgeId(row.try_get("id")?),
        from_node_id: NodeId(row.try_get("from_node_id")?),
        to_node_id: NodeId(row.try_get("to_node_id")?),
        edge_type: row.try_get("edge_type")?,
        reasoning: row.try_get("reasoning")?,
        weight: row.try_get("weight")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn trace_from_row(row: SqliteRow) -> Result<DecisionTrace, RepositoryError> {
    let trace_type_raw = row.try_get::<String, _>("trace_type")?;
    let trace_type = TraceType::parse(&trace_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown trace type `{trace_type_raw}`")))?;

    let inputs = row
        .try_get::<Option<String>, _>("inputs_json")?
        .map(|raw| parse_json::<TraceInputs>("inputs_json", &raw))
        .transpose()?;
    let outcome = row
        .try_get::<Option<String>, _>("outcome_json")?
        .map(|raw| parse_json::<TraceOutcome>("outcome_json", &raw))
        .transpose()?;
    let confidence = row
        .try_get::<Option<i64>, _>("confidence")?
        .map(|value| {
            u8::try_from(value)
                .map_err(|_| RepositoryError::Decode(format!("invalid confidence `{value}`")))
        })
        .transpose()?;

    Ok(DecisionTrace {
        id: TraceId(row.try_get("id")?),
        trace_type,
        actor: row.try_get("actor")?,
        action: row.try_get("action")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        context_node_id: row.try_get::<Option<String>, _>("context_node_id")?.map(NodeId),
        inputs,
        reasoning: row.try_get("reasoning")?,
        outcome,
        confidence,
        reversible: row.try_get("reversible")?,
        linked_trace_id: row.try_get::<Option<String>, _>("linked_trace_id")?.map(TraceId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
