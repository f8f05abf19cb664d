use sqlx::{sqlite::SqliteRow, Row};

use rapport_core::domain::person::{Person, PersonId};

use super::{format_timestamp, parse_timestamp, PersonRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPersonRepository {
    pool: DbPool,
}

impl SqlPersonRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PersonRepository for SqlPersonRepository {
    async fn find_by_id(&self, id: &PersonId) -> Result<Option<Person>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, segment, relationship_score, created_at, updated_at
             FROM person
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(person_from_row).transpose()
    }

    async fn save(&self, person: Person) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO person (id, name, segment, relationship_score, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                segment = excluded.segment,
                relationship_score = excluded.relationship_score,
                updated_at = excluded.updated_at",
        )
        .bind(&person.id.0)
        .bind(&person.name)
        .bind(person.segment.as_deref())
        .bind(person.relationship_score.map(i64::from))
        .bind(format_timestamp(&person.created_at))
        .bind(format_timestamp(&person.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn person_from_row(row: SqliteRow) -> Result<Person, RepositoryError> {
    let relationship_score = row
        .try_get::<Option<i64>, _>("relationship_score")?
        .map(|score| {
            i32::try_from(score).map_err(|_| {
                RepositoryError::Decode(format!("invalid relationship_score `{score}`"))
            })
        })
        .transpose()?;

    Ok(Person {
        id: PersonId(row.try_get("id")?),
        name: row.try_get("name")?,
        segment: row.try_get("segment")?,
        relationship_score,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
