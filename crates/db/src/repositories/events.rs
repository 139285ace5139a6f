use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::audit::{EngineEvent, EventCategory};
use cadence_core::domain::{LeadId, UserId};

use super::{parse_timestamp, EventRepository, RepositoryError};
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
    async fn append(&self, event: EngineEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|err| RepositoryError::Decode(format!("metadata encode failed: {err}")))?;

        sqlx::query(
            "INSERT INTO journey_events (
                event_id, user_id, lead_id, category, event_type, detail, metadata_json, occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.user_id.0)
        .bind(event.lead_id.as_ref().map(|id| id.0.as_str()))
        .bind(event.category.as_str())
        .bind(&event.event_type)
        .bind(&event.detail)
        .bind(metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recent(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<EngineEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, user_id, lead_id, category, event_type, detail, metadata_json, occurred_at
             FROM journey_events
             WHERE user_id = ?
             ORDER BY occurred_at DESC
             LIMIT ?",
        )
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<EngineEvent, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = EventCategory::parse(&category_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown event category `{category_raw}`"))
    })?;

    let metadata_json = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|err| RepositoryError::Decode(format!("invalid metadata_json: {err}")))?;

    Ok(EngineEvent {
        event_id: row.try_get("event_id")?,
        user_id: UserId(row.try_get("user_id")?),
        lead_id: row.try_get::<Option<String>, _>("lead_id")?.map(LeadId),
        category,
        event_type: row.try_get("event_type")?,
        detail: row.try_get("detail")?,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
