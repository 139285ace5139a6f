use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::queue::{ActionQueueEntry, ActionSource, ActionStatus, ActionType};
use cadence_core::domain::{ActionId, LeadId, UserId};

use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, ActionQueueRepository, RepositoryError,
};
use crate::DbPool;

const COLUMNS: &str = "id,
    user_id,
    lead_id,
    action_type,
    params_json,
    priority,
    status,
    reasoning,
    source,
    idempotency_key,
    result_json,
    error,
    created_at,
    approved_at,
    executed_at,
    expires_at";

pub struct SqlActionQueueRepository {
    pool: DbPool,
}

impl SqlActionQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActionQueueRepository for SqlActionQueueRepository {
    async fn find(&self, id: &ActionId) -> Result<Option<ActionQueueEntry>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM action_queue WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(entry_from_row).transpose()
    }

    async fn save(&self, entry: ActionQueueEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO action_queue (
                id,
                user_id,
                lead_id,
                action_type,
                params_json,
                priority,
                status,
                reasoning,
                source,
                idempotency_key,
                result_json,
                error,
                created_at,
                approved_at,
                executed_at,
                expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                result_json = excluded.result_json,
                error = excluded.error,
                approved_at = excluded.approved_at,
                executed_at = excluded.executed_at",
        )
        .bind(&entry.id.0)
        .bind(&entry.user_id.0)
        .bind(entry.lead_id.as_ref().map(|id| id.0.as_str()))
        .bind(entry.action_type.as_str())
        .bind(&entry.params_json)
        .bind(i64::from(entry.priority))
        .bind(entry.status.as_str())
        .bind(&entry.reasoning)
        .bind(entry.source.as_str())
        .bind(entry.idempotency_key.as_deref())
        .bind(entry.result_json.as_deref())
        .bind(entry.error.as_deref())
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.approved_at.map(|value| value.to_rfc3339()))
        .bind(entry.executed_at.map(|value| value.to_rfc3339()))
        .bind(entry.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_approved(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<ActionQueueEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM action_queue
             WHERE user_id = ? AND status = 'approved'
             ORDER BY priority ASC, created_at ASC
             LIMIT ?"
        ))
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn list_expired_pending(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionQueueEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM action_queue
             WHERE user_id = ? AND status = 'pending' AND expires_at <= ?
             ORDER BY created_at ASC"
        ))
        .bind(&user_id.0)
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn count_created_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM action_queue WHERE user_id = ? AND created_at >= ?",
        )
        .bind(&user_id.0)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        parse_u32("count", row.try_get("count")?)
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &UserId,
        key: &str,
    ) -> Result<Option<ActionQueueEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM action_queue
             WHERE user_id = ? AND idempotency_key = ? AND status = 'completed'
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(&user_id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }
}

fn entry_from_row(row: SqliteRow) -> Result<ActionQueueEntry, RepositoryError> {
    let type_raw = row.try_get::<String, _>("action_type")?;
    let action_type = ActionType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action type `{type_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = ActionStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action status `{status_raw}`")))?;

    let source_raw = row.try_get::<String, _>("source")?;
    let source = ActionSource::parse(&source_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action source `{source_raw}`")))?;

    Ok(ActionQueueEntry {
        id: ActionId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        lead_id: row.try_get::<Option<String>, _>("lead_id")?.map(LeadId),
        action_type,
        params_json: row.try_get("params_json")?,
        priority: parse_u32("priority", row.try_get("priority")?)?,
        status,
        reasoning: row.try_get("reasoning")?,
        source,
        idempotency_key: row.try_get("idempotency_key")?,
        result_json: row.try_get("result_json")?,
        error: row.try_get("error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        executed_at: parse_optional_timestamp("executed_at", row.try_get("executed_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
    })
}
