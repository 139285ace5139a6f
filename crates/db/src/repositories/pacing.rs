use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::pacing::PacingState;
use cadence_core::domain::UserId;

use super::{parse_timestamp, parse_u32, PacingRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPacingRepository {
    pool: DbPool,
}

impl SqlPacingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PacingRepository for SqlPacingRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<PacingState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, calls_per_minute, updated_at FROM pacing_states WHERE user_id = ?",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(state_from_row).transpose()
    }

    async fn save(&self, state: PacingState) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO pacing_states (user_id, calls_per_minute, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                calls_per_minute = excluded.calls_per_minute,
                updated_at = excluded.updated_at",
        )
        .bind(&state.user_id.0)
        .bind(i64::from(state.calls_per_minute))
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn state_from_row(row: SqliteRow) -> Result<PacingState, RepositoryError> {
    Ok(PacingState {
        user_id: UserId(row.try_get("user_id")?),
        calls_per_minute: parse_u32("calls_per_minute", row.try_get("calls_per_minute")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use cadence_core::chrono::{Duration, Utc};
    use cadence_core::domain::pacing::PacingState;
    use cadence_core::domain::UserId;

    use super::SqlPacingRepository;
    use crate::repositories::PacingRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlPacingRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlPacingRepository::new(pool)
    }

    #[tokio::test]
    async fn missing_state_reads_back_as_none() {
        let repo = repo().await;
        let found = repo.find(&UserId("U-1".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn saving_twice_keeps_the_latest_rate() {
        let repo = repo().await;
        let user = UserId("U-1".to_string());
        let now = Utc::now();

        repo.save(PacingState::default_for(user.clone(), now - Duration::minutes(10)))
            .await
            .expect("save");
        repo.save(PacingState { user_id: user.clone(), calls_per_minute: 25, updated_at: now })
            .await
            .expect("save");

        let found = repo.find(&user).await.expect("find").expect("present");
        assert_eq!(found.calls_per_minute, 25);
        assert_eq!(found.updated_at.to_rfc3339(), now.to_rfc3339());
    }
}
