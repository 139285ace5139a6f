use sqlx::Row;

use cadence_core::domain::{CampaignId, UserId};

use super::{CampaignRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCampaignRepository {
    pool: DbPool,
}

impl SqlCampaignRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CampaignRepository for SqlCampaignRepository {
    async fn first_active(&self, user_id: &UserId) -> Result<Option<CampaignId>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id FROM campaigns
             WHERE user_id = ? AND active = 1
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.try_get("id").map(CampaignId)).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use cadence_core::chrono::{Duration, Utc};
    use cadence_core::domain::UserId;

    use super::SqlCampaignRepository;
    use crate::repositories::CampaignRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    async fn insert_campaign(pool: &DbPool, id: &str, active: bool, created_at: &str) {
        sqlx::query(
            "INSERT INTO campaigns (id, user_id, name, active, created_at) VALUES (?, 'U-1', ?, ?, ?)",
        )
        .bind(id)
        .bind(format!("campaign {id}"))
        .bind(active)
        .bind(created_at)
        .execute(pool)
        .await
        .expect("insert");
    }

    #[tokio::test]
    async fn oldest_active_campaign_wins() {
        let pool = pool().await;
        let now = Utc::now();
        insert_campaign(&pool, "C-newer", true, &now.to_rfc3339()).await;
        insert_campaign(&pool, "C-older", true, &(now - Duration::days(3)).to_rfc3339()).await;
        insert_campaign(&pool, "C-paused", false, &(now - Duration::days(9)).to_rfc3339()).await;

        let repo = SqlCampaignRepository::new(pool);
        let first = repo.first_active(&UserId("U-1".to_string())).await.expect("query");
        assert_eq!(first.map(|id| id.0), Some("C-older".to_string()));
    }

    #[tokio::test]
    async fn no_active_campaign_means_none() {
        let pool = pool().await;
        insert_campaign(&pool, "C-paused", false, &Utc::now().to_rfc3339()).await;

        let repo = SqlCampaignRepository::new(pool);
        let first = repo.first_active(&UserId("U-1".to_string())).await.expect("query");
        assert!(first.is_none());
    }
}
