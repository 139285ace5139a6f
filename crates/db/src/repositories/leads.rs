use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::lead::{Lead, LeadStatus};
use cadence_core::domain::{LeadId, UserId};

use super::{parse_optional_timestamp, parse_timestamp, LeadRepository, RepositoryError};
use crate::DbPool;

const COLUMNS: &str = "id,
    user_id,
    first_name,
    phone,
    status,
    do_not_call,
    last_contacted_at,
    next_callback_at,
    priority_score,
    created_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM leads WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn list_actionable(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM leads
             WHERE user_id = ?
               AND do_not_call = 0
               AND status IN ('new', 'contacted', 'qualified', 'callback')
             ORDER BY priority_score DESC, created_at ASC
             LIMIT ?"
        ))
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(lead_from_row).collect()
    }

    async fn list_stale_contacts(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM leads
             WHERE user_id = ?
               AND do_not_call = 0
               AND status = 'contacted'
               AND last_contacted_at IS NOT NULL
             ORDER BY last_contacted_at ASC
             LIMIT ?"
        ))
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(lead_from_row).collect()
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO leads (
                id,
                user_id,
                first_name,
                phone,
                status,
                do_not_call,
                last_contacted_at,
                next_callback_at,
                priority_score,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                first_name = excluded.first_name,
                phone = excluded.phone,
                status = excluded.status,
                do_not_call = excluded.do_not_call,
                last_contacted_at = excluded.last_contacted_at,
                next_callback_at = excluded.next_callback_at,
                priority_score = excluded.priority_score",
        )
        .bind(&lead.id.0)
        .bind(&lead.user_id.0)
        .bind(&lead.first_name)
        .bind(&lead.phone)
        .bind(lead.status.as_str())
        .bind(lead.do_not_call)
        .bind(lead.last_contacted_at.map(|value| value.to_rfc3339()))
        .bind(lead.next_callback_at.map(|value| value.to_rfc3339()))
        .bind(lead.priority_score)
        .bind(lead.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_score(&self, id: &LeadId, score: f64) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE leads SET priority_score = ? WHERE id = ?")
            .bind(score)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn touch_contacted(
        &self,
        id: &LeadId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE leads SET last_contacted_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = LeadStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead status `{status_raw}`")))?;

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        first_name: row.try_get("first_name")?,
        phone: row.try_get("phone")?,
        status,
        do_not_call: row.try_get("do_not_call")?,
        last_contacted_at: parse_optional_timestamp(
            "last_contacted_at",
            row.try_get("last_contacted_at")?,
        )?,
        next_callback_at: parse_optional_timestamp(
            "next_callback_at",
            row.try_get("next_callback_at")?,
        )?,
        priority_score: row.try_get("priority_score")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use cadence_core::chrono::{Duration, Utc};
    use cadence_core::domain::lead::{Lead, LeadStatus};
    use cadence_core::domain::{LeadId, UserId};

    use super::SqlLeadRepository;
    use crate::repositories::LeadRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlLeadRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlLeadRepository::new(pool)
    }

    fn lead(id: &str, status: LeadStatus, score: f64) -> Lead {
        Lead {
            id: LeadId(id.to_string()),
            user_id: UserId("U-1".to_string()),
            first_name: "Dana".to_string(),
            phone: "+15550100".to_string(),
            status,
            do_not_call: false,
            last_contacted_at: None,
            next_callback_at: None,
            priority_score: score,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn actionable_list_orders_by_score_and_filters_status() {
        let repo = repo().await;
        repo.save(lead("L-low", LeadStatus::New, 20.0)).await.expect("save");
        repo.save(lead("L-high", LeadStatus::Qualified, 90.0)).await.expect("save");
        repo.save(lead("L-won", LeadStatus::Converted, 99.0)).await.expect("save");

        let mut dnc = lead("L-dnc", LeadStatus::New, 95.0);
        dnc.do_not_call = true;
        repo.save(dnc).await.expect("save");

        let found = repo.list_actionable(&UserId("U-1".to_string()), 10).await.expect("list");
        let ids: Vec<&str> = found.iter().map(|l| l.id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-high", "L-low"]);
    }

    #[tokio::test]
    async fn stale_contacts_come_back_oldest_first() {
        let repo = repo().await;
        let mut older = lead("L-old", LeadStatus::Contacted, 10.0);
        older.last_contacted_at = Some(Utc::now() - Duration::days(5));
        let mut newer = lead("L-new", LeadStatus::Contacted, 10.0);
        newer.last_contacted_at = Some(Utc::now() - Duration::days(2));
        repo.save(newer).await.expect("save");
        repo.save(older).await.expect("save");

        let found =
            repo.list_stale_contacts(&UserId("U-1".to_string()), 10).await.expect("list");
        let ids: Vec<&str> = found.iter().map(|l| l.id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-old", "L-new"]);
    }

    #[tokio::test]
    async fn score_and_contact_updates_stick() {
        let repo = repo().await;
        repo.save(lead("L-1", LeadStatus::New, 0.0)).await.expect("save");

        repo.update_score(&LeadId("L-1".to_string()), 72.5).await.expect("score");
        let at = Utc::now();
        repo.touch_contacted(&LeadId("L-1".to_string()), at).await.expect("touch");

        let found = repo.find(&LeadId("L-1".to_string())).await.expect("find").expect("present");
        assert_eq!(found.priority_score, 72.5);
        assert_eq!(found.last_contacted_at.map(|v| v.timestamp()), Some(at.timestamp()));
    }
}
