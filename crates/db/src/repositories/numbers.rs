use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::number::PhoneNumber;
use cadence_core::domain::{PhoneNumberId, UserId};

use super::{parse_optional_timestamp, parse_u32, NumberRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNumberRepository {
    pool: DbPool,
}

impl SqlNumberRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NumberRepository for SqlNumberRepository {
    async fn list_active(&self, user_id: &UserId) -> Result<Vec<PhoneNumber>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, number, active, spam_score, quarantined_until
             FROM phone_numbers
             WHERE user_id = ? AND active = 1
             ORDER BY id",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(number_from_row).collect()
    }

    async fn save(&self, number: PhoneNumber) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO phone_numbers (id, user_id, number, active, spam_score, quarantined_until)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                active = excluded.active,
                spam_score = excluded.spam_score,
                quarantined_until = excluded.quarantined_until",
        )
        .bind(&number.id.0)
        .bind(&number.user_id.0)
        .bind(&number.number)
        .bind(number.active)
        .bind(i64::from(number.spam_score))
        .bind(number.quarantined_until.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn quarantine(
        &self,
        id: &PhoneNumberId,
        until: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE phone_numbers SET quarantined_until = ? WHERE id = ?")
            .bind(until.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn number_from_row(row: SqliteRow) -> Result<PhoneNumber, RepositoryError> {
    Ok(PhoneNumber {
        id: PhoneNumberId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        number: row.try_get("number")?,
        active: row.try_get("active")?,
        spam_score: parse_u32("spam_score", row.try_get("spam_score")?)?,
        quarantined_until: parse_optional_timestamp(
            "quarantined_until",
            row.try_get("quarantined_until")?,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use cadence_core::chrono::{Duration, Utc};
    use cadence_core::domain::number::PhoneNumber;
    use cadence_core::domain::{PhoneNumberId, UserId};

    use super::SqlNumberRepository;
    use crate::repositories::NumberRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlNumberRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlNumberRepository::new(pool)
    }

    fn number(id: &str, active: bool, spam_score: u32) -> PhoneNumber {
        PhoneNumber {
            id: PhoneNumberId(id.to_string()),
            user_id: UserId("U-1".to_string()),
            number: "+15550100".to_string(),
            active,
            spam_score,
            quarantined_until: None,
        }
    }

    #[tokio::test]
    async fn only_active_numbers_are_listed() {
        let repo = repo().await;
        repo.save(number("N-1", true, 10)).await.expect("save");
        repo.save(number("N-2", false, 90)).await.expect("save");

        let listed = repo.list_active(&UserId("U-1".to_string())).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.0, "N-1");
    }

    #[tokio::test]
    async fn quarantine_stamps_the_deadline() {
        let repo = repo().await;
        let now = Utc::now();
        repo.save(number("N-1", true, 85)).await.expect("save");

        let until = now + Duration::days(30);
        repo.quarantine(&PhoneNumberId("N-1".to_string()), until).await.expect("quarantine");

        let listed = repo.list_active(&UserId("U-1".to_string())).await.expect("list");
        assert_eq!(listed[0].quarantined_until.map(|t| t.to_rfc3339()), Some(until.to_rfc3339()));
        assert!(listed[0].is_quarantined(now));
        assert!(!listed[0].is_quarantined(until + Duration::hours(1)));
    }
}
