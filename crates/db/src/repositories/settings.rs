use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::settings::{AutomationSettings, AutonomyLevel};
use cadence_core::domain::UserId;

use super::{parse_optional_timestamp, parse_u32, RepositoryError, SettingsRepository};
use crate::DbPool;

const COLUMNS: &str = "user_id,
    enabled,
    autonomy,
    auto_pacing,
    auto_queueing,
    auto_followups,
    auto_quarantine,
    daily_call_goal,
    daily_appointment_goal,
    daily_conversation_goal,
    max_daily_actions,
    max_daily_touches,
    last_run_at";

pub struct SqlSettingsRepository {
    pool: DbPool,
}

impl SqlSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SettingsRepository for SqlSettingsRepository {
    async fn list_enabled(&self) -> Result<Vec<AutomationSettings>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM automation_settings WHERE enabled = 1 ORDER BY user_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(settings_from_row).collect()
    }

    async fn find(&self, user_id: &UserId) -> Result<Option<AutomationSettings>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {COLUMNS} FROM automation_settings WHERE user_id = ?"))
                .bind(&user_id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(settings_from_row).transpose()
    }

    async fn save(&self, settings: AutomationSettings) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO automation_settings (
                user_id,
                enabled,
                autonomy,
                auto_pacing,
                auto_queueing,
                auto_followups,
                auto_quarantine,
                daily_call_goal,
                daily_appointment_goal,
                daily_conversation_goal,
                max_daily_actions,
                max_daily_touches,
                last_run_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                enabled = excluded.enabled,
                autonomy = excluded.autonomy,
                auto_pacing = excluded.auto_pacing,
                auto_queueing = excluded.auto_queueing,
                auto_followups = excluded.auto_followups,
                auto_quarantine = excluded.auto_quarantine,
                daily_call_goal = excluded.daily_call_goal,
                daily_appointment_goal = excluded.daily_appointment_goal,
                daily_conversation_goal = excluded.daily_conversation_goal,
                max_daily_actions = excluded.max_daily_actions,
                max_daily_touches = excluded.max_daily_touches,
                last_run_at = excluded.last_run_at",
        )
        .bind(&settings.user_id.0)
        .bind(settings.enabled)
        .bind(settings.autonomy.as_str())
        .bind(settings.auto_pacing)
        .bind(settings.auto_queueing)
        .bind(settings.auto_followups)
        .bind(settings.auto_quarantine)
        .bind(i64::from(settings.daily_call_goal))
        .bind(i64::from(settings.daily_appointment_goal))
        .bind(i64::from(settings.daily_conversation_goal))
        .bind(i64::from(settings.max_daily_actions))
        .bind(i64::from(settings.max_daily_touches))
        .bind(settings.last_run_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_run(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE automation_settings SET last_run_at = ? WHERE user_id = ?")
            .bind(at.to_rfc3339())
            .bind(&user_id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn settings_from_row(row: SqliteRow) -> Result<AutomationSettings, RepositoryError> {
    let autonomy_raw = row.try_get::<String, _>("autonomy")?;
    let autonomy = AutonomyLevel::parse(&autonomy_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown autonomy level `{autonomy_raw}`"))
    })?;

    Ok(AutomationSettings {
        user_id: UserId(row.try_get("user_id")?),
        enabled: row.try_get("enabled")?,
        autonomy,
        auto_pacing: row.try_get("auto_pacing")?,
        auto_queueing: row.try_get("auto_queueing")?,
        auto_followups: row.try_get("auto_followups")?,
        auto_quarantine: row.try_get("auto_quarantine")?,
        daily_call_goal: parse_u32("daily_call_goal", row.try_get("daily_call_goal")?)?,
        daily_appointment_goal: parse_u32(
            "daily_appointment_goal",
            row.try_get("daily_appointment_goal")?,
        )?,
        daily_conversation_goal: parse_u32(
            "daily_conversation_goal",
            row.try_get("daily_conversation_goal")?,
        )?,
        max_daily_actions: parse_u32("max_daily_actions", row.try_get("max_daily_actions")?)?,
        max_daily_touches: parse_u32("max_daily_touches", row.try_get("max_daily_touches")?)?,
        last_run_at: parse_optional_timestamp("last_run_at", row.try_get("last_run_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use cadence_core::chrono::Utc;
    use cadence_core::domain::settings::{AutomationSettings, AutonomyLevel};
    use cadence_core::domain::UserId;

    use super::SqlSettingsRepository;
    use crate::repositories::SettingsRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlSettingsRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlSettingsRepository::new(pool)
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let repo = repo().await;
        let mut settings = AutomationSettings::defaults_for(UserId("U-1".to_string()));
        settings.enabled = true;
        settings.autonomy = AutonomyLevel::FullAuto;
        settings.daily_call_goal = 75;
        settings.last_run_at = Some(Utc::now());

        repo.save(settings.clone()).await.expect("save");
        let found = repo.find(&settings.user_id).await.expect("find").expect("present");
        assert_eq!(found.autonomy, AutonomyLevel::FullAuto);
        assert_eq!(found.daily_call_goal, 75);
        assert!(found.enabled);
    }

    #[tokio::test]
    async fn list_enabled_skips_disabled_users() {
        let repo = repo().await;
        let mut on = AutomationSettings::defaults_for(UserId("U-on".to_string()));
        on.enabled = true;
        let off = AutomationSettings::defaults_for(UserId("U-off".to_string()));

        repo.save(on).await.expect("save on");
        repo.save(off).await.expect("save off");

        let enabled = repo.list_enabled().await.expect("list");
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].user_id.0, "U-on");
    }

    #[tokio::test]
    async fn record_run_stamps_last_run_only() {
        let repo = repo().await;
        let mut settings = AutomationSettings::defaults_for(UserId("U-1".to_string()));
        settings.enabled = true;
        repo.save(settings.clone()).await.expect("save");

        let at = Utc::now();
        repo.record_run(&settings.user_id, at).await.expect("record");

        let found = repo.find(&settings.user_id).await.expect("find").expect("present");
        assert_eq!(found.last_run_at.map(|v| v.timestamp()), Some(at.timestamp()));
        assert!(found.enabled);
    }
}
