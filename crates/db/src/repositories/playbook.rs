use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::journey::JourneyStage;
use cadence_core::domain::playbook::{PlaybookRule, RuleActionKind};
use cadence_core::domain::{RuleId, UserId};

use super::{parse_u32, PlaybookRepository, RepositoryError};
use crate::DbPool;

const COLUMNS: &str = "id,
    user_id,
    stage,
    priority,
    min_touches,
    max_touches,
    min_days_in_stage,
    max_days_in_stage,
    min_interest,
    max_interest,
    requires_no_callback,
    action,
    message_template,
    move_to_stage,
    delay_hours,
    respect_calling_window,
    active";

pub struct SqlPlaybookRepository {
    pool: DbPool,
}

impl SqlPlaybookRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PlaybookRepository for SqlPlaybookRepository {
    async fn list_active(&self, user_id: &UserId) -> Result<Vec<PlaybookRule>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM playbook_rules
             WHERE user_id = ? AND active = 1
             ORDER BY stage, priority, id"
        ))
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(rule_from_row).collect()
    }

    async fn save(&self, rule: PlaybookRule) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO playbook_rules (
                id,
                user_id,
                stage,
                priority,
                min_touches,
                max_touches,
                min_days_in_stage,
                max_days_in_stage,
                min_interest,
                max_interest,
                requires_no_callback,
                action,
                message_template,
                move_to_stage,
                delay_hours,
                respect_calling_window,
                active
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                stage = excluded.stage,
                priority = excluded.priority,
                min_touches = excluded.min_touches,
                max_touches = excluded.max_touches,
                min_days_in_stage = excluded.min_days_in_stage,
                max_days_in_stage = excluded.max_days_in_stage,
                min_interest = excluded.min_interest,
                max_interest = excluded.max_interest,
                requires_no_callback = excluded.requires_no_callback,
                action = excluded.action,
                message_template = excluded.message_template,
                move_to_stage = excluded.move_to_stage,
                delay_hours = excluded.delay_hours,
                respect_calling_window = excluded.respect_calling_window,
                active = excluded.active",
        )
        .bind(&rule.id.0)
        .bind(&rule.user_id.0)
        .bind(rule.stage.as_str())
        .bind(i64::from(rule.priority))
        .bind(i64::from(rule.min_touches))
        .bind(i64::from(rule.max_touches))
        .bind(i64::from(rule.min_days_in_stage))
        .bind(i64::from(rule.max_days_in_stage))
        .bind(i64::from(rule.min_interest))
        .bind(i64::from(rule.max_interest))
        .bind(rule.requires_no_callback)
        .bind(rule.action.as_str())
        .bind(rule.message_template.as_deref())
        .bind(rule.move_to_stage.map(|value| value.as_str()))
        .bind(i64::from(rule.delay_hours))
        .bind(rule.respect_calling_window)
        .bind(rule.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn rule_from_row(row: SqliteRow) -> Result<PlaybookRule, RepositoryError> {
    let stage_raw = row.try_get::<String, _>("stage")?;
    let stage = JourneyStage::parse(&stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown rule stage `{stage_raw}`")))?;

    let action_raw = row.try_get::<String, _>("action")?;
    let action = RuleActionKind::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown rule action `{action_raw}`")))?;

    let move_to_stage = row
        .try_get::<Option<String>, _>("move_to_stage")?
        .map(|value| {
            JourneyStage::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown target stage `{value}`")))
        })
        .transpose()?;

    let min_interest = parse_u32("min_interest", row.try_get("min_interest")?)?;
    let max_interest = parse_u32("max_interest", row.try_get("max_interest")?)?;

    Ok(PlaybookRule {
        id: RuleId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        stage,
        priority: parse_u32("priority", row.try_get("priority")?)?,
        min_touches: parse_u32("min_touches", row.try_get("min_touches")?)?,
        max_touches: parse_u32("max_touches", row.try_get("max_touches")?)?,
        min_days_in_stage: parse_u32("min_days_in_stage", row.try_get("min_days_in_stage")?)?,
        max_days_in_stage: parse_u32("max_days_in_stage", row.try_get("max_days_in_stage")?)?,
        min_interest: u8::try_from(min_interest).map_err(|_| {
            RepositoryError::Decode(format!("min_interest out of range: {min_interest}"))
        })?,
        max_interest: u8::try_from(max_interest).map_err(|_| {
            RepositoryError::Decode(format!("max_interest out of range: {max_interest}"))
        })?,
        requires_no_callback: row.try_get("requires_no_callback")?,
        action,
        message_template: row.try_get("message_template")?,
        move_to_stage,
        delay_hours: parse_u32("delay_hours", row.try_get("delay_hours")?)?,
        respect_calling_window: row.try_get("respect_calling_window")?,
        active: row.try_get("active")?,
    })
}

#[cfg(test)]
mod tests {
    use cadence_core::domain::journey::JourneyStage;
    use cadence_core::domain::playbook::{PlaybookRule, RuleActionKind};
    use cadence_core::domain::{RuleId, UserId};

    use super::SqlPlaybookRepository;
    use crate::repositories::PlaybookRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlPlaybookRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlPlaybookRepository::new(pool)
    }

    fn rule(id: &str, priority: u32, active: bool) -> PlaybookRule {
        PlaybookRule {
            id: RuleId(id.to_string()),
            user_id: UserId("U-1".to_string()),
            stage: JourneyStage::Stalled,
            priority,
            min_touches: 1,
            max_touches: 10,
            min_days_in_stage: 0,
            max_days_in_stage: 30,
            min_interest: 2,
            max_interest: 8,
            requires_no_callback: true,
            action: RuleActionKind::AiSms,
            message_template: Some("Nudge {first_name}".to_string()),
            move_to_stage: Some(JourneyStage::Nurturing),
            delay_hours: 48,
            respect_calling_window: true,
            active,
        }
    }

    #[tokio::test]
    async fn active_rules_come_back_ordered_by_priority() {
        let repo = repo().await;
        repo.save(rule("R-late", 9, true)).await.expect("save");
        repo.save(rule("R-first", 1, true)).await.expect("save");
        repo.save(rule("R-off", 0, false)).await.expect("save");

        let rules = repo.list_active(&UserId("U-1".to_string())).await.expect("list");
        let ids: Vec<&str> = rules.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["R-first", "R-late"]);
    }

    #[tokio::test]
    async fn rule_fields_round_trip() {
        let repo = repo().await;
        repo.save(rule("R-1", 5, true)).await.expect("save");

        let rules = repo.list_active(&UserId("U-1".to_string())).await.expect("list");
        let found = &rules[0];
        assert_eq!(found.action, RuleActionKind::AiSms);
        assert_eq!(found.move_to_stage, Some(JourneyStage::Nurturing));
        assert_eq!(found.delay_hours, 48);
        assert!(found.requires_no_callback);
        assert_eq!(found.message_template.as_deref(), Some("Nudge {first_name}"));
    }
}
