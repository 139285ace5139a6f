use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::journey::{ContactChannel, JourneyStage, JourneyState, SentimentTrend};
use cadence_core::domain::playbook::RuleActionKind;
use cadence_core::domain::{LeadId, UserId};

use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, JourneyRepository, RepositoryError,
};
use crate::DbPool;

const COLUMNS: &str = "lead_id,
    user_id,
    stage,
    call_attempts,
    calls_answered,
    sms_sent,
    sms_received,
    interest_level,
    sentiment,
    best_hour_to_call,
    preferred_channel,
    stage_entered_at,
    stage_change_count,
    longest_silence_days,
    next_action_type,
    next_action_at,
    next_action_reason,
    callback_reminder_sent_at,
    callback_call_queued_at,
    updated_at";

pub struct SqlJourneyRepository {
    pool: DbPool,
}

impl SqlJourneyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JourneyRepository for SqlJourneyRepository {
    async fn find(&self, lead_id: &LeadId) -> Result<Option<JourneyState>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM journey_states WHERE lead_id = ?"))
            .bind(&lead_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(state_from_row).transpose()
    }

    async fn save(&self, state: JourneyState) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO journey_states (
                lead_id,
                user_id,
                stage,
                call_attempts,
                calls_answered,
                sms_sent,
                sms_received,
                interest_level,
                sentiment,
                best_hour_to_call,
                preferred_channel,
                stage_entered_at,
                stage_change_count,
                longest_silence_days,
                next_action_type,
                next_action_at,
                next_action_reason,
                callback_reminder_sent_at,
                callback_call_queued_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(lead_id) DO UPDATE SET
                user_id = excluded.user_id,
                stage = excluded.stage,
                call_attempts = excluded.call_attempts,
                calls_answered = excluded.calls_answered,
                sms_sent = excluded.sms_sent,
                sms_received = excluded.sms_received,
                interest_level = excluded.interest_level,
                sentiment = excluded.sentiment,
                best_hour_to_call = excluded.best_hour_to_call,
                preferred_channel = excluded.preferred_channel,
                stage_entered_at = excluded.stage_entered_at,
                stage_change_count = excluded.stage_change_count,
                longest_silence_days = excluded.longest_silence_days,
                next_action_type = excluded.next_action_type,
                next_action_at = excluded.next_action_at,
                next_action_reason = excluded.next_action_reason,
                callback_reminder_sent_at = excluded.callback_reminder_sent_at,
                callback_call_queued_at = excluded.callback_call_queued_at,
                updated_at = excluded.updated_at",
        )
        .bind(&state.lead_id.0)
        .bind(&state.user_id.0)
        .bind(state.stage.as_str())
        .bind(i64::from(state.call_attempts))
        .bind(i64::from(state.calls_answered))
        .bind(i64::from(state.sms_sent))
        .bind(i64::from(state.sms_received))
        .bind(i64::from(state.interest_level))
        .bind(state.sentiment.as_str())
        .bind(state.best_hour_to_call.map(i64::from))
        .bind(state.preferred_channel.as_str())
        .bind(state.stage_entered_at.to_rfc3339())
        .bind(i64::from(state.stage_change_count))
        .bind(i64::from(state.longest_silence_days))
        .bind(state.next_action_type.map(|value| value.as_str()))
        .bind(state.next_action_at.map(|value| value.to_rfc3339()))
        .bind(state.next_action_reason.as_deref())
        .bind(state.callback_reminder_sent_at.map(|value| value.to_rfc3339()))
        .bind(state.callback_call_queued_at.map(|value| value.to_rfc3339()))
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_due(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<JourneyState>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM journey_states
             WHERE user_id = ?
               AND stage NOT IN ('closed_won', 'closed_lost', 'dormant')
               AND (next_action_at IS NULL OR next_action_at <= ?)
             ORDER BY next_action_at IS NOT NULL, next_action_at ASC
             LIMIT ?"
        ))
        .bind(&user_id.0)
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(state_from_row).collect()
    }
}

fn state_from_row(row: SqliteRow) -> Result<JourneyState, RepositoryError> {
    let stage_raw = row.try_get::<String, _>("stage")?;
    let stage = JourneyStage::parse(&stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown journey stage `{stage_raw}`")))?;

    let sentiment_raw = row.try_get::<String, _>("sentiment")?;
    let sentiment = SentimentTrend::parse(&sentiment_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sentiment `{sentiment_raw}`")))?;

    let channel_raw = row.try_get::<String, _>("preferred_channel")?;
    let preferred_channel = ContactChannel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let next_action_type = row
        .try_get::<Option<String>, _>("next_action_type")?
        .map(|value| {
            RuleActionKind::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown action kind `{value}`")))
        })
        .transpose()?;

    let interest = parse_u32("interest_level", row.try_get("interest_level")?)?;

    Ok(JourneyState {
        lead_id: LeadId(row.try_get("lead_id")?),
        user_id: UserId(row.try_get("user_id")?),
        stage,
        call_attempts: parse_u32("call_attempts", row.try_get("call_attempts")?)?,
        calls_answered: parse_u32("calls_answered", row.try_get("calls_answered")?)?,
        sms_sent: parse_u32("sms_sent", row.try_get("sms_sent")?)?,
        sms_received: parse_u32("sms_received", row.try_get("sms_received")?)?,
        interest_level: u8::try_from(interest)
            .map_err(|_| RepositoryError::Decode(format!("interest out of range: {interest}")))?,
        sentiment,
        best_hour_to_call: row
            .try_get::<Option<i64>, _>("best_hour_to_call")?
            .map(|value| parse_u32("best_hour_to_call", value))
            .transpose()?,
        preferred_channel,
        stage_entered_at: parse_timestamp("stage_entered_at", row.try_get("stage_entered_at")?)?,
        stage_change_count: parse_u32("stage_change_count", row.try_get("stage_change_count")?)?,
        longest_silence_days: parse_u32(
            "longest_silence_days",
            row.try_get("longest_silence_days")?,
        )?,
        next_action_type,
        next_action_at: parse_optional_timestamp(
            "next_action_at",
            row.try_get("next_action_at")?,
        )?,
        next_action_reason: row.try_get("next_action_reason")?,
        callback_reminder_sent_at: parse_optional_timestamp(
            "callback_reminder_sent_at",
            row.try_get("callback_reminder_sent_at")?,
        )?,
        callback_call_queued_at: parse_optional_timestamp(
            "callback_call_queued_at",
            row.try_get("callback_call_queued_at")?,
        )?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use cadence_core::chrono::{Duration, Utc};
    use cadence_core::domain::journey::{JourneyStage, JourneyState};
    use cadence_core::domain::playbook::RuleActionKind;
    use cadence_core::domain::{LeadId, UserId};

    use super::SqlJourneyRepository;
    use crate::repositories::JourneyRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlJourneyRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlJourneyRepository::new(pool)
    }

    fn state(lead: &str, stage: JourneyStage) -> JourneyState {
        let mut state =
            JourneyState::fresh(LeadId(lead.to_string()), UserId("U-1".to_string()), Utc::now());
        state.stage = stage;
        state
    }

    #[tokio::test]
    async fn save_and_find_round_trip_all_fields() {
        let repo = repo().await;
        let mut original = state("L-1", JourneyStage::Engaged);
        original.call_attempts = 4;
        original.calls_answered = 2;
        original.interest_level = 7;
        original.best_hour_to_call = Some(14);
        original.next_action_type = Some(RuleActionKind::Sms);
        original.next_action_at = Some(Utc::now() + Duration::hours(3));
        original.next_action_reason = Some("rule R-1 waits".to_string());
        original.callback_reminder_sent_at = Some(Utc::now());

        repo.save(original.clone()).await.expect("save");
        let found = repo.find(&original.lead_id).await.expect("find").expect("present");

        assert_eq!(found.stage, JourneyStage::Engaged);
        assert_eq!(found.call_attempts, 4);
        assert_eq!(found.interest_level, 7);
        assert_eq!(found.best_hour_to_call, Some(14));
        assert_eq!(found.next_action_type, Some(RuleActionKind::Sms));
        assert!(found.callback_reminder_sent_at.is_some());
    }

    #[tokio::test]
    async fn list_due_skips_terminal_and_future_scheduled() {
        let repo = repo().await;
        let now = Utc::now();

        let unscheduled = state("L-unscheduled", JourneyStage::Attempting);
        let mut due = state("L-due", JourneyStage::Stalled);
        due.next_action_at = Some(now - Duration::hours(1));
        let mut future = state("L-future", JourneyStage::Stalled);
        future.next_action_at = Some(now + Duration::hours(5));
        let terminal = state("L-won", JourneyStage::ClosedWon);

        for s in [unscheduled, due, future, terminal] {
            repo.save(s).await.expect("save");
        }

        let found = repo.list_due(&UserId("U-1".to_string()), now, 10).await.expect("list");
        let ids: Vec<&str> = found.iter().map(|s| s.lead_id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-unscheduled", "L-due"]);
    }

    #[tokio::test]
    async fn list_due_orders_by_next_action_time() {
        let repo = repo().await;
        let now = Utc::now();

        let mut later = state("L-later", JourneyStage::Stalled);
        later.next_action_at = Some(now - Duration::minutes(30));
        let mut earlier = state("L-earlier", JourneyStage::Stalled);
        earlier.next_action_at = Some(now - Duration::hours(4));

        repo.save(later).await.expect("save");
        repo.save(earlier).await.expect("save");

        let found = repo.list_due(&UserId("U-1".to_string()), now, 10).await.expect("list");
        let ids: Vec<&str> = found.iter().map(|s| s.lead_id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-earlier", "L-later"]);
    }
}
