//! Read-only aggregates over call and SMS history. The engine never writes
//! these tables; dialer and messaging services own them.

use sqlx::Row;

use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::{LeadId, UserId};
use cadence_core::goals::DailyCounts;
use cadence_core::pacing::CallWindowStats;

use super::{
    parse_optional_timestamp, parse_u32, InteractionRepository, LeadCallStats, LeadSmsCounts,
    RepositoryError,
};
use crate::DbPool;

/// Outcomes where the lead picked up.
const ANSWERED_OUTCOMES: &str =
    "('answered', 'interested', 'not_interested', 'appointment_set', 'callback_requested')";
/// Dial-level failures that count against pacing.
const FAILED_OUTCOMES: &str = "('failed', 'busy')";
/// Outcomes that count as a real conversation for goal tracking.
const CONVERSATION_OUTCOMES: &str = "('answered', 'interested', 'appointment_set')";
const POSITIVE_OUTCOMES: &str = "('interested', 'appointment_set', 'callback_requested')";
const NEGATIVE_OUTCOMES: &str = "('not_interested')";

/// How many recent calls feed journey classification.
const RECENT_CALL_WINDOW: u32 = 20;

pub struct SqlInteractionRepository {
    pool: DbPool,
}

impl SqlInteractionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InteractionRepository for SqlInteractionRepository {
    async fn daily_counts(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<DailyCounts, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT
                COUNT(*) AS calls,
                COALESCE(SUM(outcome = 'appointment_set'), 0) AS appointments,
                COALESCE(SUM(outcome IN {CONVERSATION_OUTCOMES}), 0) AS conversations
             FROM call_logs
             WHERE user_id = ? AND created_at >= ?"
        ))
        .bind(&user_id.0)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(DailyCounts {
            calls: parse_u32("calls", row.try_get("calls")?)?,
            appointments: parse_u32("appointments", row.try_get("appointments")?)?,
            conversations: parse_u32("conversations", row.try_get("conversations")?)?,
        })
    }

    async fn window_stats(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<CallWindowStats, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(outcome IN {FAILED_OUTCOMES}), 0) AS failed,
                COALESCE(SUM(outcome IN {ANSWERED_OUTCOMES}), 0) AS answered
             FROM call_logs
             WHERE user_id = ? AND created_at >= ?"
        ))
        .bind(&user_id.0)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(CallWindowStats {
            total: parse_u32("total", row.try_get("total")?)?,
            failed: parse_u32("failed", row.try_get("failed")?)?,
            answered: parse_u32("answered", row.try_get("answered")?)?,
        })
    }

    async fn call_stats(&self, lead_id: &LeadId) -> Result<LeadCallStats, RepositoryError> {
        let recent = sqlx::query(&format!(
            "SELECT
                COUNT(*) AS attempts,
                COALESCE(SUM(outcome IN {ANSWERED_OUTCOMES}), 0) AS answered,
                COALESCE(AVG(CASE WHEN duration_secs > 0 THEN duration_secs END), 0.0) AS avg_duration,
                COALESCE(SUM(outcome IN {POSITIVE_OUTCOMES}), 0) AS positives,
                COALESCE(SUM(outcome IN {NEGATIVE_OUTCOMES}), 0) AS negatives,
                COALESCE(MAX(outcome = 'appointment_set'), 0) AS appointment_set,
                MAX(created_at) AS last_call_at
             FROM (
                SELECT outcome, duration_secs, created_at
                FROM call_logs
                WHERE lead_id = ?
                ORDER BY created_at DESC
                LIMIT {RECENT_CALL_WINDOW}
             )"
        ))
        .bind(&lead_id.0)
        .fetch_one(&self.pool)
        .await?;

        let lifetime = sqlx::query(&format!(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(outcome IN {ANSWERED_OUTCOMES}), 0) AS answered
             FROM call_logs
             WHERE lead_id = ?"
        ))
        .bind(&lead_id.0)
        .fetch_one(&self.pool)
        .await?;

        let best_hour = sqlx::query(&format!(
            "SELECT CAST(strftime('%H', created_at) AS INTEGER) AS hour
             FROM call_logs
             WHERE lead_id = ? AND outcome IN {ANSWERED_OUTCOMES}
             GROUP BY hour
             ORDER BY COUNT(*) DESC, hour ASC
             LIMIT 1"
        ))
        .bind(&lead_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(LeadCallStats {
            recent_attempts: parse_u32("attempts", recent.try_get("attempts")?)?,
            recent_answered: parse_u32("answered", recent.try_get("answered")?)?,
            avg_duration_secs: recent.try_get("avg_duration")?,
            positive_outcomes: parse_u32("positives", recent.try_get("positives")?)?,
            negative_outcomes: parse_u32("negatives", recent.try_get("negatives")?)?,
            appointment_set: recent.try_get::<i64, _>("appointment_set")? != 0,
            last_call_at: parse_optional_timestamp(
                "last_call_at",
                recent.try_get("last_call_at")?,
            )?,
            total_calls: parse_u32("total", lifetime.try_get("total")?)?,
            total_answered: parse_u32("answered", lifetime.try_get("answered")?)?,
            best_hour_to_call: best_hour
                .map(|row| parse_u32("hour", row.try_get("hour")?))
                .transpose()?,
        })
    }

    async fn sms_counts(&self, lead_id: &LeadId) -> Result<LeadSmsCounts, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(direction = 'outbound'), 0) AS sent,
                COALESCE(SUM(direction = 'inbound'), 0) AS received,
                MAX(CASE WHEN direction = 'inbound' THEN created_at END) AS last_inbound_at
             FROM sms_messages
             WHERE lead_id = ?",
        )
        .bind(&lead_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(LeadSmsCounts {
            sent: parse_u32("sent", row.try_get("sent")?)?,
            received: parse_u32("received", row.try_get("received")?)?,
            last_inbound_at: parse_optional_timestamp(
                "last_inbound_at",
                row.try_get("last_inbound_at")?,
            )?,
        })
    }
}
