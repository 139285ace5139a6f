//! Deterministic demo dataset for local runs and end-to-end checks.

use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Leads seeded for the demo user, one per engine path.
const SEED_LEADS: &[SeedLeadContract] = &[
    SeedLeadContract {
        lead_id: "lead-demo-fresh",
        status: "new",
        description: "untouched lead, queueing candidate",
    },
    SeedLeadContract {
        lead_id: "lead-demo-stale",
        status: "contacted",
        description: "contacted days ago, follow-up candidate",
    },
    SeedLeadContract {
        lead_id: "lead-demo-callback",
        status: "callback",
        description: "explicit callback scheduled, precedence path",
    },
    SeedLeadContract {
        lead_id: "lead-demo-dnc",
        status: "contacted",
        description: "do-not-call, must never be actioned",
    },
];

const SEED_USER_IDS: &[&str] = &["user-demo-001", "user-demo-002"];
const SEED_ENABLED_USER: &str = "user-demo-001";
const SEED_RULE_COUNT: i64 = 4;
const SEED_FLAGGED_NUMBER: &str = "num-demo-flagged";

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// SQL fixture content for the demo dataset.
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Load the demo dataset into the database.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let leads_seeded = SEED_LEADS
            .iter()
            .map(|lead| LeadSeedInfo {
                lead_id: lead.lead_id,
                status: lead.status,
                description: lead.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { user_id: SEED_ENABLED_USER, leads_seeded })
    }

    /// Verify the seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let enabled: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM automation_settings
             WHERE user_id = ?1 AND enabled = 1 AND autonomy = 'full_auto')",
        )
        .bind(SEED_ENABLED_USER)
        .fetch_one(pool)
        .await?;
        checks.push(("settings-enabled", enabled == 1));

        for lead in SEED_LEADS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM leads WHERE id = ?1 AND status = ?2)",
            )
            .bind(lead.lead_id)
            .bind(lead.status)
            .fetch_one(pool)
            .await?;
            checks.push((lead.lead_id, exists == 1));
        }

        let rule_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM playbook_rules WHERE user_id = ?1 AND active = 1",
        )
        .bind(SEED_ENABLED_USER)
        .fetch_one(pool)
        .await?;
        checks.push(("playbook-rules", rule_count == SEED_RULE_COUNT));

        let flagged: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM phone_numbers
             WHERE id = ?1 AND active = 1 AND spam_score > 70)",
        )
        .bind(SEED_FLAGGED_NUMBER)
        .fetch_one(pool)
        .await?;
        checks.push(("flagged-number", flagged == 1));

        let campaign: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM campaigns WHERE user_id = ?1 AND active = 1)",
        )
        .bind(SEED_ENABLED_USER)
        .fetch_one(pool)
        .await?;
        checks.push(("active-campaign", campaign == 1));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove seeded rows from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_users = sql_array_from_ids(SEED_USER_IDS);
        for table in [
            "action_queue",
            "journey_events",
            "journey_states",
            "pacing_states",
            "playbook_rules",
            "phone_numbers",
            "sms_messages",
            "call_logs",
            "leads",
            "campaigns",
            "automation_settings",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE user_id IN {quoted_users}"))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedLeadContract {
    lead_id: &'static str,
    status: &'static str,
    description: &'static str,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub user_id: &'static str,
    pub leads_seeded: Vec<LeadSeedInfo>,
}

#[derive(Debug)]
pub struct LeadSeedInfo {
    pub lead_id: &'static str,
    pub status: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::DemoSeedDataset;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!DemoSeedDataset::SQL.is_empty());
        assert!(DemoSeedDataset::SQL.contains("INSERT INTO automation_settings"));
    }

    #[tokio::test]
    async fn load_then_verify_then_clean() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let seeded = DemoSeedDataset::load(&pool).await.expect("load");
        assert_eq!(seeded.leads_seeded.len(), 4);

        let verified = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(verified.all_present, "failed checks: {:?}", verified.checks);

        DemoSeedDataset::clean(&pool).await.expect("clean");
        let after = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(!after.all_present);
    }
}
