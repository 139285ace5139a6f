//! In-memory fakes for engine tests. Same semantics as the SQL
//! implementations where the traits read data back, minus persistence.

use std::collections::HashMap;

use tokio::sync::RwLock;

use cadence_core::audit::EngineEvent;
use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::journey::JourneyState;
use cadence_core::domain::lead::{Lead, LeadStatus};
use cadence_core::domain::number::PhoneNumber;
use cadence_core::domain::pacing::PacingState;
use cadence_core::domain::playbook::PlaybookRule;
use cadence_core::domain::queue::{ActionQueueEntry, ActionStatus};
use cadence_core::domain::settings::AutomationSettings;
use cadence_core::domain::{ActionId, CampaignId, LeadId, PhoneNumberId, UserId};
use cadence_core::goals::DailyCounts;
use cadence_core::pacing::CallWindowStats;

use super::{
    ActionQueueRepository, CampaignRepository, EventRepository, InteractionRepository,
    JourneyRepository, LeadCallStats, LeadRepository, LeadSmsCounts, NumberRepository,
    PacingRepository, PlaybookRepository, RepositoryError, SettingsRepository,
};

#[derive(Default)]
pub struct InMemorySettingsRepository {
    settings: RwLock<HashMap<String, AutomationSettings>>,
}

#[async_trait::async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn list_enabled(&self) -> Result<Vec<AutomationSettings>, RepositoryError> {
        let settings = self.settings.read().await;
        let mut enabled: Vec<AutomationSettings> =
            settings.values().filter(|s| s.enabled).cloned().collect();
        enabled.sort_by(|a, b| a.user_id.0.cmp(&b.user_id.0));
        Ok(enabled)
    }

    async fn find(&self, user_id: &UserId) -> Result<Option<AutomationSettings>, RepositoryError> {
        let settings = self.settings.read().await;
        Ok(settings.get(&user_id.0).cloned())
    }

    async fn save(&self, value: AutomationSettings) -> Result<(), RepositoryError> {
        let mut settings = self.settings.write().await;
        settings.insert(value.user_id.0.clone(), value);
        Ok(())
    }

    async fn record_run(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut settings = self.settings.write().await;
        if let Some(value) = settings.get_mut(&user_id.0) {
            value.last_run_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, Lead>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&id.0).cloned())
    }

    async fn list_actionable(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        let mut actionable: Vec<Lead> = leads
            .values()
            .filter(|lead| {
                lead.user_id == *user_id && lead.status.is_actionable() && !lead.do_not_call
            })
            .cloned()
            .collect();
        actionable.sort_by(|a, b| {
            b.priority_score
                .total_cmp(&a.priority_score)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        actionable.truncate(limit as usize);
        Ok(actionable)
    }

    async fn list_stale_contacts(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        let mut stale: Vec<Lead> = leads
            .values()
            .filter(|lead| {
                lead.user_id == *user_id
                    && lead.status == LeadStatus::Contacted
                    && lead.last_contacted_at.is_some()
            })
            .cloned()
            .collect();
        stale.sort_by_key(|lead| lead.last_contacted_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        leads.insert(lead.id.0.clone(), lead);
        Ok(())
    }

    async fn update_score(&self, id: &LeadId, score: f64) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        if let Some(lead) = leads.get_mut(&id.0) {
            lead.priority_score = score;
        }
        Ok(())
    }

    async fn touch_contacted(
        &self,
        id: &LeadId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        if let Some(lead) = leads.get_mut(&id.0) {
            lead.last_contacted_at = Some(at);
        }
        Ok(())
    }
}

/// Fake over precomputed aggregates; tests set the numbers they need rather
/// than replaying call logs.
#[derive(Default)]
pub struct InMemoryInteractionRepository {
    daily: RwLock<HashMap<String, DailyCounts>>,
    windows: RwLock<HashMap<String, CallWindowStats>>,
    calls: RwLock<HashMap<String, LeadCallStats>>,
    sms: RwLock<HashMap<String, LeadSmsCounts>>,
}

impl InMemoryInteractionRepository {
    pub async fn set_daily_counts(&self, user_id: &UserId, counts: DailyCounts) {
        self.daily.write().await.insert(user_id.0.clone(), counts);
    }

    pub async fn set_window_stats(&self, user_id: &UserId, stats: CallWindowStats) {
        self.windows.write().await.insert(user_id.0.clone(), stats);
    }

    pub async fn set_call_stats(&self, lead_id: &LeadId, stats: LeadCallStats) {
        self.calls.write().await.insert(lead_id.0.clone(), stats);
    }

    pub async fn set_sms_counts(&self, lead_id: &LeadId, counts: LeadSmsCounts) {
        self.sms.write().await.insert(lead_id.0.clone(), counts);
    }
}

#[async_trait::async_trait]
impl InteractionRepository for InMemoryInteractionRepository {
    async fn daily_counts(
        &self,
        user_id: &UserId,
        _since: DateTime<Utc>,
    ) -> Result<DailyCounts, RepositoryError> {
        let daily = self.daily.read().await;
        Ok(daily.get(&user_id.0).copied().unwrap_or_default())
    }

    async fn window_stats(
        &self,
        user_id: &UserId,
        _since: DateTime<Utc>,
    ) -> Result<CallWindowStats, RepositoryError> {
        let windows = self.windows.read().await;
        Ok(windows.get(&user_id.0).copied().unwrap_or_default())
    }

    async fn call_stats(&self, lead_id: &LeadId) -> Result<LeadCallStats, RepositoryError> {
        let calls = self.calls.read().await;
        Ok(calls.get(&lead_id.0).copied().unwrap_or_default())
    }

    async fn sms_counts(&self, lead_id: &LeadId) -> Result<LeadSmsCounts, RepositoryError> {
        let sms = self.sms.read().await;
        Ok(sms.get(&lead_id.0).copied().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryJourneyRepository {
    states: RwLock<HashMap<String, JourneyState>>,
}

#[async_trait::async_trait]
impl JourneyRepository for InMemoryJourneyRepository {
    async fn find(&self, lead_id: &LeadId) -> Result<Option<JourneyState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(&lead_id.0).cloned())
    }

    async fn save(&self, state: JourneyState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        states.insert(state.lead_id.0.clone(), state);
        Ok(())
    }

    async fn list_due(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<JourneyState>, RepositoryError> {
        let states = self.states.read().await;
        let mut due: Vec<JourneyState> = states
            .values()
            .filter(|state| {
                state.user_id == *user_id
                    && !state.stage.is_terminal()
                    && state.next_action_at.is_none_or(|at| at <= now)
            })
            .cloned()
            .collect();
        // Unscheduled first, then oldest due, matching the SQL ordering.
        due.sort_by_key(|state| (state.next_action_at.is_some(), state.next_action_at));
        due.truncate(limit as usize);
        Ok(due)
    }
}

#[derive(Default)]
pub struct InMemoryPlaybookRepository {
    rules: RwLock<HashMap<String, PlaybookRule>>,
}

#[async_trait::async_trait]
impl PlaybookRepository for InMemoryPlaybookRepository {
    async fn list_active(&self, user_id: &UserId) -> Result<Vec<PlaybookRule>, RepositoryError> {
        let rules = self.rules.read().await;
        let mut active: Vec<PlaybookRule> = rules
            .values()
            .filter(|rule| rule.user_id == *user_id && rule.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            a.stage
                .as_str()
                .cmp(b.stage.as_str())
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(active)
    }

    async fn save(&self, rule: PlaybookRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id.0.clone(), rule);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryActionQueueRepository {
    entries: RwLock<HashMap<String, ActionQueueEntry>>,
}

impl InMemoryActionQueueRepository {
    /// Everything stored, oldest first. Test-side inspection only.
    pub async fn all(&self) -> Vec<ActionQueueEntry> {
        let entries = self.entries.read().await;
        let mut all: Vec<ActionQueueEntry> = entries.values().cloned().collect();
        all.sort_by_key(|entry| entry.created_at);
        all
    }
}

#[async_trait::async_trait]
impl ActionQueueRepository for InMemoryActionQueueRepository {
    async fn find(&self, id: &ActionId) -> Result<Option<ActionQueueEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&id.0).cloned())
    }

    async fn save(&self, entry: ActionQueueEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id.0.clone(), entry);
        Ok(())
    }

    async fn list_approved(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<ActionQueueEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut approved: Vec<ActionQueueEntry> = entries
            .values()
            .filter(|entry| entry.user_id == *user_id && entry.status == ActionStatus::Approved)
            .cloned()
            .collect();
        approved.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| a.created_at.cmp(&b.created_at))
        });
        approved.truncate(limit as usize);
        Ok(approved)
    }

    async fn list_expired_pending(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionQueueEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut expired: Vec<ActionQueueEntry> = entries
            .values()
            .filter(|entry| {
                entry.user_id == *user_id
                    && entry.status == ActionStatus::Pending
                    && entry.expires_at <= now
            })
            .cloned()
            .collect();
        expired.sort_by_key(|entry| entry.created_at);
        Ok(expired)
    }

    async fn count_created_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let entries = self.entries.read().await;
        let count = entries
            .values()
            .filter(|entry| entry.user_id == *user_id && entry.created_at >= since)
            .count();
        Ok(count as u32)
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &UserId,
        key: &str,
    ) -> Result<Option<ActionQueueEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let found = entries
            .values()
            .filter(|entry| {
                entry.user_id == *user_id
                    && entry.status == ActionStatus::Completed
                    && entry.idempotency_key.as_deref() == Some(key)
            })
            .max_by_key(|entry| entry.created_at)
            .cloned();
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryEventRepository {
    events: RwLock<Vec<EngineEvent>>,
}

#[async_trait::async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(&self, event: EngineEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn list_recent(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<EngineEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut recent: Vec<EngineEvent> =
            events.iter().filter(|event| event.user_id == *user_id).cloned().collect();
        recent.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        recent.truncate(limit as usize);
        Ok(recent)
    }
}

#[derive(Default)]
pub struct InMemoryPacingRepository {
    states: RwLock<HashMap<String, PacingState>>,
}

#[async_trait::async_trait]
impl PacingRepository for InMemoryPacingRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<PacingState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(&user_id.0).cloned())
    }

    async fn save(&self, state: PacingState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        states.insert(state.user_id.0.clone(), state);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNumberRepository {
    numbers: RwLock<HashMap<String, PhoneNumber>>,
}

#[async_trait::async_trait]
impl NumberRepository for InMemoryNumberRepository {
    async fn list_active(&self, user_id: &UserId) -> Result<Vec<PhoneNumber>, RepositoryError> {
        let numbers = self.numbers.read().await;
        let mut active: Vec<PhoneNumber> = numbers
            .values()
            .filter(|number| number.user_id == *user_id && number.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(active)
    }

    async fn save(&self, number: PhoneNumber) -> Result<(), RepositoryError> {
        let mut numbers = self.numbers.write().await;
        numbers.insert(number.id.0.clone(), number);
        Ok(())
    }

    async fn quarantine(
        &self,
        id: &PhoneNumberId,
        until: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut numbers = self.numbers.write().await;
        if let Some(number) = numbers.get_mut(&id.0) {
            number.quarantined_until = Some(until);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCampaignRepository {
    campaigns: RwLock<HashMap<String, (UserId, bool, DateTime<Utc>)>>,
}

impl InMemoryCampaignRepository {
    pub async fn insert(
        &self,
        id: CampaignId,
        user_id: UserId,
        active: bool,
        created_at: DateTime<Utc>,
    ) {
        self.campaigns.write().await.insert(id.0, (user_id, active, created_at));
    }
}

#[async_trait::async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn first_active(&self, user_id: &UserId) -> Result<Option<CampaignId>, RepositoryError> {
        let campaigns = self.campaigns.read().await;
        let first = campaigns
            .iter()
            .filter(|(_, (owner, active, _))| owner == user_id && *active)
            .min_by_key(|(_, (_, _, created_at))| *created_at)
            .map(|(id, _)| CampaignId(id.clone()));
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use cadence_core::chrono::{Duration, Utc};
    use cadence_core::domain::journey::JourneyState;
    use cadence_core::domain::lead::{Lead, LeadStatus};
    use cadence_core::domain::{LeadId, UserId};

    use super::{InMemoryJourneyRepository, InMemoryLeadRepository};
    use crate::repositories::{JourneyRepository, LeadRepository};

    fn lead(id: &str, score: f64, status: LeadStatus) -> Lead {
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
    async fn actionable_leads_mirror_the_sql_ordering() {
        let repo = InMemoryLeadRepository::default();
        repo.save(lead("L-low", 10.0, LeadStatus::New)).await.expect("save");
        repo.save(lead("L-high", 90.0, LeadStatus::Contacted)).await.expect("save");
        repo.save(lead("L-lost", 99.0, LeadStatus::Lost)).await.expect("save");

        let listed = repo.list_actionable(&UserId("U-1".to_string()), 10).await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|l| l.id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-high", "L-low"]);
    }

    #[tokio::test]
    async fn due_journeys_put_unscheduled_first() {
        let repo = InMemoryJourneyRepository::default();
        let now = Utc::now();
        let user = UserId("U-1".to_string());

        let mut scheduled = JourneyState::fresh(LeadId("L-sched".to_string()), user.clone(), now);
        scheduled.next_action_at = Some(now - Duration::hours(1));
        let unscheduled = JourneyState::fresh(LeadId("L-new".to_string()), user.clone(), now);
        let mut future = JourneyState::fresh(LeadId("L-future".to_string()), user.clone(), now);
        future.next_action_at = Some(now + Duration::hours(4));

        for state in [scheduled, unscheduled, future] {
            repo.save(state).await.expect("save");
        }

        let due = repo.list_due(&user, now, 10).await.expect("list");
        let ids: Vec<&str> = due.iter().map(|s| s.lead_id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-new", "L-sched"]);
    }
}
