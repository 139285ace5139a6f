use async_trait::async_trait;
use thiserror::Error;

use cadence_core::audit::EngineEvent;
use cadence_core::chrono::{DateTime, Utc};
use cadence_core::domain::journey::JourneyState;
use cadence_core::domain::lead::Lead;
use cadence_core::domain::number::PhoneNumber;
use cadence_core::domain::pacing::PacingState;
use cadence_core::domain::playbook::PlaybookRule;
use cadence_core::domain::queue::ActionQueueEntry;
use cadence_core::domain::settings::AutomationSettings;
use cadence_core::domain::{ActionId, CampaignId, LeadId, PhoneNumberId, UserId};
use cadence_core::goals::DailyCounts;
use cadence_core::pacing::CallWindowStats;

pub mod action_queue;
pub mod campaigns;
pub mod events;
pub mod interactions;
pub mod journey;
pub mod leads;
pub mod memory;
pub mod numbers;
pub mod pacing;
pub mod playbook;
pub mod settings;

pub use action_queue::SqlActionQueueRepository;
pub use campaigns::SqlCampaignRepository;
pub use events::SqlEventRepository;
pub use interactions::SqlInteractionRepository;
pub use journey::SqlJourneyRepository;
pub use leads::SqlLeadRepository;
pub use memory::{
    InMemoryActionQueueRepository, InMemoryCampaignRepository, InMemoryEventRepository,
    InMemoryInteractionRepository, InMemoryJourneyRepository, InMemoryLeadRepository,
    InMemoryNumberRepository, InMemoryPacingRepository, InMemoryPlaybookRepository,
    InMemorySettingsRepository,
};
pub use numbers::SqlNumberRepository;
pub use pacing::SqlPacingRepository;
pub use playbook::SqlPlaybookRepository;
pub use settings::SqlSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Users with automation enabled, the orchestrator's work list.
    async fn list_enabled(&self) -> Result<Vec<AutomationSettings>, RepositoryError>;
    async fn find(&self, user_id: &UserId) -> Result<Option<AutomationSettings>, RepositoryError>;
    async fn save(&self, settings: AutomationSettings) -> Result<(), RepositoryError>;
    async fn record_run(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    /// Actionable-status leads not on do-not-call, highest score first.
    async fn list_actionable(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError>;
    /// `contacted` leads ordered by last contact, oldest first.
    async fn list_stale_contacts(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError>;
    async fn save(&self, lead: Lead) -> Result<(), RepositoryError>;
    async fn update_score(&self, id: &LeadId, score: f64) -> Result<(), RepositoryError>;
    async fn touch_contacted(
        &self,
        id: &LeadId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

/// Per-lead call aggregates: the recent window feeds journey classification,
/// the lifetime totals feed scoring.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LeadCallStats {
    pub recent_attempts: u32,
    pub recent_answered: u32,
    pub avg_duration_secs: f64,
    pub positive_outcomes: u32,
    pub negative_outcomes: u32,
    pub appointment_set: bool,
    pub last_call_at: Option<DateTime<Utc>>,
    pub total_calls: u32,
    pub total_answered: u32,
    pub best_hour_to_call: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeadSmsCounts {
    pub sent: u32,
    pub received: u32,
    pub last_inbound_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait InteractionRepository: Send + Sync {
    /// Call/appointment/conversation counts since `since` (local midnight).
    async fn daily_counts(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<DailyCounts, RepositoryError>;
    /// Outcome totals for the pacing window.
    async fn window_stats(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<CallWindowStats, RepositoryError>;
    /// Aggregates over the lead's last 20 calls plus lifetime totals.
    async fn call_stats(&self, lead_id: &LeadId) -> Result<LeadCallStats, RepositoryError>;
    async fn sms_counts(&self, lead_id: &LeadId) -> Result<LeadSmsCounts, RepositoryError>;
}

#[async_trait]
pub trait JourneyRepository: Send + Sync {
    async fn find(&self, lead_id: &LeadId) -> Result<Option<JourneyState>, RepositoryError>;
    async fn save(&self, state: JourneyState) -> Result<(), RepositoryError>;
    /// Non-terminal journeys whose next action is due (or unscheduled),
    /// ordered by `next_action_at` ascending with unscheduled first so a
    /// tight touch budget cannot starve the oldest work.
    async fn list_due(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<JourneyState>, RepositoryError>;
}

#[async_trait]
pub trait PlaybookRepository: Send + Sync {
    async fn list_active(&self, user_id: &UserId) -> Result<Vec<PlaybookRule>, RepositoryError>;
    async fn save(&self, rule: PlaybookRule) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ActionQueueRepository: Send + Sync {
    async fn find(&self, id: &ActionId) -> Result<Option<ActionQueueEntry>, RepositoryError>;
    async fn save(&self, entry: ActionQueueEntry) -> Result<(), RepositoryError>;
    /// Approved entries ready to execute, highest priority (lowest number)
    /// first, oldest first within a priority.
    async fn list_approved(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<ActionQueueEntry>, RepositoryError>;
    async fn list_expired_pending(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionQueueEntry>, RepositoryError>;
    /// Entries created since `since`, regardless of status. Used for the
    /// daily cap; read-then-write, so best-effort under concurrent ticks.
    async fn count_created_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError>;
    /// Latest `completed` entry carrying this idempotency key, used by the
    /// executor as a duplicate-send guard across crash-retries.
    async fn find_by_idempotency_key(
        &self,
        user_id: &UserId,
        key: &str,
    ) -> Result<Option<ActionQueueEntry>, RepositoryError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: EngineEvent) -> Result<(), RepositoryError>;
    async fn list_recent(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<EngineEvent>, RepositoryError>;
}

#[async_trait]
pub trait PacingRepository: Send + Sync {
    async fn find(&self, user_id: &UserId) -> Result<Option<PacingState>, RepositoryError>;
    async fn save(&self, state: PacingState) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NumberRepository: Send + Sync {
    async fn list_active(&self, user_id: &UserId) -> Result<Vec<PhoneNumber>, RepositoryError>;
    async fn save(&self, number: PhoneNumber) -> Result<(), RepositoryError>;
    async fn quarantine(
        &self,
        id: &PhoneNumberId,
        until: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Oldest active campaign, the default target for queued leads.
    async fn first_active(&self, user_id: &UserId) -> Result<Option<CampaignId>, RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid timestamp in {column}: {err}")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative count in {column}: {value}")))
}
