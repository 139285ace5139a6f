use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActionId, LeadId, UserId};

/// Closed set of executable action types. Anything else found in the queue
/// is treated as "skip, don't poison".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    QueueLeads,
    SendFollowupSms,
    AdjustPacing,
    QuarantineNumber,
    UpdateLeadStatus,
    JourneyCall,
    JourneyAiSms,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueLeads => "queue_leads",
            Self::SendFollowupSms => "send_followup_sms",
            Self::AdjustPacing => "adjust_pacing",
            Self::QuarantineNumber => "quarantine_number",
            Self::UpdateLeadStatus => "update_lead_status",
            Self::JourneyCall => "journey_call",
            Self::JourneyAiSms => "journey_ai_sms",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queue_leads" => Some(Self::QueueLeads),
            "send_followup_sms" => Some(Self::SendFollowupSms),
            "adjust_pacing" => Some(Self::AdjustPacing),
            "quarantine_number" => Some(Self::QuarantineNumber),
            "update_lead_status" => Some(Self::UpdateLeadStatus),
            "journey_call" => Some(Self::JourneyCall),
            "journey_ai_sms" => Some(Self::JourneyAiSms),
            _ => None,
        }
    }

    /// Types whose execution reaches an external collaborator and therefore
    /// needs an idempotency key.
    pub fn has_external_side_effect(&self) -> bool {
        matches!(self, Self::SendFollowupSms | Self::JourneyCall | Self::JourneyAiSms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Executing,
    Completed,
    Failed,
    Expired,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Terminal entries are never picked up again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    AutonomousEngine,
    JourneyEngine,
}

impl ActionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutonomousEngine => "autonomous_engine",
            Self::JourneyEngine => "journey_engine",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "autonomous_engine" => Some(Self::AutonomousEngine),
            "journey_engine" => Some(Self::JourneyEngine),
            _ => None,
        }
    }
}

/// A persisted, auditable unit of proposed/approved/executed work.
///
/// Status transitions are monotonic and single-writer per entry; once an
/// entry reaches a terminal status it is never re-executed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionQueueEntry {
    pub id: ActionId,
    pub user_id: UserId,
    pub lead_id: Option<LeadId>,
    pub action_type: ActionType,
    pub params_json: String,
    pub priority: u32,
    pub status: ActionStatus,
    pub reasoning: String,
    pub source: ActionSource,
    pub idempotency_key: Option<String>,
    pub result_json: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}
