use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LeadId, UserId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Callback,
    Converted,
    Lost,
    DoNotCall,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Callback => "callback",
            Self::Converted => "converted",
            Self::Lost => "lost",
            Self::DoNotCall => "do_not_call",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "qualified" => Some(Self::Qualified),
            "callback" => Some(Self::Callback),
            "converted" => Some(Self::Converted),
            "lost" => Some(Self::Lost),
            "do_not_call" => Some(Self::DoNotCall),
            _ => None,
        }
    }

    /// Statuses the engine is allowed to act on.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::New | Self::Contacted | Self::Qualified | Self::Callback)
    }
}

/// Lead record as the engine sees it. The engine only writes back
/// `priority_score`, `status`, and `last_contacted_at`; everything else is
/// owned by upstream import and UI flows, which may write concurrently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub user_id: UserId,
    pub first_name: String,
    pub phone: String,
    pub status: LeadStatus,
    pub do_not_call: bool,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub next_callback_at: Option<DateTime<Utc>>,
    pub priority_score: f64,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn has_future_callback(&self, now: DateTime<Utc>) -> bool {
        self.next_callback_at.is_some_and(|at| at > now)
    }

    pub fn days_since_contact(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_contacted_at.map(|at| (now - at).num_days())
    }
}
