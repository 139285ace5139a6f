//! Compact decision trace. Every notable engine event (stage change, queue
//! transition, decision, memory note) becomes one append-only row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{LeadId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Stage,
    Queue,
    Decision,
    Pacing,
    Memory,
    System,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Queue => "queue",
            Self::Decision => "decision",
            Self::Pacing => "pacing",
            Self::Memory => "memory",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stage" => Some(Self::Stage),
            "queue" => Some(Self::Queue),
            "decision" => Some(Self::Decision),
            "pacing" => Some(Self::Pacing),
            "memory" => Some(Self::Memory),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: String,
    pub user_id: UserId,
    pub lead_id: Option<LeadId>,
    pub category: EventCategory,
    pub event_type: String,
    pub detail: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(
        user_id: UserId,
        lead_id: Option<LeadId>,
        category: EventCategory,
        event_type: impl Into<String>,
        detail: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            user_id,
            lead_id,
            category,
            event_type: event_type.into(),
            detail: detail.into(),
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{EngineEvent, EventCategory};
    use crate::domain::{LeadId, UserId};

    #[test]
    fn events_accumulate_metadata_and_keep_lead_linkage() {
        let event = EngineEvent::new(
            UserId("U-1".to_string()),
            Some(LeadId("L-7".to_string())),
            EventCategory::Stage,
            "journey.stage_changed",
            "attempting -> engaged",
            Utc::now(),
        )
        .with_metadata("from", "attempting")
        .with_metadata("to", "engaged");

        assert_eq!(event.event_type, "journey.stage_changed");
        assert_eq!(event.metadata.get("to").map(String::as_str), Some("engaged"));
        assert_eq!(event.lead_id.as_ref().map(|id| id.0.as_str()), Some("L-7"));
    }

    #[test]
    fn category_codec_round_trips_every_variant() {
        for category in [
            EventCategory::Stage,
            EventCategory::Queue,
            EventCategory::Decision,
            EventCategory::Pacing,
            EventCategory::Memory,
            EventCategory::System,
        ] {
            assert_eq!(EventCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(EventCategory::parse("unknown"), None);
    }
}
