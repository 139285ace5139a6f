use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::playbook::RuleActionKind;
use super::{LeadId, UserId};

/// Position in the follow-up lifecycle state machine.
///
/// Stages are recomputed from raw interaction history every run; the stored
/// value is a cache for ordering and audit, never an input to the next
/// classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStage {
    Fresh,
    Attempting,
    Engaged,
    Stalled,
    Nurturing,
    Hot,
    CallbackSet,
    Booked,
    ClosedWon,
    ClosedLost,
    Dormant,
}

impl JourneyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Attempting => "attempting",
            Self::Engaged => "engaged",
            Self::Stalled => "stalled",
            Self::Nurturing => "nurturing",
            Self::Hot => "hot",
            Self::CallbackSet => "callback_set",
            Self::Booked => "booked",
            Self::ClosedWon => "closed_won",
            Self::ClosedLost => "closed_lost",
            Self::Dormant => "dormant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fresh" => Some(Self::Fresh),
            "attempting" => Some(Self::Attempting),
            "engaged" => Some(Self::Engaged),
            "stalled" => Some(Self::Stalled),
            "nurturing" => Some(Self::Nurturing),
            "hot" => Some(Self::Hot),
            "callback_set" => Some(Self::CallbackSet),
            "booked" => Some(Self::Booked),
            "closed_won" => Some(Self::ClosedWon),
            "closed_lost" => Some(Self::ClosedLost),
            "dormant" => Some(Self::Dormant),
            _ => None,
        }
    }

    /// Terminal stages are never revisited for action planning.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ClosedWon | Self::ClosedLost | Self::Dormant)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentTrend {
    Warming,
    Cooling,
    Stable,
    Unknown,
}

impl SentimentTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warming => "warming",
            Self::Cooling => "cooling",
            Self::Stable => "stable",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "warming" => Some(Self::Warming),
            "cooling" => Some(Self::Cooling),
            "stable" => Some(Self::Stable),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    Call,
    Sms,
}

impl ContactChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Sms => "sms",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "call" => Some(Self::Call),
            "sms" => Some(Self::Sms),
            _ => None,
        }
    }
}

/// Per-lead journey record, owned exclusively by this engine. Created lazily
/// for every lead lacking one, updated every run, never hard-deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JourneyState {
    pub lead_id: LeadId,
    pub user_id: UserId,
    pub stage: JourneyStage,
    pub call_attempts: u32,
    pub calls_answered: u32,
    pub sms_sent: u32,
    pub sms_received: u32,
    pub interest_level: u8,
    pub sentiment: SentimentTrend,
    pub best_hour_to_call: Option<u32>,
    pub preferred_channel: ContactChannel,
    pub stage_entered_at: DateTime<Utc>,
    pub stage_change_count: u32,
    pub longest_silence_days: u32,
    pub next_action_type: Option<RuleActionKind>,
    pub next_action_at: Option<DateTime<Utc>>,
    pub next_action_reason: Option<String>,
    /// Set once the pre-callback reminder SMS has been queued, so a crash or
    /// overlapping tick cannot queue it twice.
    pub callback_reminder_sent_at: Option<DateTime<Utc>>,
    /// Set once the callback call itself has been queued.
    pub callback_call_queued_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JourneyState {
    pub fn fresh(lead_id: LeadId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            lead_id,
            user_id,
            stage: JourneyStage::Fresh,
            call_attempts: 0,
            calls_answered: 0,
            sms_sent: 0,
            sms_received: 0,
            interest_level: 5,
            sentiment: SentimentTrend::Unknown,
            best_hour_to_call: None,
            preferred_channel: ContactChannel::Call,
            stage_entered_at: now,
            stage_change_count: 0,
            longest_silence_days: 0,
            next_action_type: None,
            next_action_at: None,
            next_action_reason: None,
            callback_reminder_sent_at: None,
            callback_call_queued_at: None,
            updated_at: now,
        }
    }

    pub fn days_in_stage(&self, now: DateTime<Utc>) -> i64 {
        (now - self.stage_entered_at).num_days()
    }

    /// Total outbound touches so far, used for playbook rule ranges.
    pub fn touch_count(&self) -> u32 {
        self.call_attempts + self.sms_sent
    }

    /// Record a stage change, resetting the stage clock.
    pub fn enter_stage(&mut self, stage: JourneyStage, now: DateTime<Utc>) {
        if self.stage != stage {
            self.stage = stage;
            self.stage_entered_at = now;
            self.stage_change_count += 1;
        }
    }
}
