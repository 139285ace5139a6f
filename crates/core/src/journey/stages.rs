//! Stage classification. Every run recomputes the stage from raw
//! interaction history; the previously stored stage is never an input, so
//! re-running on unchanged data is idempotent.

use chrono::{DateTime, Utc};

use crate::domain::journey::{JourneyStage, SentimentTrend};
use crate::domain::lead::LeadStatus;

/// Raw per-lead inputs for classification, aggregated over the last 20
/// calls plus full SMS history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JourneySignals {
    pub call_attempts: u32,
    pub calls_answered: u32,
    pub sms_sent: u32,
    pub sms_received: u32,
    pub avg_call_duration_secs: f64,
    pub positive_outcomes: u32,
    pub negative_outcomes: u32,
    pub appointment_set: bool,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub next_callback_at: Option<DateTime<Utc>>,
    pub lead_status: LeadStatus,
}

impl JourneySignals {
    pub fn has_history(&self) -> bool {
        self.call_attempts > 0 || self.sms_sent > 0 || self.sms_received > 0
    }

    pub fn days_since_contact(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_contact_at.map(|at| (now - at).num_days())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageDecision {
    pub stage: JourneyStage,
    pub reason: String,
}

const HOT_INTEREST: u8 = 8;
const HOT_RECENCY_DAYS: i64 = 3;
const DORMANT_SILENCE_DAYS: i64 = 30;
const STALL_SILENCE_DAYS: i64 = 7;
const STALL_INTEREST_CEILING: u8 = 7;
const NURTURE_INTEREST_CEILING: u8 = 4;

/// Interest on a 1-10 scale from recent outcome counts, call length, and
/// reply volume.
pub fn derive_interest(signals: &JourneySignals) -> u8 {
    let mut interest: i32 = 5;
    interest += signals.positive_outcomes as i32;
    interest -= signals.negative_outcomes as i32;

    if signals.avg_call_duration_secs > 120.0 {
        interest += 2;
    } else if signals.avg_call_duration_secs > 60.0 {
        interest += 1;
    }

    if signals.sms_received > 2 {
        interest += 2;
    } else if signals.sms_received > 0 {
        interest += 1;
    }

    interest.clamp(1, 10) as u8
}

pub fn derive_sentiment(signals: &JourneySignals) -> SentimentTrend {
    if signals.positive_outcomes == 0 && signals.negative_outcomes == 0 {
        return SentimentTrend::Unknown;
    }
    match signals.positive_outcomes.cmp(&signals.negative_outcomes) {
        std::cmp::Ordering::Greater => SentimentTrend::Warming,
        std::cmp::Ordering::Less => SentimentTrend::Cooling,
        std::cmp::Ordering::Equal => SentimentTrend::Stable,
    }
}

/// Classify a lead's stage. First matching predicate wins, evaluated top to
/// bottom; the order is load-bearing (an explicit callback outranks every
/// engagement signal, terminal lead statuses outrank interest).
pub fn classify(signals: &JourneySignals, interest: u8, now: DateTime<Utc>) -> StageDecision {
    if signals.next_callback_at.is_some_and(|at| at > now) {
        return decision(JourneyStage::CallbackSet, "explicit callback scheduled");
    }
    if signals.appointment_set {
        return decision(JourneyStage::Booked, "appointment set");
    }
    match signals.lead_status {
        LeadStatus::Converted => {
            return decision(JourneyStage::ClosedWon, "lead marked converted");
        }
        LeadStatus::Lost | LeadStatus::DoNotCall => {
            return decision(JourneyStage::ClosedLost, "lead marked lost or do-not-call");
        }
        _ => {}
    }

    let silence = signals.days_since_contact(now);

    if interest >= HOT_INTEREST && silence.is_some_and(|d| d <= HOT_RECENCY_DAYS) {
        return decision(JourneyStage::Hot, "high interest with recent contact");
    }
    if signals.has_history() && silence.is_some_and(|d| d > DORMANT_SILENCE_DAYS) {
        return StageDecision {
            stage: JourneyStage::Dormant,
            reason: format!("no contact for {} days", silence.unwrap_or_default()),
        };
    }
    if signals.calls_answered > 0
        && silence.is_some_and(|d| d > STALL_SILENCE_DAYS)
        && interest < STALL_INTEREST_CEILING
    {
        return decision(JourneyStage::Stalled, "answered before but gone quiet");
    }
    if signals.calls_answered > 0 && interest <= NURTURE_INTEREST_CEILING {
        return decision(JourneyStage::Nurturing, "answered before with low interest");
    }
    if signals.calls_answered > 0 || signals.sms_received > 0 {
        return decision(JourneyStage::Engaged, "answered a call or replied by sms");
    }
    if signals.call_attempts > 0 || signals.sms_sent > 0 {
        return decision(JourneyStage::Attempting, "outbound attempts without a connect");
    }
    decision(JourneyStage::Fresh, "no contact history")
}

fn decision(stage: JourneyStage, reason: &str) -> StageDecision {
    StageDecision { stage, reason: reason.to_string() }
}
