//! Weighted lead priority scoring.
//!
//! Four calibrated components, each on a 0-100 scale, combined by weights
//! that sum to 1 by convention (not enforced, so operators can experiment).

use crate::domain::lead::LeadStatus;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoringWeights {
    pub engagement: f64,
    pub recency: f64,
    pub answer_rate: f64,
    pub status: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self { engagement: 0.4, recency: 0.3, answer_rate: 0.2, status: 0.1 }
    }
}

/// Per-lead interaction signals the score is computed from.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LeadSignals {
    pub answered_calls: u32,
    pub inbound_sms: u32,
    pub total_calls: u32,
    /// None when the lead has never been contacted.
    pub days_since_contact: Option<i64>,
    pub status: LeadStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ComponentScores {
    pub engagement: f64,
    pub recency: f64,
    pub answer_rate: f64,
    pub status: f64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LeadScorer {
    weights: ScoringWeights,
}

/// Neutral answer-rate score for leads that have never been called.
const NEUTRAL_ANSWER_RATE: f64 = 50.0;

impl LeadScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn component_scores(&self, signals: &LeadSignals) -> ComponentScores {
        ComponentScores {
            engagement: engagement_score(signals),
            recency: recency_score(signals.days_since_contact),
            answer_rate: answer_rate_score(signals),
            status: status_bonus(signals.status),
        }
    }

    /// Weighted sum, rounded to two decimals so repeated runs on unchanged
    /// data write back identical values.
    pub fn score(&self, signals: &LeadSignals) -> f64 {
        let components = self.component_scores(signals);
        let total = components.engagement * self.weights.engagement
            + components.recency * self.weights.recency
            + components.answer_rate * self.weights.answer_rate
            + components.status * self.weights.status;
        (total * 100.0).round() / 100.0
    }
}

fn engagement_score(signals: &LeadSignals) -> f64 {
    let raw = signals.answered_calls * 30 + signals.inbound_sms * 20;
    f64::from(raw.min(100))
}

fn recency_score(days_since_contact: Option<i64>) -> f64 {
    match days_since_contact {
        Some(days) if days < 1 => 100.0,
        Some(days) if days < 3 => 80.0,
        Some(days) if days < 7 => 60.0,
        Some(days) if days < 14 => 40.0,
        Some(days) if days < 30 => 20.0,
        _ => 10.0,
    }
}

fn answer_rate_score(signals: &LeadSignals) -> f64 {
    if signals.total_calls == 0 {
        return NEUTRAL_ANSWER_RATE;
    }
    f64::from(signals.answered_calls) / f64::from(signals.total_calls) * 100.0
}

fn status_bonus(status: LeadStatus) -> f64 {
    match status {
        LeadStatus::Qualified => 100.0,
        LeadStatus::Callback => 90.0,
        LeadStatus::New => 70.0,
        LeadStatus::Contacted => 50.0,
        LeadStatus::Converted | LeadStatus::Lost | LeadStatus::DoNotCall => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::{LeadScorer, LeadSignals, ScoringWeights};
    use crate::domain::lead::LeadStatus;

    #[test]
    fn engagement_caps_at_one_hundred() {
        let scorer = LeadScorer::new();
        let signals = LeadSignals {
            answered_calls: 10,
            inbound_sms: 10,
            total_calls: 10,
            days_since_contact: Some(0),
            status: LeadStatus::Qualified,
        };
        let components = scorer.component_scores(&signals);
        assert_eq!(components.engagement, 100.0);
    }

    #[test]
    fn never_called_lead_gets_neutral_answer_rate() {
        let scorer = LeadScorer::new();
        let signals = LeadSignals { status: LeadStatus::New, ..Default::default() };
        let components = scorer.component_scores(&signals);
        assert_eq!(components.answer_rate, 50.0);
    }

    #[test]
    fn recency_buckets_step_down_with_age() {
        let scorer = LeadScorer::new();
        let at = |days: Option<i64>| {
            scorer
                .component_scores(&LeadSignals { days_since_contact: days, ..Default::default() })
                .recency
        };
        assert_eq!(at(Some(0)), 100.0);
        assert_eq!(at(Some(2)), 80.0);
        assert_eq!(at(Some(5)), 60.0);
        assert_eq!(at(Some(10)), 40.0);
        assert_eq!(at(Some(21)), 20.0);
        assert_eq!(at(Some(45)), 10.0);
        assert_eq!(at(None), 10.0);
    }

    #[test]
    fn weighted_score_matches_hand_computation() {
        let scorer = LeadScorer::new();
        let signals = LeadSignals {
            answered_calls: 2,   // engagement 60
            inbound_sms: 0,
            total_calls: 4,      // answer rate 50
            days_since_contact: Some(2), // recency 80
            status: LeadStatus::Qualified, // bonus 100
        };
        // 60*0.4 + 80*0.3 + 50*0.2 + 100*0.1 = 24 + 24 + 10 + 10 = 68
        assert_eq!(scorer.score(&signals), 68.0);
    }

    #[test]
    fn custom_weights_shift_the_score() {
        let scorer = LeadScorer::with_weights(ScoringWeights {
            engagement: 1.0,
            recency: 0.0,
            answer_rate: 0.0,
            status: 0.0,
        });
        let signals = LeadSignals {
            answered_calls: 1,
            inbound_sms: 1,
            total_calls: 1,
            days_since_contact: Some(0),
            status: LeadStatus::Contacted,
        };
        assert_eq!(scorer.score(&signals), 50.0);
    }

    #[test]
    fn score_is_rounded_to_two_decimals() {
        let scorer = LeadScorer::new();
        let signals = LeadSignals {
            answered_calls: 1,
            inbound_sms: 0,
            total_calls: 3, // answer rate 33.333...
            days_since_contact: Some(0),
            status: LeadStatus::New,
        };
        // 30*0.4 + 100*0.3 + 33.333*0.2 + 70*0.1 = 12 + 30 + 6.6667 + 7 = 55.67
        assert_eq!(scorer.score(&signals), 55.67);
    }
}
