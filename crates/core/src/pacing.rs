//! Dial-rate control. A hysteretic threshold ladder, not a PID controller:
//! it only reacts to coarse error/answer bands so that small samples cannot
//! make the rate oscillate.

use serde::{Deserialize, Serialize};

/// Call outcomes observed over the trailing window (60 minutes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallWindowStats {
    pub total: u32,
    pub failed: u32,
    pub answered: u32,
}

impl CallWindowStats {
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.failed) / f64::from(self.total)
    }

    pub fn answer_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.answered) / f64::from(self.total)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacingRecommendation {
    pub current_rate: u32,
    pub recommended_rate: u32,
    pub should_adjust: bool,
    pub reason: String,
}

/// Minimum calls in the window before any recommendation is made.
pub const MIN_SAMPLE: u32 = 10;
/// Hard floor and ceiling for calls-per-minute.
pub const MIN_RATE: u32 = 10;
pub const MAX_RATE: u32 = 100;

const SEVERE_ERROR_RATE: f64 = 0.25;
const ELEVATED_ERROR_RATE: f64 = 0.10;
const HEALTHY_ERROR_RATE: f64 = 0.03;
const HEALTHY_ANSWER_RATE: f64 = 0.15;

/// First matching rung wins, top to bottom:
/// error > 0.25 halves the pace, error > 0.10 trims to 75%, a healthy
/// window (error < 0.03, answers > 0.15) grows to 125% up to the ceiling.
pub fn recommend(stats: &CallWindowStats, current_rate: u32) -> PacingRecommendation {
    if stats.total < MIN_SAMPLE {
        return PacingRecommendation {
            current_rate,
            recommended_rate: current_rate,
            should_adjust: false,
            reason: format!(
                "insufficient data: {} calls in the last hour (need {MIN_SAMPLE})",
                stats.total
            ),
        };
    }

    let error_rate = stats.error_rate();
    let answer_rate = stats.answer_rate();

    let (recommended, reason) = if error_rate > SEVERE_ERROR_RATE {
        (
            (current_rate / 2).max(MIN_RATE),
            format!("error rate {:.1}% above 25%, halving pace", error_rate * 100.0),
        )
    } else if error_rate > ELEVATED_ERROR_RATE {
        (
            (current_rate * 3 / 4).max(MIN_RATE),
            format!("error rate {:.1}% above 10%, reducing pace to 75%", error_rate * 100.0),
        )
    } else if error_rate < HEALTHY_ERROR_RATE
        && answer_rate > HEALTHY_ANSWER_RATE
        && current_rate < MAX_RATE
    {
        (
            (current_rate * 5 / 4).min(MAX_RATE),
            format!(
                "healthy window (errors {:.1}%, answers {:.1}%), increasing pace to 125%",
                error_rate * 100.0,
                answer_rate * 100.0
            ),
        )
    } else {
        (current_rate, "rates within normal bands, holding pace".to_string())
    };

    PacingRecommendation {
        current_rate,
        recommended_rate: recommended,
        should_adjust: recommended != current_rate,
        reason,
    }
}
