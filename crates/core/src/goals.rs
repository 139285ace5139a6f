//! Goal progress assessment. Pure: counts in, progress out.

use crate::domain::settings::AutomationSettings;

/// Today's activity counts since local midnight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DailyCounts {
    pub calls: u32,
    pub appointments: u32,
    pub conversations: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GoalProgress {
    pub calls: u32,
    pub appointments: u32,
    pub conversations: u32,
    pub calls_gap: u32,
    pub appointments_gap: u32,
    pub conversations_gap: u32,
    pub on_track: bool,
}

// The projection window is intentionally the fixed 9-17 business day, not
// the user's configured calling hours. Preserved from the original behavior;
// see DESIGN.md.
const BUSINESS_DAY_START: u32 = 9;
const BUSINESS_DAY_HOURS: u32 = 8;
const ON_TRACK_FRACTION: f64 = 0.8;

pub fn assess(settings: &AutomationSettings, counts: &DailyCounts, local_hour: u32) -> GoalProgress {
    GoalProgress {
        calls: counts.calls,
        appointments: counts.appointments,
        conversations: counts.conversations,
        calls_gap: settings.daily_call_goal.saturating_sub(counts.calls),
        appointments_gap: settings.daily_appointment_goal.saturating_sub(counts.appointments),
        conversations_gap: settings.daily_conversation_goal.saturating_sub(counts.conversations),
        on_track: is_on_track(settings.daily_call_goal, counts.calls, local_hour),
    }
}

/// Linear extrapolation of today's call rate across the business window,
/// compared against 80% of the daily call goal. Before the window opens
/// nothing is expected yet, so the user is trivially on track.
fn is_on_track(daily_call_goal: u32, calls_so_far: u32, local_hour: u32) -> bool {
    if daily_call_goal == 0 {
        return true;
    }
    if local_hour < BUSINESS_DAY_START {
        return true;
    }
    let elapsed = (local_hour - BUSINESS_DAY_START).min(BUSINESS_DAY_HOURS).max(1);
    let projected = f64::from(calls_so_far) / f64::from(elapsed) * f64::from(BUSINESS_DAY_HOURS);
    projected >= ON_TRACK_FRACTION * f64::from(daily_call_goal)
}
