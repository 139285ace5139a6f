//! Top-level decision engine. Combines goal and pacing signals into
//! candidate actions; never executes anything itself.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::domain::lead::Lead;
use crate::domain::number::PhoneNumber;
use crate::domain::queue::{ActionSource, ActionType};
use crate::domain::run::Decision;
use crate::domain::settings::AutomationSettings;
use crate::domain::CampaignId;
use crate::goals::GoalProgress;
use crate::pacing::PacingRecommendation;

/// Behind-goal threshold before lead queueing kicks in.
pub const CALLS_GAP_THRESHOLD: u32 = 20;
/// Most leads queued in one decision.
pub const QUEUE_MAX: usize = 30;
/// Follow-up SMS proposals per run.
pub const FOLLOWUP_LIMIT: usize = 3;
/// Quarantine proposals per run.
pub const QUARANTINE_LIMIT: usize = 5;
/// External spam score above which a number gets quarantined.
pub const SPAM_THRESHOLD: u32 = 70;
pub const QUARANTINE_DAYS: u32 = 30;
/// A contact is stale after this many days without a touch.
pub const STALE_CONTACT_DAYS: i64 = 2;

const PACING_PRIORITY: u32 = 2;
const QUEUE_PRIORITY: u32 = 3;
const FOLLOWUP_PRIORITY: u32 = 5;
const QUARANTINE_PRIORITY: u32 = 2;

/// Everything the decision pass reads, gathered up front so the pass
/// itself is pure and order-deterministic.
pub struct DecisionInputs<'a> {
    pub settings: &'a AutomationSettings,
    pub progress: &'a GoalProgress,
    pub pacing: Option<&'a PacingRecommendation>,
    /// Eligible leads sorted by priority score, highest first.
    pub scored_leads: &'a [Lead],
    /// Leads in `contacted` status with no scheduled callback.
    pub stale_contacts: &'a [Lead],
    pub numbers: &'a [PhoneNumber],
    pub first_campaign: Option<&'a CampaignId>,
    pub now: DateTime<Utc>,
    pub local_hour: u32,
    pub window_start_hour: u32,
    pub window_end_hour: u32,
}

/// Produce this run's candidate actions in fixed order: pacing, queueing,
/// follow-ups, quarantine. Outside the calling window or under
/// suggestions-only autonomy the engine stays silent.
pub fn decide(inputs: &DecisionInputs<'_>) -> Vec<Decision> {
    if !inputs.settings.autonomy.allows_decisions() {
        return Vec::new();
    }
    if inputs.local_hour < inputs.window_start_hour || inputs.local_hour >= inputs.window_end_hour {
        return Vec::new();
    }

    let mut decisions = Vec::new();

    if inputs.settings.auto_pacing {
        if let Some(rec) = inputs.pacing {
            if rec.should_adjust {
                decisions.push(Decision {
                    action_type: ActionType::AdjustPacing,
                    lead_id: None,
                    params: json!({
                        "current_rate": rec.current_rate,
                        "new_rate": rec.recommended_rate,
                    }),
                    priority: PACING_PRIORITY,
                    reasoning: rec.reason.clone(),
                    source: ActionSource::AutonomousEngine,
                });
            }
        }
    }

    if inputs.settings.auto_queueing
        && inputs.progress.calls_gap > CALLS_GAP_THRESHOLD
        && !inputs.progress.on_track
    {
        let take = QUEUE_MAX.min(inputs.progress.calls_gap as usize);
        let lead_ids: Vec<&str> = inputs
            .scored_leads
            .iter()
            .filter(|lead| lead.status.is_actionable() && !lead.do_not_call)
            .take(take)
            .map(|lead| lead.id.0.as_str())
            .collect();
        if !lead_ids.is_empty() {
            if let Some(campaign) = inputs.first_campaign {
                decisions.push(Decision {
                    action_type: ActionType::QueueLeads,
                    lead_id: None,
                    params: json!({
                        "campaign_id": campaign.0,
                        "lead_ids": lead_ids,
                    }),
                    priority: QUEUE_PRIORITY,
                    reasoning: format!(
                        "{} calls behind goal and off pace, queueing {} top-scored leads",
                        inputs.progress.calls_gap,
                        lead_ids.len()
                    ),
                    source: ActionSource::AutonomousEngine,
                });
            }
        }
    }

    if inputs.settings.auto_followups {
        let now = inputs.now;
        for lead in inputs
            .stale_contacts
            .iter()
            .filter(|lead| {
                !lead.do_not_call
                    && !lead.has_future_callback(now)
                    && lead.days_since_contact(now).is_some_and(|d| d >= STALE_CONTACT_DAYS)
            })
            .take(FOLLOWUP_LIMIT)
        {
            decisions.push(Decision {
                action_type: ActionType::SendFollowupSms,
                lead_id: Some(lead.id.clone()),
                params: json!({
                    "lead_id": lead.id.0,
                    "to": lead.phone,
                    "message": format!(
                        "Hi {}, we spoke a couple of days ago. Would you like to pick things back up?",
                        lead.first_name
                    ),
                }),
                priority: FOLLOWUP_PRIORITY,
                reasoning: format!(
                    "lead {} contacted {} days ago with no callback scheduled",
                    lead.id.0,
                    lead.days_since_contact(now).unwrap_or_default()
                ),
                source: ActionSource::AutonomousEngine,
            });
        }
    }

    if inputs.settings.auto_quarantine {
        let now = inputs.now;
        for number in inputs
            .numbers
            .iter()
            .filter(|n| n.active && n.spam_score > SPAM_THRESHOLD && !n.is_quarantined(now))
            .take(QUARANTINE_LIMIT)
        {
            decisions.push(Decision {
                action_type: ActionType::QuarantineNumber,
                lead_id: None,
                params: json!({
                    "phone_number_id": number.id.0,
                    "days": QUARANTINE_DAYS,
                }),
                priority: QUARANTINE_PRIORITY,
                reasoning: format!(
                    "number {} has spam score {} (threshold {SPAM_THRESHOLD})",
                    number.number, number.spam_score
                ),
                source: ActionSource::AutonomousEngine,
            });
        }
    }

    decisions
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{decide, DecisionInputs, FOLLOWUP_LIMIT, QUARANTINE_LIMIT};
    use crate::domain::lead::{Lead, LeadStatus};
    use crate::domain::number::PhoneNumber;
    use crate::domain::queue::ActionType;
    use crate::domain::settings::{AutomationSettings, AutonomyLevel};
    use crate::domain::{CampaignId, LeadId, PhoneNumberId, UserId};
    use crate::goals::GoalProgress;
    use crate::pacing::PacingRecommendation;

    fn settings() -> AutomationSettings {
        let mut settings = AutomationSettings::defaults_for(UserId("U-1".to_string()));
        settings.enabled = true;
        settings.autonomy = AutonomyLevel::FullAuto;
        settings
    }

    fn progress(calls_gap: u32, on_track: bool) -> GoalProgress {
        GoalProgress {
            calls: 0,
            appointments: 0,
            conversations: 0,
            calls_gap,
            appointments_gap: 0,
            conversations_gap: 0,
            on_track,
        }
    }

    fn lead(id: &str, status: LeadStatus, days_ago: i64) -> Lead {
        Lead {
            id: LeadId(id.to_string()),
            user_id: UserId("U-1".to_string()),
            first_name: "Dana".to_string(),
            phone: "+15550100".to_string(),
            status,
            do_not_call: false,
            last_contacted_at: Some(Utc::now() - Duration::days(days_ago)),
            next_callback_at: None,
            priority_score: 50.0,
            created_at: Utc::now(),
        }
    }

    fn base_inputs<'a>(
        settings: &'a AutomationSettings,
        progress: &'a GoalProgress,
    ) -> DecisionInputs<'a> {
        DecisionInputs {
            settings,
            progress,
            pacing: None,
            scored_leads: &[],
            stale_contacts: &[],
            numbers: &[],
            first_campaign: None,
            now: Utc::now(),
            local_hour: 12,
            window_start_hour: 9,
            window_end_hour: 17,
        }
    }

    #[test]
    fn suggestions_only_and_after_hours_produce_nothing() {
        let mut cfg = settings();
        cfg.autonomy = AutonomyLevel::SuggestionsOnly;
        let prog = progress(50, false);
        assert!(decide(&base_inputs(&cfg, &prog)).is_empty());

        let cfg = settings();
        let mut inputs = base_inputs(&cfg, &prog);
        inputs.local_hour = 18;
        assert!(decide(&inputs).is_empty());
        inputs.local_hour = 8;
        assert!(decide(&inputs).is_empty());
    }

    #[test]
    fn pacing_change_is_proposed_when_recommended_and_opted_in() {
        let cfg = settings();
        let prog = progress(0, true);
        let rec = PacingRecommendation {
            current_rate: 50,
            recommended_rate: 25,
            should_adjust: true,
            reason: "error rate above 25%".to_string(),
        };

        let mut inputs = base_inputs(&cfg, &prog);
        inputs.pacing = Some(&rec);
        let decisions = decide(&inputs);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action_type, ActionType::AdjustPacing);
        assert_eq!(decisions[0].params["new_rate"], 25);
        assert_eq!(decisions[0].priority, 2);

        let mut opted_out = settings();
        opted_out.auto_pacing = false;
        let mut inputs = base_inputs(&opted_out, &prog);
        inputs.pacing = Some(&rec);
        assert!(decide(&inputs).is_empty());
    }

    #[test]
    fn behind_goal_queues_top_scored_leads_capped_at_thirty() {
        let cfg = settings();
        let prog = progress(60, false);
        let leads: Vec<Lead> =
            (0..40).map(|i| lead(&format!("L-{i}"), LeadStatus::New, 1)).collect();
        let campaign = CampaignId("C-1".to_string());

        let mut inputs = base_inputs(&cfg, &prog);
        inputs.scored_leads = &leads;
        inputs.first_campaign = Some(&campaign);
        let decisions = decide(&inputs);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action_type, ActionType::QueueLeads);
        let ids = decisions[0].params["lead_ids"].as_array().map(Vec::len);
        assert_eq!(ids, Some(30));
    }

    #[test]
    fn small_gap_or_on_track_skips_queueing() {
        let cfg = settings();
        let leads = vec![lead("L-1", LeadStatus::New, 1)];
        let campaign = CampaignId("C-1".to_string());

        // Gap at the threshold does not trigger.
        let prog = progress(20, false);
        let mut inputs = base_inputs(&cfg, &prog);
        inputs.scored_leads = &leads;
        inputs.first_campaign = Some(&campaign);
        assert!(decide(&inputs).is_empty());

        // Large gap but on track does not trigger either.
        let prog = progress(60, true);
        let mut inputs = base_inputs(&cfg, &prog);
        inputs.scored_leads = &leads;
        inputs.first_campaign = Some(&campaign);
        assert!(decide(&inputs).is_empty());
    }

    #[test]
    fn queue_gap_smaller_than_cap_limits_the_batch() {
        let cfg = settings();
        let prog = progress(25, false);
        let leads: Vec<Lead> =
            (0..40).map(|i| lead(&format!("L-{i}"), LeadStatus::New, 1)).collect();
        let campaign = CampaignId("C-1".to_string());

        let mut inputs = base_inputs(&cfg, &prog);
        inputs.scored_leads = &leads;
        inputs.first_campaign = Some(&campaign);
        let decisions = decide(&inputs);
        let ids = decisions[0].params["lead_ids"].as_array().map(Vec::len);
        assert_eq!(ids, Some(25));
    }

    #[test]
    fn stale_contact_gets_exactly_one_followup_up_to_the_cap() {
        let cfg = settings();
        let prog = progress(0, true);
        let stale: Vec<Lead> =
            (0..5).map(|i| lead(&format!("L-{i}"), LeadStatus::Contacted, 3)).collect();

        let mut inputs = base_inputs(&cfg, &prog);
        inputs.stale_contacts = &stale;
        let decisions = decide(&inputs);
        assert_eq!(decisions.len(), FOLLOWUP_LIMIT);
        assert!(decisions.iter().all(|d| d.action_type == ActionType::SendFollowupSms));
        assert_eq!(decisions[0].lead_id.as_ref().map(|id| id.0.as_str()), Some("L-0"));
    }

    #[test]
    fn recent_contact_or_scheduled_callback_skips_followup() {
        let cfg = settings();
        let prog = progress(0, true);

        let recent = vec![lead("L-1", LeadStatus::Contacted, 1)];
        let mut inputs = base_inputs(&cfg, &prog);
        inputs.stale_contacts = &recent;
        assert!(decide(&inputs).is_empty());

        let mut with_callback = lead("L-2", LeadStatus::Contacted, 3);
        with_callback.next_callback_at = Some(Utc::now() + Duration::hours(5));
        let stale = vec![with_callback];
        let mut inputs = base_inputs(&cfg, &prog);
        inputs.stale_contacts = &stale;
        assert!(decide(&inputs).is_empty());
    }

    #[test]
    fn spammy_numbers_are_quarantined_up_to_the_cap() {
        let cfg = settings();
        let prog = progress(0, true);
        let numbers: Vec<PhoneNumber> = (0..8)
            .map(|i| PhoneNumber {
                id: PhoneNumberId(format!("N-{i}")),
                user_id: UserId("U-1".to_string()),
                number: format!("+1555010{i}"),
                active: true,
                spam_score: 85,
                quarantined_until: None,
            })
            .collect();

        let mut inputs = base_inputs(&cfg, &prog);
        inputs.numbers = &numbers;
        let decisions = decide(&inputs);
        assert_eq!(decisions.len(), QUARANTINE_LIMIT);
        assert!(decisions.iter().all(|d| d.action_type == ActionType::QuarantineNumber));
        assert_eq!(decisions[0].params["days"], 30);
    }

    #[test]
    fn clean_or_already_quarantined_numbers_are_left_alone() {
        let cfg = settings();
        let prog = progress(0, true);
        let numbers = vec![
            PhoneNumber {
                id: PhoneNumberId("N-1".to_string()),
                user_id: UserId("U-1".to_string()),
                number: "+15550101".to_string(),
                active: true,
                spam_score: 70,
                quarantined_until: None,
            },
            PhoneNumber {
                id: PhoneNumberId("N-2".to_string()),
                user_id: UserId("U-1".to_string()),
                number: "+15550102".to_string(),
                active: true,
                spam_score: 95,
                quarantined_until: Some(Utc::now() + Duration::days(10)),
            },
        ];

        let mut inputs = base_inputs(&cfg, &prog);
        inputs.numbers = &numbers;
        assert!(decide(&inputs).is_empty());
    }
}
