//! Per-lead action planning. Explicit callback requests always take
//! precedence over the playbook; rules only ever fire for leads without a
//! future callback.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use serde_json::json;

use crate::domain::journey::{JourneyStage, JourneyState};
use crate::domain::lead::Lead;
use crate::domain::playbook::{
    first_matching_rule, PlaybookRule, RuleActionKind, RuleMetrics,
};
use crate::domain::queue::{ActionSource, ActionType};
use crate::domain::run::Decision;
use crate::domain::RuleId;

/// Minutes before an explicit callback at which the reminder SMS goes out.
pub const CALLBACK_REMINDER_LEAD_MINUTES: i64 = 90;
/// Tolerance around the requested callback time for firing the call.
pub const CALLBACK_TOLERANCE_MINUTES: i64 = 6;

const CALLBACK_PRIORITY: u32 = 1;
const RULE_ACTION_PRIORITY: u32 = 4;

#[derive(Clone, Copy, Debug)]
pub struct PlannerContext {
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
    pub window_start_hour: u32,
    pub window_end_hour: u32,
}

/// What the planner wants done for one lead this run.
#[derive(Clone, Debug, PartialEq)]
pub enum JourneyPlan {
    /// Queue the pre-callback reminder SMS; the caller must stamp
    /// `callback_reminder_sent_at` so it queues at most once.
    CallbackReminder(Decision),
    /// Queue the callback call; the caller must stamp
    /// `callback_call_queued_at`.
    CallbackCall(Decision),
    /// A playbook rule fired and its action template was materialized.
    RuleAction { decision: Decision, rule_id: RuleId },
    /// Nothing to do now; revisit at `at`.
    Schedule { action: Option<RuleActionKind>, at: DateTime<Utc>, reason: String },
    /// Nothing to do and nothing to schedule.
    Hold(String),
}

pub fn plan(
    lead: &Lead,
    state: &JourneyState,
    rules: &[PlaybookRule],
    ctx: &PlannerContext,
) -> JourneyPlan {
    if state.stage.is_terminal() {
        return JourneyPlan::Hold(format!("stage {} is terminal", state.stage.as_str()));
    }

    if let Some(callback_at) = lead.next_callback_at {
        let minutes_until = (callback_at - ctx.now).num_minutes();
        if minutes_until >= -CALLBACK_TOLERANCE_MINUTES {
            return plan_callback(lead, state, callback_at, minutes_until);
        }
        // Callback time has elapsed beyond tolerance; the lead falls back to
        // the playbook on this and later runs.
    }

    plan_from_rules(lead, state, rules, ctx)
}

fn plan_callback(
    lead: &Lead,
    state: &JourneyState,
    callback_at: DateTime<Utc>,
    minutes_until: i64,
) -> JourneyPlan {
    if minutes_until.abs() <= CALLBACK_TOLERANCE_MINUTES {
        if state.callback_call_queued_at.is_some() {
            return JourneyPlan::Hold("callback call already queued".to_string());
        }
        return JourneyPlan::CallbackCall(Decision {
            action_type: ActionType::JourneyCall,
            lead_id: Some(lead.id.clone()),
            params: json!({
                "lead_id": lead.id.0,
                "phone_number": lead.phone,
                "source": ActionSource::JourneyEngine.as_str(),
            }),
            priority: CALLBACK_PRIORITY,
            reasoning: format!(
                "explicit callback requested for {}",
                callback_at.to_rfc3339()
            ),
            source: ActionSource::JourneyEngine,
        });
    }

    if minutes_until <= CALLBACK_REMINDER_LEAD_MINUTES {
        if state.callback_reminder_sent_at.is_none() {
            return JourneyPlan::CallbackReminder(Decision {
                action_type: ActionType::SendFollowupSms,
                lead_id: Some(lead.id.clone()),
                params: json!({
                    "lead_id": lead.id.0,
                    "to": lead.phone,
                    "message": format!(
                        "Hi {}, just a reminder that we have a call scheduled shortly. Talk soon!",
                        lead.first_name
                    ),
                }),
                priority: CALLBACK_PRIORITY,
                reasoning: format!(
                    "callback reminder, call scheduled for {}",
                    callback_at.to_rfc3339()
                ),
                source: ActionSource::JourneyEngine,
            });
        }
        return JourneyPlan::Schedule {
            action: Some(RuleActionKind::Call),
            at: callback_at,
            reason: "reminder sent, waiting for the callback time".to_string(),
        };
    }

    let next_check = callback_at - Duration::minutes(CALLBACK_REMINDER_LEAD_MINUTES);
    JourneyPlan::Schedule {
        action: Some(RuleActionKind::Sms),
        at: next_check,
        reason: format!("callback at {}, reminder due later", callback_at.to_rfc3339()),
    }
}

fn plan_from_rules(
    lead: &Lead,
    state: &JourneyState,
    rules: &[PlaybookRule],
    ctx: &PlannerContext,
) -> JourneyPlan {
    let metrics = RuleMetrics {
        stage: state.stage,
        touches: state.touch_count(),
        days_in_stage: state.days_in_stage(ctx.now).max(0) as u32,
        interest: state.interest_level,
        has_future_callback: lead.has_future_callback(ctx.now),
    };

    let Some(rule) = first_matching_rule(rules, &metrics) else {
        return JourneyPlan::Hold(format!(
            "no active playbook rule matches stage {}",
            state.stage.as_str()
        ));
    };

    // Delay gate: the rule may only act once enough time has passed since
    // the last touch.
    if let Some(last) = lead.last_contacted_at {
        let elapsed_hours = (ctx.now - last).num_hours();
        if elapsed_hours < i64::from(rule.delay_hours) {
            let mut due = last + Duration::hours(i64::from(rule.delay_hours));
            if rule.respect_calling_window {
                due = shift_into_window(due, state.best_hour_to_call, ctx);
            }
            return JourneyPlan::Schedule {
                action: Some(rule.action),
                at: due,
                reason: format!(
                    "rule {} waits {}h after last touch",
                    rule.id.0, rule.delay_hours
                ),
            };
        }
    }

    if rule.respect_calling_window && !in_window(ctx.now, ctx) {
        let due = shift_into_window(ctx.now, state.best_hour_to_call, ctx);
        return JourneyPlan::Schedule {
            action: Some(rule.action),
            at: due,
            reason: format!("rule {} deferred to the calling window", rule.id.0),
        };
    }

    materialize(rule, lead, state, ctx)
}

fn materialize(
    rule: &PlaybookRule,
    lead: &Lead,
    state: &JourneyState,
    ctx: &PlannerContext,
) -> JourneyPlan {
    let reasoning = format!(
        "playbook rule {} matched stage {} (touches {}, interest {})",
        rule.id.0,
        state.stage.as_str(),
        state.touch_count(),
        state.interest_level
    );

    let decision = match rule.action {
        RuleActionKind::Call => Decision {
            action_type: ActionType::JourneyCall,
            lead_id: Some(lead.id.clone()),
            params: json!({
                "lead_id": lead.id.0,
                "phone_number": lead.phone,
                "source": ActionSource::JourneyEngine.as_str(),
            }),
            priority: RULE_ACTION_PRIORITY,
            reasoning,
            source: ActionSource::JourneyEngine,
        },
        RuleActionKind::Sms => Decision {
            action_type: ActionType::SendFollowupSms,
            lead_id: Some(lead.id.clone()),
            params: json!({
                "lead_id": lead.id.0,
                "to": lead.phone,
                "message": render_template(rule.message_template.as_deref(), lead),
            }),
            priority: RULE_ACTION_PRIORITY,
            reasoning,
            source: ActionSource::JourneyEngine,
        },
        RuleActionKind::AiSms => Decision {
            action_type: ActionType::JourneyAiSms,
            lead_id: Some(lead.id.clone()),
            params: json!({
                "lead_id": lead.id.0,
                "phone_number": lead.phone,
                "prompt": render_template(rule.message_template.as_deref(), lead),
                "context": {
                    "stage": state.stage.as_str(),
                    "interest_level": state.interest_level,
                    "touches": state.touch_count(),
                },
            }),
            priority: RULE_ACTION_PRIORITY,
            reasoning,
            source: ActionSource::JourneyEngine,
        },
        RuleActionKind::MoveStage => {
            let target = rule.move_to_stage.unwrap_or(JourneyStage::Dormant);
            Decision {
                action_type: ActionType::UpdateLeadStatus,
                lead_id: Some(lead.id.clone()),
                params: json!({
                    "lead_id": lead.id.0,
                    "stage": target.as_str(),
                }),
                priority: RULE_ACTION_PRIORITY,
                reasoning,
                source: ActionSource::JourneyEngine,
            }
        }
        RuleActionKind::Wait => {
            let hours = rule.delay_hours.max(1);
            return JourneyPlan::Schedule {
                action: Some(RuleActionKind::Wait),
                at: ctx.now + Duration::hours(i64::from(hours)),
                reason: format!("rule {} holds for {}h", rule.id.0, hours),
            };
        }
    };

    JourneyPlan::RuleAction { decision, rule_id: rule.id.clone() }
}

fn render_template(template: Option<&str>, lead: &Lead) -> String {
    template
        .unwrap_or("Hi {first_name}, just checking in. Is now still a good time to talk?")
        .replace("{first_name}", &lead.first_name)
}

fn in_window(at: DateTime<Utc>, ctx: &PlannerContext) -> bool {
    let hour = at.with_timezone(&ctx.offset).hour();
    hour >= ctx.window_start_hour && hour < ctx.window_end_hour
}

/// Move an instant into the calling window, preferring the lead's best hour
/// when it lies inside the window. Past-the-window times roll to the next
/// day's opening.
fn shift_into_window(
    at: DateTime<Utc>,
    best_hour: Option<u32>,
    ctx: &PlannerContext,
) -> DateTime<Utc> {
    if in_window(at, ctx) {
        return at;
    }
    let target_hour = best_hour
        .filter(|h| *h >= ctx.window_start_hour && *h < ctx.window_end_hour)
        .unwrap_or(ctx.window_start_hour);

    let local = at.with_timezone(&ctx.offset);
    let midnight = local
        - Duration::hours(i64::from(local.hour()))
        - Duration::minutes(i64::from(local.minute()))
        - Duration::seconds(i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond()));
    let mut candidate = midnight + Duration::hours(i64::from(target_hour));
    if candidate <= local {
        candidate += Duration::days(1);
    }
    candidate.with_timezone(&Utc)
}
