//! Playbook rules: the user-editable condition -> action table that drives
//! journey follow-ups. Rules are data, not code; the engine is a small
//! interpreter that applies the first matching rule per stage per run.

use serde::{Deserialize, Serialize};

use super::journey::JourneyStage;
use super::{RuleId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionKind {
    Call,
    Sms,
    AiSms,
    MoveStage,
    Wait,
}

impl RuleActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Sms => "sms",
            Self::AiSms => "ai_sms",
            Self::MoveStage => "move_stage",
            Self::Wait => "wait",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "call" => Some(Self::Call),
            "sms" => Some(Self::Sms),
            "ai_sms" => Some(Self::AiSms),
            "move_stage" => Some(Self::MoveStage),
            "wait" => Some(Self::Wait),
            _ => None,
        }
    }
}

/// One row of the playbook table, keyed by stage and metric ranges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybookRule {
    pub id: RuleId,
    pub user_id: UserId,
    pub stage: JourneyStage,
    /// Lower number wins within a stage.
    pub priority: u32,
    pub min_touches: u32,
    pub max_touches: u32,
    pub min_days_in_stage: u32,
    pub max_days_in_stage: u32,
    pub min_interest: u8,
    pub max_interest: u8,
    /// When set, the rule only fires for leads without a scheduled callback.
    /// Explicit callbacks are handled by dedicated logic and must never be
    /// shadowed by a playbook rule.
    pub requires_no_callback: bool,
    pub action: RuleActionKind,
    /// Message body for `sms`, prompt for `ai_sms`. Supports `{first_name}`.
    pub message_template: Option<String>,
    /// Target stage for `move_stage`.
    pub move_to_stage: Option<JourneyStage>,
    /// Minimum hours since the last touch before the rule may act.
    pub delay_hours: u32,
    pub respect_calling_window: bool,
    pub active: bool,
}

/// Metrics a rule is matched against, computed fresh each run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuleMetrics {
    pub stage: JourneyStage,
    pub touches: u32,
    pub days_in_stage: u32,
    pub interest: u8,
    pub has_future_callback: bool,
}

impl PlaybookRule {
    pub fn matches(&self, metrics: &RuleMetrics) -> bool {
        if !self.active || self.stage != metrics.stage {
            return false;
        }
        if metrics.touches < self.min_touches || metrics.touches > self.max_touches {
            return false;
        }
        if metrics.days_in_stage < self.min_days_in_stage
            || metrics.days_in_stage > self.max_days_in_stage
        {
            return false;
        }
        if metrics.interest < self.min_interest || metrics.interest > self.max_interest {
            return false;
        }
        if self.requires_no_callback && metrics.has_future_callback {
            return false;
        }
        true
    }
}

/// Select the single rule that applies this run: the highest-priority
/// (lowest number) active rule whose ranges contain the lead's metrics.
/// Ties on priority break by rule id for determinism.
pub fn first_matching_rule<'a>(
    rules: &'a [PlaybookRule],
    metrics: &RuleMetrics,
) -> Option<&'a PlaybookRule> {
    rules
        .iter()
        .filter(|rule| rule.matches(metrics))
        .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.0.cmp(&b.id.0)))
}

#[cfg(test)]
mod tests {
    use super::{
        first_matching_rule, JourneyStage, PlaybookRule, RuleActionKind, RuleId, RuleMetrics,
        UserId,
    };

    fn rule(id: &str, priority: u32, action: RuleActionKind) -> PlaybookRule {
        PlaybookRule {
            id: RuleId(id.to_string()),
            user_id: UserId("U-1".to_string()),
            stage: JourneyStage::Stalled,
            priority,
            min_touches: 0,
            max_touches: 20,
            min_days_in_stage: 0,
            max_days_in_stage: 90,
            min_interest: 1,
            max_interest: 10,
            requires_no_callback: true,
            action,
            message_template: Some("Hi {first_name}".to_string()),
            move_to_stage: None,
            delay_hours: 48,
            respect_calling_window: true,
            active: true,
        }
    }

    fn metrics() -> RuleMetrics {
        RuleMetrics {
            stage: JourneyStage::Stalled,
            touches: 4,
            days_in_stage: 10,
            interest: 5,
            has_future_callback: false,
        }
    }

    #[test]
    fn lowest_priority_number_wins() {
        let rules =
            vec![rule("R-b", 5, RuleActionKind::Sms), rule("R-a", 2, RuleActionKind::Call)];
        let selected = first_matching_rule(&rules, &metrics()).expect("a rule should match");
        assert_eq!(selected.id.0, "R-a");
    }

    #[test]
    fn priority_ties_break_by_rule_id() {
        let rules =
            vec![rule("R-z", 3, RuleActionKind::Sms), rule("R-a", 3, RuleActionKind::Call)];
        let selected = first_matching_rule(&rules, &metrics()).expect("a rule should match");
        assert_eq!(selected.id.0, "R-a");
    }

    #[test]
    fn rule_with_callback_guard_skips_leads_with_scheduled_callback() {
        let rules = vec![rule("R-a", 1, RuleActionKind::Sms)];
        let mut with_callback = metrics();
        with_callback.has_future_callback = true;
        assert!(first_matching_rule(&rules, &with_callback).is_none());
    }

    #[test]
    fn inactive_and_out_of_range_rules_do_not_match() {
        let mut inactive = rule("R-a", 1, RuleActionKind::Sms);
        inactive.active = false;
        assert!(!inactive.matches(&metrics()));

        let mut narrow = rule("R-b", 1, RuleActionKind::Sms);
        narrow.min_touches = 10;
        assert!(!narrow.matches(&metrics()));

        let mut wrong_stage = rule("R-c", 1, RuleActionKind::Sms);
        wrong_stage.stage = JourneyStage::Hot;
        assert!(!wrong_stage.matches(&metrics()));
    }
}
