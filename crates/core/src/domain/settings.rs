use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Approval policy governing whether proposed actions execute automatically,
/// wait for operator approval, or stay advisory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    FullAuto,
    ApprovalRequired,
    SuggestionsOnly,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullAuto => "full_auto",
            Self::ApprovalRequired => "approval_required",
            Self::SuggestionsOnly => "suggestions_only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full_auto" => Some(Self::FullAuto),
            "approval_required" => Some(Self::ApprovalRequired),
            "suggestions_only" => Some(Self::SuggestionsOnly),
            _ => None,
        }
    }

    /// Whether the engine may produce decisions at all. Suggestions-only
    /// users still get rescoring and journey stage tracking, but no queued
    /// actions.
    pub fn allows_decisions(&self) -> bool {
        !matches!(self, Self::SuggestionsOnly)
    }
}

/// Per-user automation configuration. Mutated by the settings UI (external)
/// and by the orchestrator (`last_run_at` only).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutomationSettings {
    pub user_id: UserId,
    pub enabled: bool,
    pub autonomy: AutonomyLevel,
    pub auto_pacing: bool,
    pub auto_queueing: bool,
    pub auto_followups: bool,
    pub auto_quarantine: bool,
    pub daily_call_goal: u32,
    pub daily_appointment_goal: u32,
    pub daily_conversation_goal: u32,
    pub max_daily_actions: u32,
    pub max_daily_touches: u32,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl AutomationSettings {
    /// Conservative defaults for a user that has never saved settings.
    pub fn defaults_for(user_id: UserId) -> Self {
        Self {
            user_id,
            enabled: false,
            autonomy: AutonomyLevel::ApprovalRequired,
            auto_pacing: true,
            auto_queueing: true,
            auto_followups: true,
            auto_quarantine: true,
            daily_call_goal: 100,
            daily_appointment_goal: 3,
            daily_conversation_goal: 15,
            max_daily_actions: 100,
            max_daily_touches: 200,
            last_run_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AutomationSettings, AutonomyLevel, UserId};

    #[test]
    fn autonomy_level_round_trips_through_strings() {
        for level in [
            AutonomyLevel::FullAuto,
            AutonomyLevel::ApprovalRequired,
            AutonomyLevel::SuggestionsOnly,
        ] {
            assert_eq!(AutonomyLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(AutonomyLevel::parse("manual"), None);
    }

    #[test]
    fn suggestions_only_blocks_decisions() {
        assert!(AutonomyLevel::FullAuto.allows_decisions());
        assert!(AutonomyLevel::ApprovalRequired.allows_decisions());
        assert!(!AutonomyLevel::SuggestionsOnly.allows_decisions());
    }

    #[test]
    fn default_settings_start_disabled() {
        let settings = AutomationSettings::defaults_for(UserId("U-1".to_string()));
        assert!(!settings.enabled);
        assert_eq!(settings.max_daily_touches, 200);
        assert_eq!(settings.autonomy, AutonomyLevel::ApprovalRequired);
    }
}
