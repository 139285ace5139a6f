use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::queue::{ActionSource, ActionType};
use super::{LeadId, UserId};

/// A candidate action produced by the decision engine or the journey
/// planner. Decisions never execute anything themselves; they are proposals
/// for the action queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action_type: ActionType,
    pub lead_id: Option<LeadId>,
    pub params: Value,
    /// Lower number = higher priority when the executor drains the queue.
    pub priority: u32,
    pub reasoning: String,
    pub source: ActionSource,
}

/// Per-user outcome of one engine pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub user_id: String,
    pub actions_queued: u32,
    pub actions_executed: u32,
    pub actions_expired: u32,
    pub leads_rescored: u32,
    pub windows_recalculated: u32,
    pub pacing_adjusted: bool,
    pub memories_saved: u32,
    pub journey_processed: u32,
    pub journey_actions: u32,
    pub journey_stage_changes: u32,
    pub decisions: Vec<String>,
    pub errors: Vec<String>,
}

impl EngineResult {
    pub fn for_user(user_id: &UserId) -> Self {
        Self { user_id: user_id.0.clone(), ..Self::default() }
    }
}

/// Whole-tick summary returned to the scheduler trigger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub users_processed: u32,
    pub total_actions_queued: u32,
    pub total_actions_executed: u32,
    pub total_leads_rescored: u32,
    pub total_decisions: u32,
    pub duration_ms: u64,
    pub results: Vec<EngineResult>,
}

impl RunSummary {
    pub fn absorb(&mut self, result: EngineResult) {
        self.users_processed += 1;
        self.total_actions_queued += result.actions_queued;
        self.total_actions_executed += result.actions_executed;
        self.total_leads_rescored += result.leads_rescored;
        self.total_decisions += result.decisions.len() as u32;
        self.results.push(result);
    }
}
