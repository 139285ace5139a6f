//! Action queue state machine. All transitions are validated and monotonic;
//! an entry that reaches a terminal status is never picked up again, so a
//! crash between claim and completion leaves at worst one `executing` row
//! that the operator can inspect, never a re-executed side effect.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::queue::{ActionQueueEntry, ActionStatus};
use crate::domain::run::Decision;
use crate::domain::settings::AutonomyLevel;
use crate::domain::{ActionId, UserId};

#[derive(Clone, Copy, Debug)]
pub struct QueuePolicy {
    /// Pending entries expire after this many hours.
    pub expiry_hours: i64,
    /// Most approved entries executed per run.
    pub execute_batch_size: usize,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self { expiry_hours: 24, execute_batch_size: 10 }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: ActionStatus, to: ActionStatus },
}

/// State machine over [`ActionQueueEntry`]. Pure: callers persist the
/// returned entries; time is always passed in.
#[derive(Clone, Debug, Default)]
pub struct ActionQueueEngine {
    policy: QueuePolicy,
}

impl ActionQueueEngine {
    pub fn new(policy: QueuePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Materialize a decision into a persisted entry. Full-auto users skip
    /// straight to `approved`; everyone else waits for operator review.
    pub fn propose(
        &self,
        user_id: &UserId,
        decision: Decision,
        autonomy: AutonomyLevel,
        now: DateTime<Utc>,
    ) -> ActionQueueEntry {
        let params_json = decision.params.to_string();
        let approved = autonomy == AutonomyLevel::FullAuto;
        let idempotency_key = decision
            .action_type
            .has_external_side_effect()
            .then(|| idempotency_key(decision.action_type.as_str(), &user_id.0, &params_json));

        ActionQueueEntry {
            id: ActionId(Uuid::new_v4().to_string()),
            user_id: user_id.clone(),
            lead_id: decision.lead_id,
            action_type: decision.action_type,
            params_json,
            priority: decision.priority,
            status: if approved { ActionStatus::Approved } else { ActionStatus::Pending },
            reasoning: decision.reasoning,
            source: decision.source,
            idempotency_key,
            result_json: None,
            error: None,
            created_at: now,
            approved_at: approved.then_some(now),
            executed_at: None,
            expires_at: now + Duration::hours(self.policy.expiry_hours),
        }
    }

    /// Operator approval: `pending` -> `approved`.
    pub fn approve(
        &self,
        mut entry: ActionQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<ActionQueueEntry, QueueError> {
        validate_transition(entry.status, ActionStatus::Approved)?;
        entry.status = ActionStatus::Approved;
        entry.approved_at = Some(now);
        Ok(entry)
    }

    /// Claim for execution: `approved` -> `executing`.
    pub fn begin(
        &self,
        mut entry: ActionQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<ActionQueueEntry, QueueError> {
        validate_transition(entry.status, ActionStatus::Executing)?;
        entry.status = ActionStatus::Executing;
        entry.executed_at = Some(now);
        Ok(entry)
    }

    /// Record success: `executing` -> `completed` with the structured result.
    pub fn complete(
        &self,
        mut entry: ActionQueueEntry,
        result_json: String,
        now: DateTime<Utc>,
    ) -> Result<ActionQueueEntry, QueueError> {
        validate_transition(entry.status, ActionStatus::Completed)?;
        entry.status = ActionStatus::Completed;
        entry.result_json = Some(result_json);
        entry.executed_at = Some(now);
        Ok(entry)
    }

    /// Unknown or no-op entries are completed with a skip marker rather than
    /// failed, so one bad row cannot poison the queue.
    pub fn complete_skipped(
        &self,
        entry: ActionQueueEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionQueueEntry, QueueError> {
        let result = serde_json::json!({ "skipped": true, "reason": reason }).to_string();
        self.complete(entry, result, now)
    }

    /// Record failure: `executing` -> `failed`. Failures are not retried
    /// within the run; the decision layer may re-propose later.
    pub fn fail(
        &self,
        mut entry: ActionQueueEntry,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<ActionQueueEntry, QueueError> {
        validate_transition(entry.status, ActionStatus::Failed)?;
        entry.status = ActionStatus::Failed;
        entry.error = Some(error);
        entry.executed_at = Some(now);
        Ok(entry)
    }

    /// Expire a stale pending entry: `pending` -> `expired`.
    pub fn expire(&self, mut entry: ActionQueueEntry) -> Result<ActionQueueEntry, QueueError> {
        validate_transition(entry.status, ActionStatus::Expired)?;
        entry.status = ActionStatus::Expired;
        Ok(entry)
    }
}

/// The only legal edges of the status machine.
fn validate_transition(from: ActionStatus, to: ActionStatus) -> Result<(), QueueError> {
    let allowed = matches!(
        (from, to),
        (ActionStatus::Pending, ActionStatus::Approved)
            | (ActionStatus::Pending, ActionStatus::Expired)
            | (ActionStatus::Approved, ActionStatus::Executing)
            | (ActionStatus::Executing, ActionStatus::Completed)
            | (ActionStatus::Executing, ActionStatus::Failed)
    );
    if allowed {
        Ok(())
    } else {
        Err(QueueError::InvalidTransition { from, to })
    }
}

/// Deduplication token for side-effecting actions, stable across re-proposals
/// of the same payload for the same user.
fn idempotency_key(action: &str, user: &str, params_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(params_json.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{action}_{hex}")
}

/// Billing keys enforced by the downstream ledger.
pub fn reserve_key(call_id: &str) -> String {
    format!("reserve_{call_id}")
}

pub fn finalize_key(call_id: &str) -> String {
    format!("finalize_{call_id}")
}
