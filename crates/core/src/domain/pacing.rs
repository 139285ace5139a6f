use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Current target dial rate for a user, persisted between runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacingState {
    pub user_id: UserId,
    pub calls_per_minute: u32,
    pub updated_at: DateTime<Utc>,
}

impl PacingState {
    pub const DEFAULT_RATE: u32 = 30;

    pub fn default_for(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self { user_id, calls_per_minute: Self::DEFAULT_RATE, updated_at: now }
    }
}
