use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PhoneNumberId, UserId};

/// Outbound caller-id number with its externally supplied spam score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub id: PhoneNumberId,
    pub user_id: UserId,
    pub number: String,
    pub active: bool,
    pub spam_score: u32,
    pub quarantined_until: Option<DateTime<Utc>>,
}

impl PhoneNumber {
    pub fn is_quarantined(&self, now: DateTime<Utc>) -> bool {
        self.quarantined_until.is_some_and(|until| until > now)
    }
}
