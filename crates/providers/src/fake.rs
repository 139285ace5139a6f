//! Recording fake for engine tests: every request is captured, receipts are
//! deterministic, and individual channels can be told to fail.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

use cadence_core::domain::UserId;

use crate::{
    AiSmsRequest, BalanceCheck, BillingGateway, CallDispatcher, CallRequest, ProviderError,
    ProviderReceipt, SmsRequest, SmsSender,
};

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub channel: &'static str,
    pub payload: Value,
}

pub struct RecordingProviders {
    requests: Mutex<Vec<RecordedRequest>>,
    failing_channels: Mutex<HashSet<&'static str>>,
    sufficient_balance: Mutex<bool>,
    sequence: AtomicU64,
}

impl Default for RecordingProviders {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failing_channels: Mutex::new(HashSet::new()),
            sufficient_balance: Mutex::new(true),
            sequence: AtomicU64::new(0),
        }
    }
}

impl RecordingProviders {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn requests_for(&self, channel: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.channel == channel).collect()
    }

    /// Make every subsequent request on `channel` fail.
    pub fn fail_channel(&self, channel: &'static str) {
        match self.failing_channels.lock() {
            Ok(mut channels) => channels.insert(channel),
            Err(poisoned) => poisoned.into_inner().insert(channel),
        };
    }

    pub fn set_sufficient_balance(&self, sufficient: bool) {
        match self.sufficient_balance.lock() {
            Ok(mut value) => *value = sufficient,
            Err(poisoned) => *poisoned.into_inner() = sufficient,
        }
    }

    fn record(&self, channel: &'static str, payload: Value) -> Result<u64, ProviderError> {
        let failing = match self.failing_channels.lock() {
            Ok(channels) => channels.contains(channel),
            Err(poisoned) => poisoned.into_inner().contains(channel),
        };
        if failing {
            return Err(ProviderError::Rejected(format!("{channel} unavailable")));
        }

        match self.requests.lock() {
            Ok(mut requests) => requests.push(RecordedRequest { channel, payload }),
            Err(poisoned) => poisoned.into_inner().push(RecordedRequest { channel, payload }),
        }
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait::async_trait]
impl SmsSender for RecordingProviders {
    async fn send_sms(&self, request: SmsRequest) -> Result<ProviderReceipt, ProviderError> {
        let seq = self.record(
            "sms",
            json!({
                "to": request.to,
                "message": request.message,
                "lead_id": request.lead_id.map(|id| id.0),
                "user_id": request.user_id.0,
            }),
        )?;
        let sid = format!("SM-fake-{seq}");
        Ok(ProviderReceipt { provider_id: Some(sid.clone()), raw: json!({ "sid": sid }) })
    }

    async fn send_ai_sms(&self, request: AiSmsRequest) -> Result<ProviderReceipt, ProviderError> {
        let seq = self.record(
            "ai_sms",
            json!({
                "lead_id": request.lead_id.0,
                "phone_number": request.phone_number,
                "prompt": request.prompt,
                "context": request.context,
            }),
        )?;
        let sid = format!("SM-ai-fake-{seq}");
        Ok(ProviderReceipt { provider_id: Some(sid.clone()), raw: json!({ "sid": sid }) })
    }
}

#[async_trait::async_trait]
impl CallDispatcher for RecordingProviders {
    async fn make_call(&self, request: CallRequest) -> Result<ProviderReceipt, ProviderError> {
        let seq = self.record(
            "call",
            json!({
                "lead_id": request.lead_id.0,
                "phone_number": request.phone_number,
                "source": request.source,
            }),
        )?;
        let call_id = format!("CA-fake-{seq}");
        Ok(ProviderReceipt {
            provider_id: Some(call_id.clone()),
            raw: json!({ "call_id": call_id }),
        })
    }
}

#[async_trait::async_trait]
impl BillingGateway for RecordingProviders {
    async fn check_balance(&self, user_id: &UserId) -> Result<BalanceCheck, ProviderError> {
        self.record("billing", json!({ "action": "check_balance", "user_id": user_id.0 }))?;
        let sufficient = match self.sufficient_balance.lock() {
            Ok(value) => *value,
            Err(poisoned) => *poisoned.into_inner(),
        };
        Ok(BalanceCheck { sufficient, balance_cents: sufficient.then_some(10_000) })
    }

    async fn reserve(
        &self,
        user_id: &UserId,
        call_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ProviderError> {
        self.record(
            "billing",
            json!({
                "action": "reserve",
                "user_id": user_id.0,
                "call_id": call_id,
                "idempotency_key": idempotency_key,
            }),
        )?;
        Ok(ProviderReceipt { provider_id: None, raw: json!({ "reserved": true }) })
    }

    async fn finalize(
        &self,
        user_id: &UserId,
        call_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ProviderError> {
        self.record(
            "billing",
            json!({
                "action": "finalize",
                "user_id": user_id.0,
                "call_id": call_id,
                "idempotency_key": idempotency_key,
            }),
        )?;
        Ok(ProviderReceipt { provider_id: None, raw: json!({ "finalized": true }) })
    }
}
